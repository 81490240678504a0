//! Feishu / Lark custom-bot webhook.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{post_json, Transport};
use crate::error::DispatchError;

pub struct FeishuTransport {
    client: Client,
    webhook: String,
}

impl FeishuTransport {
    pub fn new(client: Client, webhook: impl Into<String>) -> Self {
        Self {
            client,
            webhook: webhook.into(),
        }
    }

    fn payload(text: &str) -> Value {
        json!({
            "msg_type": "text",
            "content": { "text": text },
        })
    }
}

#[async_trait]
impl Transport for FeishuTransport {
    async fn send(&self, text: &str) -> Result<(), DispatchError> {
        post_json(&self.client, &self.webhook, &Self::payload(text)).await
    }
}
