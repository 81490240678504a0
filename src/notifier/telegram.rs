//! Telegram Bot API `sendMessage`.
//!
//! The configured endpoint may carry a `${token}` placeholder so the token can
//! live in its own config field, e.g.
//! `https://api.telegram.org/bot${token}/sendMessage`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{post_json, Transport};
use crate::error::DispatchError;

const TOKEN_PLACEHOLDER: &str = "${token}";

pub struct TelegramTransport {
    client: Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramTransport {
    pub fn new(client: Client, api: &str, token: &str, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: api.replace(TOKEN_PLACEHOLDER, token),
            chat_id: chat_id.into(),
        }
    }

    fn payload(&self, text: &str) -> Value {
        json!({
            "chat_id": self.chat_id,
            "text": text,
        })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(&self, text: &str) -> Result<(), DispatchError> {
        post_json(&self.client, &self.endpoint, &self.payload(text)).await
    }
}
