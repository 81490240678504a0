//! Fan-out of announcements to notification routes.
//!
//! A route is a named [`Transport`] (a chat webhook, a bot API).  The
//! [`Notifier`] sends one message to every targeted route concurrently and
//! waits for all of them; one route failing or hanging never affects the
//! others, and nothing is reported back to the caller except an informational
//! [`DispatchReport`].
//!
//! ## For contributors: adding a route
//!
//! 1. Add a transport file here implementing [`Transport`].
//! 2. Give it a route name constant and list it in [`KNOWN_ROUTES`].
//! 3. Register it in [`Notifier::from_config`] when its config is enabled.

mod feishu;
mod telegram;

pub use feishu::FeishuTransport;
pub use telegram::TelegramTransport;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;

use crate::config::NotifyConfig;
use crate::error::DispatchError;

pub const FEISHU_ROUTE: &str = "feishu";
pub const TELEGRAM_ROUTE: &str = "telegram";

/// Every route name the notifier knows how to build.
pub const KNOWN_ROUTES: &[&str] = &[FEISHU_ROUTE, TELEGRAM_ROUTE];

/// One announcement and the routes it should go to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub routes: BTreeSet<String>,
    pub content: String,
}

impl NotificationMessage {
    pub fn new<I, S>(routes: I, content: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            routes: routes.into_iter().map(Into::into).collect(),
            content: content.into(),
        }
    }
}

/// A single notification backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `text` as a plain-text message.
    async fn send(&self, text: &str) -> Result<(), DispatchError>;
}

/// What happened to each targeted route during one dispatch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
    /// Unknown or disabled routes.
    pub skipped: Vec<String>,
}

pub struct Notifier {
    routes: HashMap<String, Arc<dyn Transport>>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            routes: HashMap::new(),
            timeout,
        }
    }

    /// Register (or replace) the transport behind `name`.
    pub fn with_route(mut self, name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.routes.insert(name.into(), transport);
        self
    }

    /// Build the enabled routes from configuration.
    ///
    /// A route is enabled when its `api` endpoint is set.
    pub fn from_config(config: &NotifyConfig, client: Client, timeout: Duration) -> Self {
        let mut notifier = Self::new(timeout);

        if !config.feishu.api.is_empty() {
            notifier = notifier.with_route(
                FEISHU_ROUTE,
                Arc::new(FeishuTransport::new(client.clone(), &config.feishu.api)),
            );
        }
        if !config.telegram.api.is_empty() {
            notifier = notifier.with_route(
                TELEGRAM_ROUTE,
                Arc::new(TelegramTransport::new(
                    client,
                    &config.telegram.api,
                    &config.telegram.token,
                    &config.telegram.chat_id,
                )),
            );
        }

        notifier
    }

    /// Names of the routes that will actually send.
    pub fn enabled_routes(&self) -> BTreeSet<&str> {
        self.routes.keys().map(String::as_str).collect()
    }

    /// Send `message` to each of its routes and wait for all of them.
    ///
    /// Failures are logged per route and never returned.
    pub async fn dispatch(&self, message: &NotificationMessage) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut sends = Vec::with_capacity(message.routes.len());

        for name in &message.routes {
            match self.routes.get(name) {
                Some(transport) => {
                    sends.push(self.send_one(name, transport.as_ref(), &message.content));
                }
                None if KNOWN_ROUTES.contains(&name.as_str()) => {
                    tracing::debug!(route = %name, "route disabled, skipping");
                    report.skipped.push(name.clone());
                }
                None => {
                    tracing::warn!(route = %name, "unknown notification route, skipping");
                    report.skipped.push(name.clone());
                }
            }
        }

        for (name, result) in join_all(sends).await {
            match result {
                Ok(()) => {
                    tracing::info!(route = %name, "notification sent");
                    report.delivered.push(name);
                }
                Err(e) => {
                    tracing::warn!(route = %name, error = %e, "notification failed");
                    report.failed.push(name);
                }
            }
        }

        report
    }

    async fn send_one(
        &self,
        name: &str,
        transport: &dyn Transport,
        content: &str,
    ) -> (String, Result<(), DispatchError>) {
        let result = match tokio::time::timeout(self.timeout, transport.send(content)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
        };
        (name.to_string(), result)
    }
}

/// POST `body` as JSON and treat any non-2xx status as a failure.
async fn post_json(
    client: &Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<(), DispatchError> {
    let response = client.post(url).json(body).send().await?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    tracing::debug!(%status, body = %text, "route response");

    if !status.is_success() {
        return Err(DispatchError::Status { status, body: text });
    }
    Ok(())
}
