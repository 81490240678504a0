//! Configuration model and the immutable [`Settings`] snapshot built from it.
//!
//! [`Config`] mirrors `config.json` as written by the user.  [`Settings`] is
//! the validated, compiled form the scheduler runs with: keyword rules are
//! compiled and notification routes are built.  A new `Settings` is produced
//! on every successful reload and swapped in whole.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::matcher::KeywordMatcher;
use crate::notifier::{Notifier, FEISHU_ROUTE, KNOWN_ROUTES, TELEGRAM_ROUTE};

// ---------------------------------------------------------------------------
// Raw config
// ---------------------------------------------------------------------------

/// Top-level configuration, loaded from `config.json`.
///
/// Keys the crate does not use (such as the legacy `nightStartTime`) are
/// ignored rather than rejected.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    /// Feed URLs to poll, in display order.
    #[serde(default)]
    pub values: Vec<String>,

    /// Poll interval in minutes.
    #[serde(default = "default_refresh")]
    pub refresh: u64,

    /// Keyword rules; see [`KeywordMatcher`].
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub notify: NotifyConfig,

    /// Path of the seen-item log.
    #[serde(default = "default_archives")]
    pub archives: PathBuf,

    /// Routes every announcement is sent to.
    #[serde(default = "default_routes")]
    pub routes: Vec<String>,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
}

/// `notify` section: one block per route.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct NotifyConfig {
    #[serde(default)]
    pub feishu: FeishuConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FeishuConfig {
    /// Custom-bot webhook URL.  Empty disables the route.
    #[serde(default)]
    pub api: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TelegramConfig {
    /// `sendMessage` endpoint, optionally containing `${token}`.  Empty
    /// disables the route.
    #[serde(default)]
    pub api: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub chat_id: String,
}

fn default_refresh() -> u64 { 10 }
fn default_archives() -> PathBuf { PathBuf::from("archives.txt") }
fn default_routes() -> Vec<String> { vec![FEISHU_ROUTE.to_string(), TELEGRAM_ROUTE.to_string()] }
fn default_fetch_timeout_secs() -> u64 { 30 }
fn default_notify_timeout_secs() -> u64 { 10 }

impl Config {
    /// Read, parse and validate the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse and validate `text`; `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh == 0 {
            return Err(ConfigError::Invalid("refresh must be at least 1 minute".into()));
        }
        if self.fetch_timeout_secs == 0 || self.notify_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least 1 second".into()));
        }
        if let Some(pos) = self.values.iter().position(|url| url.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("values[{pos}] is empty")));
        }
        for route in &self.routes {
            if !KNOWN_ROUTES.contains(&route.as_str()) {
                tracing::warn!(route = %route, "unknown route in config, it will be skipped");
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.refresh * 60)
    }

    /// Sources present in `newer` but not in `self`, in `newer`'s order.
    pub fn added_sources(&self, newer: &Config) -> Vec<String> {
        let known: BTreeSet<&str> = self.values.iter().map(String::as_str).collect();
        newer
            .values
            .iter()
            .filter(|url| !known.contains(url.as_str()))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Compiled snapshot
// ---------------------------------------------------------------------------

/// Everything one poll needs, fixed for the lifetime of the snapshot.
pub struct Settings {
    /// Sources with duplicates removed, first occurrence kept.
    pub sources: Vec<String>,
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub matcher: KeywordMatcher,
    pub notifier: Notifier,
    pub routes: BTreeSet<String>,
    /// The config this snapshot was built from.
    pub config: Config,
}

impl Settings {
    pub fn build(config: Config, client: Client) -> Result<Self, ConfigError> {
        config.validate()?;
        let matcher = KeywordMatcher::new(&config.keywords)?;
        let notifier = Notifier::from_config(
            &config.notify,
            client,
            Duration::from_secs(config.notify_timeout_secs),
        );

        let sources = {
            let mut seen = BTreeSet::new();
            config
                .values
                .iter()
                .filter(|url| seen.insert(url.as_str()))
                .cloned()
                .collect()
        };

        Ok(Self {
            sources,
            interval: config.interval(),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            matcher,
            notifier,
            routes: config.routes.iter().cloned().collect(),
            config,
        })
    }
}
