//! RSS feed fetcher.
//!
//! Fetches an RSS 2.0 document over HTTP with [`reqwest`] and parses it with
//! the [`rss`] crate.  Parsing is split out into [`RssFetcher::parse_channel`]
//! so tests can exercise it without the network.

use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;

use super::{FeedFetcher, FeedSnapshot, Item};
use crate::error::FetchError;

/// An RSS feed fetcher sharing one HTTP client across all sources.
pub struct RssFetcher {
    client: Client,
}

impl RssFetcher {
    /// The per-request timeout is enforced by the scheduler, not the client,
    /// so it can change on config reload.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Convert an already-fetched [`rss::Channel`] into a [`FeedSnapshot`].
    ///
    /// This is a pure function (no I/O) so that tests can exercise the
    /// parsing logic without hitting the network.
    pub fn parse_channel(channel: &rss::Channel, source_id: &str) -> FeedSnapshot {
        let items = channel
            .items()
            .iter()
            .map(|item| {
                // Prefer <link>, fall back to <guid>, then empty string.
                let link = item
                    .link()
                    .map(String::from)
                    .or_else(|| item.guid().map(|g| g.value().to_string()))
                    .unwrap_or_default();

                Item {
                    description: item.description().map(String::from),
                    ..Item::new(link, item.title().unwrap_or_default())
                }
            })
            .collect();

        FeedSnapshot {
            source_id: source_id.to_string(),
            title: channel.title().to_string(),
            link: channel.link().to_string(),
            items,
            last_update: Local::now(),
        }
    }
}

#[async_trait]
impl FeedFetcher for RssFetcher {
    async fn fetch(&self, url: &str) -> Result<FeedSnapshot, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await?;
        let channel = rss::Channel::read_from(body.as_ref())?;
        let snapshot = Self::parse_channel(&channel, url);
        tracing::debug!(url, items = snapshot.items.len(), "parsed feed");
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
