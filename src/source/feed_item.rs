//! The core data types shared by the fetcher, cache and scheduler.
//!
//! A [`FeedSnapshot`] is the full parsed state of one source at one poll.
//! Snapshots are built once by a [`FeedFetcher`](super::FeedFetcher) and
//! never mutated afterwards; the cache swaps whole snapshots in and out.

use chrono::{DateTime, Local};

/// A single feed entry.
///
/// Identity is the [`link`](Item::link): two items with the same link are the
/// same item, regardless of title or description changes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Item {
    /// Stable identity of the item.
    ///
    /// For RSS this is the `<link>` element (falling back to `<guid>`).
    pub link: String,

    /// Human-readable headline; keyword rules are tested against this.
    pub title: String,

    /// Optional longer description or summary text.
    pub description: Option<String>,
}

impl Item {
    pub fn new(link: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: title.into(),
            description: None,
        }
    }
}

/// The full state of one source as of its last successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    /// The source URL this snapshot was fetched from.
    pub source_id: String,
    /// Channel title.
    pub title: String,
    /// Channel home page link.
    pub link: String,
    /// Items in the order the feed lists them (newest first for most feeds).
    pub items: Vec<Item>,
    /// When the poll that produced this snapshot started.
    pub last_update: DateTime<Local>,
}

impl FeedSnapshot {
    /// The first listed item, used as the change-detection marker.
    pub fn newest(&self) -> Option<&Item> {
        self.items.first()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
