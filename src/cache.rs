//! In-memory cache of the latest snapshot per source.
//!
//! Snapshots are stored behind [`Arc`] and swapped whole, so a reader either
//! sees the previous snapshot or the new one, never a mix.  The lock is only
//! held for the map lookup or insert.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::source::FeedSnapshot;

#[derive(Debug, Default)]
pub struct ItemCache {
    feeds: RwLock<HashMap<String, Arc<FeedSnapshot>>>,
}

impl ItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last cached snapshot for `source_id`, if it has been polled.
    pub fn get(&self, source_id: &str) -> Option<Arc<FeedSnapshot>> {
        self.feeds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_id)
            .cloned()
    }

    /// Replace the snapshot for `source_id`.  Last write wins.
    pub fn put(&self, source_id: impl Into<String>, snapshot: FeedSnapshot) {
        let snapshot = Arc::new(snapshot);
        self.feeds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_id.into(), snapshot);
    }

    /// Cached snapshots for `sources`, in the given order.
    ///
    /// Sources that have not been fetched successfully yet are skipped.
    pub fn list_feeds<S: AsRef<str>>(&self, sources: &[S]) -> Vec<Arc<FeedSnapshot>> {
        let feeds = self.feeds.read().unwrap_or_else(PoisonError::into_inner);
        sources
            .iter()
            .filter_map(|url| {
                let cached = feeds.get(url.as_ref()).cloned();
                if cached.is_none() {
                    tracing::debug!(url = url.as_ref(), "no cached snapshot yet");
                }
                cached
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.feeds.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
