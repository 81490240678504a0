//! Feed source abstraction layer.
//!
//! This module defines the [`FeedFetcher`] trait and the snapshot types it
//! produces.  Concrete fetchers live in sub-modules (currently only
//! [`rss`]).
//!
//! ## For contributors: adding a new feed format
//!
//! 1. Create a new file in this directory (e.g. `atom.rs`).
//! 2. Define a struct (e.g. `AtomFetcher`) and implement [`FeedFetcher`] for it.
//! 3. Add `mod atom;` below and re-export your struct in the `pub use` block.
//! 4. Construct it in `main.rs` in place of (or alongside) `RssFetcher`.
//!
//! The scheduler, cache and dedup ledger only ever see [`FeedSnapshot`]s.

mod feed_item;
mod rss;

pub use feed_item::{FeedSnapshot, Item};
pub use self::rss::RssFetcher;

#[cfg(test)]
pub(crate) use feed_item::tests::snapshot;

use async_trait::async_trait;

use crate::error::FetchError;

/// Trait that every feed fetcher must implement.
///
/// The scheduler calls [`fetch()`](FeedFetcher::fetch) once per source per
/// tick, from many tasks at once, so implementations must be
/// `Send + Sync` and must not hold state between calls that would serialise
/// them.
///
/// ## Implementing a new fetcher
///
/// ```ignore
/// pub struct MyFetcher { /* client, options */ }
///
/// #[async_trait]
/// impl FeedFetcher for MyFetcher {
///     async fn fetch(&self, url: &str) -> Result<FeedSnapshot, FetchError> {
///         // Perform HTTP / IO, then convert into a FeedSnapshot.
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch and parse the feed at `url`.
    ///
    /// The returned snapshot's `last_update` is a placeholder; the scheduler
    /// stamps it with the tick time before caching.
    async fn fetch(&self, url: &str) -> Result<FeedSnapshot, FetchError>;
}
