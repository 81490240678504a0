//! State for the `--tui` status view.
//!
//! The view is read-only: every frame it is handed the cached snapshots of
//! the configured sources (see [`ItemCache::list_feeds`]) and renders them as
//! one header row per feed followed by that feed's items.
//!
//! [`ItemCache::list_feeds`]: crate::cache::ItemCache::list_feeds

use std::sync::Arc;

use ratatui::widgets::ListState;

use crate::source::{FeedSnapshot, Item};

/// One visible line of the list.
pub enum Row<'a> {
    Feed(&'a FeedSnapshot),
    Item(&'a Item),
}

/// Header row then item rows for each feed.  Borrows only the feeds, so
/// callers can hold rows while mutating the list state.
pub fn rows(feeds: &[Arc<FeedSnapshot>]) -> impl Iterator<Item = Row<'_>> {
    feeds.iter().flat_map(|feed| {
        std::iter::once(Row::Feed(feed.as_ref())).chain(feed.items.iter().map(Row::Item))
    })
}

pub struct App {
    /// Cached snapshots, in configured source order.
    pub feeds: Vec<Arc<FeedSnapshot>>,
    /// List selection state for scrolling.
    pub list_state: ListState,
    /// Whether the user has requested to quit.
    pub quit: bool,
    /// Status line text (counts, last refresh).
    pub status: String,
}

impl App {
    pub fn new() -> Self {
        Self {
            feeds: Vec::new(),
            list_state: ListState::default(),
            quit: false,
            status: "Waiting for first poll…".into(),
        }
    }

    /// Replace the displayed feeds, keeping the selection in range.
    pub fn set_feeds(&mut self, feeds: Vec<Arc<FeedSnapshot>>) {
        self.feeds = feeds;
        let rows = self.row_count();
        match self.list_state.selected() {
            Some(_) if rows == 0 => self.list_state.select(None),
            Some(i) if i >= rows => self.list_state.select(Some(rows - 1)),
            _ => {}
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        rows(&self.feeds)
    }

    pub fn selected_row(&self) -> Option<Row<'_>> {
        self.list_state.selected().and_then(|i| self.rows().nth(i))
    }

    pub fn row_count(&self) -> usize {
        self.feeds.iter().map(|f| f.items.len() + 1).sum()
    }

    pub fn item_count(&self) -> usize {
        self.feeds.iter().map(|f| f.items.len()).sum()
    }

    // -- navigation ----------------------------------------------------------

    pub fn select_next(&mut self) {
        let rows = self.row_count();
        if rows == 0 {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) => (i + 1).min(rows - 1),
            None => 0,
        };
        self.list_state.select(Some(i));
    }

    pub fn select_previous(&mut self) {
        if self.row_count() == 0 {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) => i.saturating_sub(1),
            None => 0,
        };
        self.list_state.select(Some(i));
    }

    pub fn select_first(&mut self) {
        if self.row_count() > 0 {
            self.list_state.select(Some(0));
        }
    }

    pub fn select_last(&mut self) {
        let rows = self.row_count();
        if rows > 0 {
            self.list_state.select(Some(rows - 1));
        }
    }

    /// Row indices of the feed headers.
    fn header_rows(&self) -> Vec<usize> {
        let mut at = 0;
        self.feeds
            .iter()
            .map(|f| {
                let header = at;
                at += f.items.len() + 1;
                header
            })
            .collect()
    }

    /// Jump to the next feed's header, staying put on the last feed.
    pub fn select_next_feed(&mut self) {
        let current = self.list_state.selected();
        let next = self
            .header_rows()
            .into_iter()
            .find(|&h| current.map_or(true, |c| h > c));
        if let Some(h) = next {
            self.list_state.select(Some(h));
        }
    }

    /// Jump to the current feed's header, or the previous one if already on it.
    pub fn select_previous_feed(&mut self) {
        let Some(current) = self.list_state.selected() else {
            self.select_first();
            return;
        };
        if let Some(h) = self.header_rows().into_iter().rev().find(|&h| h < current) {
            self.list_state.select(Some(h));
        }
    }
}
