//! Error types for each stage of the pipeline.
//!
//! None of these are fatal once polling has started: a [`FetchError`] skips
//! one source for one tick, a [`DispatchError`] loses one route for one
//! message, and a [`PersistError`] from `mark_seen` only means the item may
//! be announced again after a restart.  [`ConfigError`] is fatal at startup
//! and rejected (keeping the previous snapshot) on reload.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Fetching or parsing one feed source failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),

    #[error("failed to parse feed: {0}")]
    Parse(#[from] rss::Error),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Appending to (or replaying) the seen-item log failed.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("seen log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Sending a message over one notification route failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("route responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// The configuration file is unreadable or invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid keyword pattern {rule:?}: {source}")]
    Keyword {
        rule: String,
        #[source]
        source: regex::Error,
    },
}
