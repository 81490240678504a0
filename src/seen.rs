//! Dedup ledger of item links that have already been announced.
//!
//! The ledger is a plain text file with one link per line, opened in append
//! mode, plus an in-memory set mirroring it.  On startup the whole file is
//! replayed into the set.  A link is only reported as seen once its line has
//! been written and flushed.
//!
//! Links are stored by their record form: line breaks become spaces and
//! outer whitespace is trimmed, which is exactly what a replay reads back.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use crate::error::PersistError;

pub struct SeenStore {
    path: PathBuf,
    links: RwLock<HashSet<String>>,
    /// Serialises appends; held for the check, write and insert.
    log: Mutex<File>,
}

impl SeenStore {
    /// Open (creating if needed) the log at `path` and replay it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        let io_err = |source: std::io::Error| PersistError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        let links = replay(&path).map_err(io_err)?;
        tracing::info!(path = %path.display(), links = links.len(), "replayed seen log");

        Ok(Self {
            path,
            links: RwLock::new(links),
            log: Mutex::new(log),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has(&self, link: &str) -> bool {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&record_key(link))
    }

    /// Durably record `link`.
    ///
    /// Returns `Ok(false)` without touching the file when the link is already
    /// recorded or blank.  The in-memory set is only updated after the append
    /// succeeds, so `has` keeps agreeing with what a restart would replay.
    pub fn mark_seen(&self, link: &str) -> Result<bool, PersistError> {
        let key = record_key(link);
        if key.is_empty() {
            return Ok(false);
        }

        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if self.has(&key) {
            return Ok(false);
        }

        append_line(&mut *log, &key).map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.links.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn replay(path: &Path) -> std::io::Result<HashSet<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut links = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let link = line.trim();
        if !link.is_empty() {
            links.insert(link.to_string());
        }
    }
    Ok(links)
}

/// The single-line form a link is logged and looked up under.
fn record_key(link: &str) -> String {
    link.replace(['\r', '\n'], " ").trim().to_string()
}

fn append_line(log: &mut impl Write, record: &str) -> std::io::Result<()> {
    writeln!(log, "{record}")?;
    log.flush()
}
