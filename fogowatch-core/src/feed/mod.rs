//! Feed adapter: where incident records come from each cycle.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │  HttpFeed    │ ──► │ parse.rs     │ ──► │ Vec<IncidentRecord>
//! │  FileFeed    │     │ (sniff shape)│     │                  │
//! └──────────────┘     └──────────────┘     └──────────────────┘
//! ```
//!
//! The rest of the crate only sees [`IncidentFeed`]; tests substitute a
//! scripted implementation.

mod client;
pub mod parse;

pub use client::{FeedClient, HttpFeed};
pub use parse::{parse_document, parse_feature, parse_timestamp, sniff, FeedShape};

use std::path::{Path, PathBuf};

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::types::IncidentRecord;

/// Source of active incident records.
///
/// An empty result is valid. An error means no records could be obtained
/// this cycle.
pub trait IncidentFeed {
    /// Fetch the currently active incidents
    fn fetch(&mut self) -> Result<Vec<IncidentRecord>>;

    /// Human-readable description of the source, for logs
    fn describe(&self) -> String {
        "incident feed".to_string()
    }
}

impl<F: IncidentFeed + ?Sized> IncidentFeed for Box<F> {
    fn fetch(&mut self) -> Result<Vec<IncidentRecord>> {
        (**self).fetch()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Replays a JSON document from disk on every fetch.
///
/// Used for `file://` feed URLs (offline testing, captured responses).
#[derive(Debug, Clone)]
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IncidentFeed for FileFeed {
    fn fetch(&mut self) -> Result<Vec<IncidentRecord>> {
        let body = std::fs::read(&self.path).map_err(|e| {
            Error::Feed(format!("failed to read feed file {:?}: {}", self.path, e))
        })?;
        parse_document(&body)
    }

    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

/// Local path named by a `file://` URL, if `url` is one.
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    url.trim().strip_prefix("file://").map(PathBuf::from)
}

/// Build the feed described by configuration.
pub fn from_config(config: &FeedConfig) -> Result<Box<dyn IncidentFeed>> {
    match file_url_path(&config.url) {
        Some(path) => Ok(Box::new(FileFeed::new(path))),
        None => Ok(Box::new(HttpFeed::new(config)?)),
    }
}
