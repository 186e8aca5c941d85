//! Types for torrent client operations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorClass;

/// Errors that can occur during torrent client operations.
#[derive(Debug, Error)]
pub enum TorrentClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Torrent not found: {0}")]
    TorrentNotFound(String),

    #[error("Invalid torrent data: {0}")]
    InvalidTorrent(String),

    #[error("API error: {0}")]
    ApiError(String),

    /// The torrent exists but its metadata has not been fetched yet.
    #[error("Metadata not ready for torrent {0}")]
    NotReady(String),

    /// The backend cannot perform this operation.
    #[error("Operation not supported by {backend}: {operation}")]
    Unsupported {
        backend: String,
        operation: &'static str,
    },

    #[error("Request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TorrentClientError {
    /// How a reconciliation cycle should react to this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotReady(_) | Self::ConnectionFailed(_) | Self::Timeout => ErrorClass::Retryable,
            Self::Unsupported { .. } => ErrorClass::Warning,
            _ => ErrorClass::Fatal,
        }
    }

    /// Maps a reqwest failure the way every backend does.
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TorrentClientError::Timeout
        } else if e.is_connect() {
            TorrentClientError::ConnectionFailed(e.to_string())
        } else {
            TorrentClientError::ApiError(e.to_string())
        }
    }
}

/// Request to add a new torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddTorrentRequest {
    /// Hash the torrent is declared under.
    pub hash: String,
    /// Magnet URI, URL, or path to a `.torrent` file.
    pub source: String,
    /// Absolute download directory.
    pub location: PathBuf,
    /// Start downloading immediately.
    pub started: bool,
}

impl AddTorrentRequest {
    pub fn new(hash: impl Into<String>, source: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            hash: hash.into(),
            source: source.into(),
            location: location.into(),
            started: true,
        }
    }

    /// Set whether to start the torrent right away.
    pub fn with_started(mut self, started: bool) -> Self {
        self.started = started;
        self
    }

    /// Whether the source is a magnet or remote URL rather than a local file.
    pub fn is_remote(&self) -> bool {
        is_remote_source(&self.source)
    }
}

/// Whether a torrent source must be fetched by the client itself.
pub fn is_remote_source(source: &str) -> bool {
    let lower = source.to_lowercase();
    lower.starts_with("magnet:") || lower.starts_with("http://") || lower.starts_with("https://")
}

/// Result of adding a torrent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddTorrentResult {
    /// Hash reported by the client, when it reports one.
    pub hash: Option<String>,
    /// Top-level name, when already known.
    pub name: Option<String>,
}

/// Liveness facts about a torrent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TorrentStats {
    /// Top-level name; `None` until metadata is available.
    pub name: Option<String>,
    /// Directory the torrent downloads into.
    pub download_dir: Option<PathBuf>,
    /// Completion in `0.0..=1.0`; `None` while unknown.
    pub percent_done: Option<f64>,
    /// Seeder count reported by each tracker; negative means unknown.
    pub tracker_seeders: Vec<i64>,
    pub upload_ratio: f64,
}

impl TorrentStats {
    /// Path of the downloaded data, when both parts are known.
    pub fn content_path(&self) -> Option<PathBuf> {
        match (&self.download_dir, &self.name) {
            (Some(dir), Some(name)) => Some(dir.join(name)),
            _ => None,
        }
    }
}

/// Trait for torrent client backends.
///
/// Hashes are lowercase hex. Lookups only return entries for torrents the
/// client knows; an unknown hash is simply absent from the map.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Add a new torrent.
    async fn add(&self, request: AddTorrentRequest) -> Result<AddTorrentResult, TorrentClientError>;

    /// Remove torrents, keeping their downloaded data on disk.
    async fn remove(&self, hashes: &[String]) -> Result<(), TorrentClientError>;

    /// Move a torrent's data to a new directory.
    async fn move_to(&self, hash: &str, location: &Path) -> Result<(), TorrentClientError>;

    /// Replace the source a torrent was added from.
    async fn set_source(&self, hash: &str, source: &str) -> Result<(), TorrentClientError>;

    /// Start or stop a torrent.
    async fn set_status(&self, hash: &str, started: bool) -> Result<(), TorrentClientError>;

    /// Top-level download names of torrents whose metadata is known.
    async fn resolve_names(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, String>, TorrentClientError>;

    /// Files of each torrent, relative to its download directory.
    async fn list_files(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<PathBuf>>, TorrentClientError>;

    /// Liveness stats of each torrent.
    async fn stats(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, TorrentStats>, TorrentClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            TorrentClientError::NotReady("h".into()).class(),
            ErrorClass::Retryable
        );
        assert_eq!(TorrentClientError::Timeout.class(), ErrorClass::Retryable);
        assert_eq!(
            TorrentClientError::Unsupported {
                backend: "transmission".into(),
                operation: "set_source",
            }
            .class(),
            ErrorClass::Warning
        );
        assert_eq!(
            TorrentClientError::ApiError("boom".into()).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_add_torrent_request_builder() {
        let req = AddTorrentRequest::new("abc", "magnet:?xt=urn:btih:abc", "/downloads")
            .with_started(false);
        assert_eq!(req.location, PathBuf::from("/downloads"));
        assert!(!req.started);
        assert!(req.is_remote());

        let local = AddTorrentRequest::new("abc", "/srv/torrents/foo.torrent", "/downloads");
        assert!(local.started);
        assert!(!local.is_remote());
    }

    #[test]
    fn test_content_path() {
        let stats = TorrentStats {
            name: Some("Foo".into()),
            download_dir: Some(PathBuf::from("/t/2019q1")),
            ..Default::default()
        };
        assert_eq!(stats.content_path(), Some(PathBuf::from("/t/2019q1/Foo")));
        assert_eq!(TorrentStats::default().content_path(), None);
    }

    #[test]
    fn test_torrent_stats_serialization() {
        let stats = TorrentStats {
            name: Some("Foo".into()),
            download_dir: None,
            percent_done: Some(0.5),
            tracker_seeders: vec![3, -1],
            upload_ratio: 0.25,
        };
        let json = serde_json::to_string(&stats).unwrap();
        let back: TorrentStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
