//! Types for the reconciler.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::Config;
use crate::error::ErrorClass;
use crate::filesystem::FsError;
use crate::torrent_client::TorrentClientError;

/// Errors from applying an action bundle.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("torrent client failed to {action}: {source}")]
    Client {
        action: String,
        #[source]
        source: TorrentClientError,
    },

    #[error(transparent)]
    Filesystem(#[from] FsError),

    /// A link needs the torrent's top-level name and it never arrived.
    #[error("metadata for torrent {hash} unavailable after {attempts} attempts")]
    MetadataUnavailable { hash: String, attempts: u32 },

    /// An action refers to a torrent the working snapshot does not hold.
    #[error("torrent {hash} is not in the working snapshot")]
    UnknownTorrent { hash: String },
}

impl ReconcileError {
    pub(crate) fn client(action: impl Into<String>, source: TorrentClientError) -> Self {
        Self::Client {
            action: action.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Client { source, .. } => source.class(),
            Self::Filesystem(e) => e.class(),
            Self::MetadataUnavailable { .. } | Self::UnknownTorrent { .. } => ErrorClass::Fatal,
        }
    }
}

/// Reconciler behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Move removed data into the trash directory instead of deleting it.
    pub trash: bool,
    /// Describe side effects instead of performing them.
    pub dry_run: bool,
    pub metadata_retries: u32,
    pub metadata_retry_delay: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            trash: true,
            dry_run: false,
            metadata_retries: 10,
            metadata_retry_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&Config> for ReconcileOptions {
    fn from(config: &Config) -> Self {
        Self {
            trash: config.trash,
            dry_run: config.dry_run,
            metadata_retries: config.reconcile.metadata_retries,
            metadata_retry_delay: Duration::from_millis(config.reconcile.metadata_retry_delay_ms),
        }
    }
}

/// A side effect, performed or (in a dry run) planned.
///
/// Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    RemoveLink { path: PathBuf },
    TrashData { hash: String, path: PathBuf },
    RemoveTorrent { hash: String },
    AddTorrent { hash: String, source: String, location: PathBuf, started: bool },
    SetSource { hash: String, source: String },
    Relocate { hash: String, location: PathBuf },
    SetStatus { hash: String, started: bool },
    AddLink { path: PathBuf, target: PathBuf },
    RemoveDirectory { path: PathBuf },
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoveLink { path } => write!(f, "remove link {}", path.display()),
            Self::TrashData { hash, path } => {
                write!(f, "trash data of {} at {}", hash, path.display())
            }
            Self::RemoveTorrent { hash } => write!(f, "remove torrent {}", hash),
            Self::AddTorrent {
                hash,
                source,
                location,
                started,
            } => write!(
                f,
                "add torrent {} to {} from {} ({})",
                hash,
                location.display(),
                source,
                if *started { "started" } else { "stopped" }
            ),
            Self::SetSource { hash, source } => write!(f, "re-source torrent {} from {}", hash, source),
            Self::Relocate { hash, location } => {
                write!(f, "move torrent {} to {}", hash, location.display())
            }
            Self::SetStatus { hash, started } => {
                let verb = if *started { "start" } else { "stop" };
                write!(f, "{} torrent {}", verb, hash)
            }
            Self::AddLink { path, target } => {
                write!(f, "link {} -> {}", path.display(), target.display())
            }
            Self::RemoveDirectory { path } => write!(f, "remove empty directory {}", path.display()),
        }
    }
}

/// Outcome of a successful apply.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Side effects in the order they happened (or would happen).
    pub performed: Vec<PlannedAction>,
    /// Problems that did not abort the run.
    pub warnings: Vec<ReconcileError>,
}
