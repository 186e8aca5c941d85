//! Persistence of the applied snapshot between runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::ErrorClass;

use super::types::{FlatSnapshot, SnapshotEntry, CACHE_VERSION};

/// File name of the cache inside the cache directory.
pub const CACHE_FILE_NAME: &str = "flatdb_cache.json";

/// Errors reading or writing the cache. All of them are fatal to the
/// process: guessing at an unreadable cache risks deleting real data.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write cache {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("unsupported cache format version {found}; current is {current}")]
    UnsupportedVersion { found: u32, current: u32 },

    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CacheError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }
}

/// On-disk form of the cache.
#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    saved_at: DateTime<Utc>,
    snapshot: FlatSnapshot,
}

/// Only the version tag, read before trusting the rest of the document.
/// Unversioned files read as version 0.
#[derive(Debug, Deserialize)]
struct VersionProbe {
    #[serde(default)]
    version: u32,
}

/// Loads and saves the [`FlatSnapshot`] as versioned JSON.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    /// Cache stored as [`CACHE_FILE_NAME`] under `cache_dir`.
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            path: cache_dir.as_ref().join(CACHE_FILE_NAME),
        }
    }

    /// Cache stored at an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot; a missing file is a first run.
    pub async fn load(&self) -> Result<FlatSnapshot, CacheError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No cache at {:?}, starting from an empty snapshot", self.path);
                return Ok(FlatSnapshot::empty());
            }
            Err(source) => {
                return Err(CacheError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let probe: VersionProbe = serde_json::from_str(&text).map_err(|e| self.corrupt(e))?;
        let document = match probe.version {
            CACHE_VERSION => {
                serde_json::from_str::<CacheDocument>(&text).map_err(|e| self.corrupt(e))?
            }
            found if found < CACHE_VERSION => self.upgrade(found, &text)?,
            found => {
                return Err(CacheError::UnsupportedVersion {
                    found,
                    current: CACHE_VERSION,
                })
            }
        };
        debug!(
            "Loaded cache with {} torrents saved at {}",
            document.snapshot.torrents.len(),
            document.saved_at
        );
        Ok(document.snapshot)
    }

    /// Brings an older cache layout up to [`CACHE_VERSION`]. The upgraded
    /// form reaches disk with the next save.
    fn upgrade(&self, found: u32, text: &str) -> Result<CacheDocument, CacheError> {
        info!(
            "Upgrading cache {:?} from version {} to {}",
            self.path, found, CACHE_VERSION
        );
        match found {
            // Before versioning the file was a bare map of hash to entry.
            0 => {
                let torrents: BTreeMap<String, SnapshotEntry> =
                    serde_json::from_str(text).map_err(|e| self.corrupt(e))?;
                let mut snapshot = FlatSnapshot::empty();
                snapshot.torrents = torrents;
                Ok(CacheDocument {
                    version: CACHE_VERSION,
                    saved_at: DateTime::<Utc>::UNIX_EPOCH,
                    snapshot,
                })
            }
            _ => Err(CacheError::UnsupportedVersion {
                found,
                current: CACHE_VERSION,
            }),
        }
    }

    /// Writes the snapshot atomically: a temporary sibling, then a rename.
    pub async fn save(&self, snapshot: &FlatSnapshot) -> Result<(), CacheError> {
        let document = CacheDocument {
            version: CACHE_VERSION,
            saved_at: Utc::now(),
            snapshot: snapshot.clone(),
        };
        let json = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| self.write_error(source))?;
            }
        }

        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, json)
            .await
            .map_err(|source| self.write_error(source))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|source| self.write_error(source))?;

        debug!("Saved cache with {} torrents", snapshot.torrents.len());
        Ok(())
    }

    fn corrupt(&self, e: serde_json::Error) -> CacheError {
        CacheError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }

    fn write_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Write {
            path: self.path.clone(),
            source,
        }
    }
}
