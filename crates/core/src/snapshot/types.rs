//! Flat snapshot of applied (or desired) library state.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::paths::{extension_of, with_extension};

/// Current cache format version understood by this build.
pub const CACHE_VERSION: u32 = 1;

/// Lifecycle state a torrent should be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentStatus {
    /// Progress unknown; keep it running until the client reports.
    Checking,
    Started,
    Stopped,
}

impl TorrentStatus {
    /// Whether the client should be running this torrent.
    pub fn is_started(&self) -> bool {
        !matches!(self, TorrentStatus::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentStatus::Checking => "checking",
            TorrentStatus::Started => "started",
            TorrentStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TorrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level name of a torrent's download.
///
/// The name is only known once the client has the torrent's metadata, so
/// links for freshly added torrents start out pending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceName {
    Pending { hash: String },
    Resolved { name: String },
}

impl SourceName {
    pub fn pending(hash: impl Into<String>) -> Self {
        SourceName::Pending { hash: hash.into() }
    }

    pub fn resolved(name: impl Into<String>) -> Self {
        SourceName::Resolved { name: name.into() }
    }

    pub fn as_resolved(&self) -> Option<&str> {
        match self {
            SourceName::Resolved { name } => Some(name),
            SourceName::Pending { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, SourceName::Pending { .. })
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceName::Pending { hash } => write!(f, "$NAME:{}$", hash),
            SourceName::Resolved { name } => f.write_str(name),
        }
    }
}

/// Where a link points, relative to its torrent's download location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkSource {
    pub name: SourceName,
    /// File below the top-level name; `None` when the torrent is a single file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl LinkSource {
    pub fn new(name: SourceName, file: Option<PathBuf>) -> Self {
        Self { name, file }
    }

    /// Extension of the file the link will point at, if known.
    pub fn extension(&self) -> Option<String> {
        match &self.file {
            Some(file) => extension_of(file),
            None => self.name.as_resolved().and_then(|n| extension_of(Path::new(n))),
        }
    }

    /// Whether both sources name the same file.
    ///
    /// A pending name matches any name, as the file path is what the
    /// declaration actually pins down.
    pub fn same_target(&self, other: &LinkSource) -> bool {
        if self.file != other.file {
            return false;
        }
        match (self.name.as_resolved(), other.name.as_resolved()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Full path of the source below `location`, once the name is resolved.
    pub fn path_under(&self, location: &Path) -> Option<PathBuf> {
        let name = self.name.as_resolved()?;
        let mut path = location.join(name);
        if let Some(file) = &self.file {
            path.push(file);
        }
        Some(path)
    }

    /// Link path for the stem `dest`, with this source's extension.
    pub fn destination(&self, dest: &Path) -> PathBuf {
        with_extension(dest, self.extension().as_deref())
    }

    /// Same source with a resolved name.
    pub fn resolve(&self, name: &str) -> LinkSource {
        LinkSource {
            name: SourceName::resolved(name),
            file: self.file.clone(),
        }
    }
}

impl fmt::Display for LinkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(file) = &self.file {
            write!(f, "/{}", file.display())?;
        }
        Ok(())
    }
}

/// One torrent in the snapshot and the links it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub source: String,
    /// Download location, relative to the media root when under it.
    pub location: PathBuf,
    pub status: TorrentStatus,
    /// Link destination stems (no extension) mapped to what they point at.
    #[serde(default)]
    pub links: BTreeMap<PathBuf, LinkSource>,
}

impl SnapshotEntry {
    pub fn new(source: impl Into<String>, location: impl Into<PathBuf>, status: TorrentStatus) -> Self {
        Self {
            source: source.into(),
            location: location.into(),
            status,
            links: BTreeMap::new(),
        }
    }

    /// First resolved top-level name among the owned links.
    pub fn known_name(&self) -> Option<&str> {
        self.links.values().find_map(|l| l.name.as_resolved())
    }
}

/// Canonical record of library state, keyed by torrent hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatSnapshot {
    pub version: u32,
    #[serde(default)]
    pub torrents: BTreeMap<String, SnapshotEntry>,
}

impl Default for FlatSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl FlatSnapshot {
    pub fn empty() -> Self {
        Self {
            version: CACHE_VERSION,
            torrents: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.torrents.is_empty()
    }

    /// Total number of links across all torrents.
    pub fn link_count(&self) -> usize {
        self.torrents.values().map(|e| e.links.len()).sum()
    }

    /// Equality ignoring how far names have been resolved.
    pub fn equivalent(&self, other: &FlatSnapshot) -> bool {
        if self.torrents.len() != other.torrents.len() {
            return false;
        }
        self.torrents.iter().all(|(hash, a)| {
            let b = match other.torrents.get(hash) {
                Some(b) => b,
                None => return false,
            };
            a.source == b.source
                && a.location == b.location
                && a.status == b.status
                && a.links.len() == b.links.len()
                && a.links.iter().all(|(dest, la)| {
                    b.links
                        .get(dest)
                        .map(|lb| la.same_target(lb))
                        .unwrap_or(false)
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_source_extension() {
        let pending = LinkSource::new(SourceName::pending("a".repeat(40)), None);
        assert_eq!(pending.extension(), None);
        assert_eq!(
            pending.destination(Path::new("Foo/Foo - 01")),
            PathBuf::from("Foo/Foo - 01.$EXT$")
        );

        let single = pending.resolve("[Group] Foo - 01.mkv");
        assert_eq!(single.extension().as_deref(), Some("mkv"));

        let nested = LinkSource::new(
            SourceName::pending("a".repeat(40)),
            Some(PathBuf::from("Extras/Foo OVA.mp4")),
        );
        assert_eq!(nested.extension().as_deref(), Some("mp4"));
    }

    #[test]
    fn test_same_target_treats_pending_as_wildcard() {
        let file = Some(PathBuf::from("01.mkv"));
        let pending = LinkSource::new(SourceName::pending("h"), file.clone());
        let resolved = LinkSource::new(SourceName::resolved("Foo"), file.clone());
        let other = LinkSource::new(SourceName::resolved("Bar"), file);
        let other_file = LinkSource::new(SourceName::resolved("Foo"), Some(PathBuf::from("02.mkv")));

        assert!(pending.same_target(&resolved));
        assert!(resolved.same_target(&pending));
        assert!(!resolved.same_target(&other));
        assert!(!resolved.same_target(&other_file));
    }

    #[test]
    fn test_path_under() {
        let source = LinkSource::new(SourceName::resolved("Foo"), Some(PathBuf::from("01.mkv")));
        assert_eq!(
            source.path_under(Path::new("/t/2019q1")),
            Some(PathBuf::from("/t/2019q1/Foo/01.mkv"))
        );
        let pending = LinkSource::new(SourceName::pending("h"), None);
        assert_eq!(pending.path_under(Path::new("/t")), None);
    }

    #[test]
    fn test_snapshot_serialization_uses_path_keys() {
        let mut entry = SnapshotEntry::new("magnet:?x", ".Torrents/2019q1", TorrentStatus::Started);
        entry.links.insert(
            PathBuf::from("In Progress/Foo/Foo - 01"),
            LinkSource::new(SourceName::resolved("Foo.mkv"), None),
        );
        let mut snapshot = FlatSnapshot::empty();
        snapshot.torrents.insert("a".repeat(40), entry);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"In Progress/Foo/Foo - 01\""));
        assert!(json.contains("\"started\""));

        let back: FlatSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_status_is_started() {
        assert!(TorrentStatus::Checking.is_started());
        assert!(TorrentStatus::Started.is_started());
        assert!(!TorrentStatus::Stopped.is_started());
    }
}
