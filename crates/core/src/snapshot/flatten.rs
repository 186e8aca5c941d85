//! Projection of the declaration into a desired [`FlatSnapshot`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::database::{Database, Episode, EpisodeSpec, Torrent};
use crate::paths::{download_location, link_destination};
use crate::torrent_client::TorrentStats;

use super::types::{FlatSnapshot, LinkSource, SnapshotEntry, SourceName, TorrentStatus};

/// Torrents that have seeded at least this ratio may be stopped.
pub const TARGET_RATIO: f64 = 2.0;

/// Torrents with more seeders than this may be stopped.
pub const MIN_SEEDERS: i64 = 1;

/// Read-only facts the flattener needs from the torrent client.
#[derive(Debug, Clone, Default)]
pub struct ClientView {
    /// Stats per hash, for torrents the client knows.
    pub stats: HashMap<String, TorrentStats>,
    /// File listings per hash, relative to the download location.
    pub files: HashMap<String, Vec<PathBuf>>,
}

impl ClientView {
    fn name(&self, hash: &str) -> Option<&str> {
        self.stats.get(hash).and_then(|s| s.name.as_deref())
    }
}

/// Data-quality problems found while flattening. None of them stop a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum FlattenWarning {
    /// Two episodes map to the same destination; the later one wins.
    DuplicateDestination {
        dest: PathBuf,
        previous: String,
        hash: String,
    },
    /// The file listing is not available yet.
    PatternDeferred { hash: String },
    /// A pattern matched none of the torrent's files.
    UnmatchedPattern { hash: String, show: String },
    /// A generated episode names a season the show does not declare.
    UndeclaredSeason {
        hash: String,
        show: String,
        season: u32,
    },
}

impl fmt::Display for FlattenWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlattenWarning::DuplicateDestination {
                dest,
                previous,
                hash,
            } => write!(
                f,
                "duplicate link {:?} from torrents {} and {}, keeping the latter",
                dest.display().to_string(),
                previous,
                hash
            ),
            FlattenWarning::PatternDeferred { hash } => {
                write!(f, "file list for torrent {} not available yet, deferring pattern", hash)
            }
            FlattenWarning::UnmatchedPattern { hash, show } => {
                write!(f, "pattern for show {:?} matched no files in torrent {}", show, hash)
            }
            FlattenWarning::UndeclaredSeason { hash, show, season } => write!(
                f,
                "torrent {} provides season {} of show {:?}, which is not declared",
                hash, season, show
            ),
        }
    }
}

/// Result of flattening a declaration.
#[derive(Debug, Clone, Default)]
pub struct Flattened {
    pub snapshot: FlatSnapshot,
    pub warnings: Vec<FlattenWarning>,
    /// Hashes with patterns waiting on a file listing.
    pub deferred: Vec<String>,
}

/// Liveness heuristic for torrents without an explicit archived flag.
pub fn heuristic_status(stats: Option<&TorrentStats>) -> TorrentStatus {
    let stats = match stats {
        Some(stats) => stats,
        None => return TorrentStatus::Checking,
    };
    let percent_done = match stats.percent_done {
        Some(p) => p,
        None => return TorrentStatus::Checking,
    };

    let seeders: i64 = stats.tracker_seeders.iter().map(|s| (*s).max(0)).sum();
    if percent_done < 1.0 || seeders <= MIN_SEEDERS || stats.upload_ratio < TARGET_RATIO {
        TorrentStatus::Started
    } else {
        TorrentStatus::Stopped
    }
}

/// Desired status of a torrent.
pub fn status_for(torrent: &Torrent, stats: Option<&TorrentStats>) -> TorrentStatus {
    match torrent.archived {
        Some(true) => TorrentStatus::Stopped,
        Some(false) => TorrentStatus::Started,
        None => heuristic_status(stats),
    }
}

/// Splits a listed file into the path below the top-level name and the text
/// patterns are matched against.
fn split_listed(path: &Path) -> (Option<PathBuf>, String) {
    let mut components = path.components();
    if components.clone().count() > 1 {
        components.next();
        let rest = components.as_path().to_path_buf();
        let display = rest.to_string_lossy().into_owned();
        (Some(rest), display)
    } else {
        (None, path.to_string_lossy().into_owned())
    }
}

/// Builds the desired snapshot for `db`.
pub fn flatten(db: &Database, view: &ClientView) -> Flattened {
    let mut out = Flattened::default();
    let mut owners: BTreeMap<PathBuf, String> = BTreeMap::new();

    for (hash, torrent) in &db.torrents {
        let location = db
            .directories
            .relative_to_media(&download_location(db, torrent));
        let status = status_for(torrent, view.stats.get(hash));
        let name = match view.name(hash) {
            Some(name) => SourceName::resolved(name),
            None => SourceName::pending(hash.as_str()),
        };

        let mut episodes: Vec<Episode> = Vec::new();
        for spec in &torrent.episodes {
            match spec {
                EpisodeSpec::Single(episode) => episodes.push(episode.clone()),
                EpisodeSpec::Pattern(pattern) => {
                    let files = match view.files.get(hash) {
                        Some(files) => files,
                        None => {
                            let warning = FlattenWarning::PatternDeferred { hash: hash.clone() };
                            warn!("{}", warning);
                            out.warnings.push(warning);
                            if !out.deferred.contains(hash) {
                                out.deferred.push(hash.clone());
                            }
                            continue;
                        }
                    };

                    let before = episodes.len();
                    for listed in files {
                        let (file, shown) = split_listed(listed);
                        if let Some(episode) = pattern.expand(&shown, file) {
                            episodes.push(episode);
                        } else {
                            debug!("Pattern for {:?} skips {:?}", pattern.show, shown);
                        }
                    }
                    if episodes.len() == before {
                        let warning = FlattenWarning::UnmatchedPattern {
                            hash: hash.clone(),
                            show: pattern.show.clone(),
                        };
                        warn!("{}", warning);
                        out.warnings.push(warning);
                    }
                }
            }
        }

        let mut entry = SnapshotEntry::new(torrent.source.clone(), location, status);
        for episode in episodes {
            let dest = db
                .show(&episode.show)
                .and_then(|show| link_destination(&db.directories, show, &episode));
            let dest = match dest {
                Some(dest) => dest,
                None => {
                    let warning = FlattenWarning::UndeclaredSeason {
                        hash: hash.clone(),
                        show: episode.show.clone(),
                        season: episode.season,
                    };
                    warn!("{}", warning);
                    out.warnings.push(warning);
                    continue;
                }
            };

            if let Some(previous) = owners.insert(dest.clone(), hash.clone()) {
                let warning = FlattenWarning::DuplicateDestination {
                    dest: dest.clone(),
                    previous: previous.clone(),
                    hash: hash.clone(),
                };
                warn!("{}", warning);
                out.warnings.push(warning);
                if previous != *hash {
                    if let Some(prev) = out.snapshot.torrents.get_mut(&previous) {
                        prev.links.remove(&dest);
                    }
                }
            }

            entry
                .links
                .insert(dest, LinkSource::new(name.clone(), episode.file.clone()));
        }

        out.snapshot.torrents.insert(hash.clone(), entry);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Normalizer, RawDatabase};

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn database(torrents: &str) -> Database {
        let yaml = format!(
            r#"
directories:
  media: /srv/anime
  in_progress: InProgress
shows:
  in_progress:
    - title: Foo
      seasons:
        - {{ year: 2019, season: winter }}
torrents:
{}
"#,
            torrents
        );
        Normalizer::new()
            .normalize(RawDatabase::from_yaml(&yaml).unwrap())
            .unwrap()
    }

    fn stats(percent: Option<f64>, seeders: Vec<i64>, ratio: f64) -> TorrentStats {
        TorrentStats {
            name: Some("Foo".to_string()),
            download_dir: None,
            percent_done: percent,
            tracker_seeders: seeders,
            upload_ratio: ratio,
        }
    }

    #[test]
    fn test_heuristic_status() {
        assert_eq!(heuristic_status(None), TorrentStatus::Checking);
        assert_eq!(
            heuristic_status(Some(&stats(None, vec![10], 5.0))),
            TorrentStatus::Checking
        );
        assert_eq!(
            heuristic_status(Some(&stats(Some(0.5), vec![10], 5.0))),
            TorrentStatus::Started
        );
        assert_eq!(
            heuristic_status(Some(&stats(Some(1.0), vec![1, -1], 5.0))),
            TorrentStatus::Started
        );
        assert_eq!(
            heuristic_status(Some(&stats(Some(1.0), vec![10], 1.5))),
            TorrentStatus::Started
        );
        assert_eq!(
            heuristic_status(Some(&stats(Some(1.0), vec![1, 1], 2.0))),
            TorrentStatus::Stopped
        );
    }

    #[test]
    fn test_flatten_single_episode() {
        let db = database(&format!(
            "  {}:\n    source: magnet:?x\n    episodes:\n      - show: Foo\n",
            HASH_A
        ));
        let flat = flatten(&db, &ClientView::default());

        let entry = &flat.snapshot.torrents[HASH_A];
        assert_eq!(entry.location, PathBuf::from(".Torrents/2019q1"));
        assert_eq!(entry.status, TorrentStatus::Checking);
        let (dest, source) = entry.links.iter().next().unwrap();
        assert_eq!(dest, &PathBuf::from("InProgress/Foo/Foo - 01"));
        assert_eq!(source.name, SourceName::pending(HASH_A));
        assert!(flat.warnings.is_empty());
    }

    #[test]
    fn test_flatten_uses_known_name_and_archived_flag() {
        let db = database(&format!(
            "  {}:\n    source: magnet:?x\n    archived: true\n    episodes:\n      - {{ show: Foo, file: Foo 01.mkv }}\n",
            HASH_A
        ));
        let mut view = ClientView::default();
        view.stats
            .insert(HASH_A.to_string(), stats(Some(0.2), vec![], 0.0));

        let flat = flatten(&db, &view);
        let entry = &flat.snapshot.torrents[HASH_A];
        assert_eq!(entry.status, TorrentStatus::Stopped);
        let source = &entry.links[&PathBuf::from("InProgress/Foo/Foo - 01")];
        assert_eq!(source.name, SourceName::resolved("Foo"));
        assert_eq!(source.file, Some(PathBuf::from("Foo 01.mkv")));
    }

    #[test]
    fn test_flatten_pattern_expands_files() {
        let db = database(&format!(
            "  {}:\n    source: magnet:?x\n    episodes:\n      - pattern: {{ show: Foo, regex: 'E(?P<episode>\\d+)\\.mkv$' }}\n",
            HASH_A
        ));

        let deferred = flatten(&db, &ClientView::default());
        assert_eq!(deferred.deferred, vec![HASH_A.to_string()]);
        assert!(deferred.snapshot.torrents[HASH_A].links.is_empty());

        let mut view = ClientView::default();
        view.files.insert(
            HASH_A.to_string(),
            vec![
                PathBuf::from("Foo/Foo E01.mkv"),
                PathBuf::from("Foo/Foo E02.mkv"),
                PathBuf::from("Foo/readme.txt"),
            ],
        );
        let flat = flatten(&db, &view);
        let links = &flat.snapshot.torrents[HASH_A].links;
        assert_eq!(links.len(), 2);
        assert_eq!(
            links[&PathBuf::from("InProgress/Foo/Foo - 02")].file,
            Some(PathBuf::from("Foo E02.mkv"))
        );
        assert!(flat.deferred.is_empty());
    }

    #[test]
    fn test_flatten_pattern_skipping_every_file_warns() {
        let db = database(&format!(
            "  {}:\n    source: magnet:?x\n    episodes:\n      - pattern: {{ show: Foo, regex: 'E(?P<episode>\\d+)\\.mkv$' }}\n",
            HASH_A
        ));
        let mut view = ClientView::default();
        view.files.insert(
            HASH_A.to_string(),
            vec![PathBuf::from("Foo/readme.txt"), PathBuf::from("Foo/Sub/cover.jpg")],
        );

        let flat = flatten(&db, &view);
        assert!(flat.snapshot.torrents[HASH_A].links.is_empty());
        assert!(flat.deferred.is_empty());
        assert!(matches!(
            flat.warnings.as_slice(),
            [FlattenWarning::UnmatchedPattern { show, .. }] if show == "Foo"
        ));
    }

    #[test]
    fn test_flatten_duplicate_destination_last_wins() {
        let db = database(&format!(
            "  {}:\n    source: a\n    episodes:\n      - show: Foo\n  {}:\n    source: b\n    episodes:\n      - show: Foo\n",
            HASH_A, HASH_B
        ));
        let flat = flatten(&db, &ClientView::default());

        assert!(flat.snapshot.torrents[HASH_A].links.is_empty());
        assert_eq!(flat.snapshot.torrents[HASH_B].links.len(), 1);
        assert!(matches!(
            flat.warnings.as_slice(),
            [FlattenWarning::DuplicateDestination { .. }]
        ));
    }

    #[test]
    fn test_split_listed() {
        assert_eq!(
            split_listed(Path::new("Foo/Sub/01.mkv")),
            (Some(PathBuf::from("Sub/01.mkv")), "Sub/01.mkv".to_string())
        );
        assert_eq!(
            split_listed(Path::new("Foo 01.mkv")),
            (None, "Foo 01.mkv".to_string())
        );
    }
}
