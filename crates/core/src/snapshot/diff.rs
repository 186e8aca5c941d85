//! Set algebra between two snapshots.
//!
//! The resulting [`ActionBundle`] is ordered the way the reconciler applies
//! it: link removals, torrent removals, torrent additions, re-sources,
//! relocations, status changes, link additions.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::types::{FlatSnapshot, LinkSource, SnapshotEntry, TorrentStatus};

/// Remove the link at `dest` owned by `hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveLink {
    pub hash: String,
    /// Destination stem, relative to the media root when under it.
    pub dest: PathBuf,
}

/// Create a link at `dest` pointing into torrent `hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddLink {
    pub hash: String,
    pub dest: PathBuf,
    pub source: LinkSource,
}

impl fmt::Display for AddLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.source.destination(&self.dest).display(),
            self.source
        )
    }
}

/// Add a torrent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddTorrent {
    pub hash: String,
    pub source: String,
    pub location: PathBuf,
    pub status: TorrentStatus,
}

impl AddTorrent {
    pub fn started(&self) -> bool {
        self.status.is_started()
    }
}

/// Point an existing torrent at a new source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceChange {
    pub hash: String,
    pub source: String,
}

/// Move a torrent's data to a new download location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relocate {
    pub hash: String,
    pub location: PathBuf,
}

/// Start or stop a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub hash: String,
    pub status: TorrentStatus,
}

impl StatusChange {
    pub fn started(&self) -> bool {
        self.status.is_started()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkActions {
    pub remove: Vec<RemoveLink>,
    pub add: Vec<AddLink>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TorrentActions {
    pub remove: Vec<String>,
    pub add: Vec<AddTorrent>,
    pub source: Vec<SourceChange>,
    pub relocate: Vec<Relocate>,
    pub status: Vec<StatusChange>,
}

/// Everything needed to turn one snapshot into another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionBundle {
    pub links: LinkActions,
    pub torrents: TorrentActions,
}

impl ActionBundle {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of actions.
    pub fn len(&self) -> usize {
        self.links.remove.len()
            + self.links.add.len()
            + self.torrents.remove.len()
            + self.torrents.add.len()
            + self.torrents.source.len()
            + self.torrents.relocate.len()
            + self.torrents.status.len()
    }

    /// One line per action, in application order.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.len());
        for link in &self.links.remove {
            lines.push(format!("remove link {}", link.dest.display()));
        }
        for hash in &self.torrents.remove {
            lines.push(format!("remove torrent {}", hash));
        }
        for torrent in &self.torrents.add {
            lines.push(format!(
                "add torrent {} to {} from {} ({})",
                torrent.hash,
                torrent.location.display(),
                torrent.source,
                torrent.status
            ));
        }
        for change in &self.torrents.source {
            lines.push(format!("re-source torrent {} from {}", change.hash, change.source));
        }
        for relocate in &self.torrents.relocate {
            lines.push(format!(
                "move torrent {} to {}",
                relocate.hash,
                relocate.location.display()
            ));
        }
        for change in &self.torrents.status {
            lines.push(format!(
                "{} torrent {}",
                if change.started() { "start" } else { "stop" },
                change.hash
            ));
        }
        for link in &self.links.add {
            lines.push(format!("add link {}", link));
        }
        lines
    }
}

fn add_all_links(hash: &str, entry: &SnapshotEntry, out: &mut LinkActions) {
    for (dest, source) in &entry.links {
        out.add.push(AddLink {
            hash: hash.to_string(),
            dest: dest.clone(),
            source: source.clone(),
        });
    }
}

fn remove_all_links(hash: &str, entry: &SnapshotEntry, out: &mut LinkActions) {
    for dest in entry.links.keys() {
        out.remove.push(RemoveLink {
            hash: hash.to_string(),
            dest: dest.clone(),
        });
    }
}

/// Computes the actions turning `old` into `new`.
///
/// A link whose destination survives but whose source changes, including
/// through a relocation of its torrent, is removed and re-added rather than
/// overwritten.
pub fn diff(old: &FlatSnapshot, new: &FlatSnapshot) -> ActionBundle {
    let mut actions = ActionBundle::default();

    for (hash, entry) in &old.torrents {
        if !new.torrents.contains_key(hash) {
            remove_all_links(hash, entry, &mut actions.links);
            actions.torrents.remove.push(hash.clone());
        }
    }

    for (hash, wanted) in &new.torrents {
        let current = match old.torrents.get(hash) {
            Some(current) => current,
            None => {
                actions.torrents.add.push(AddTorrent {
                    hash: hash.clone(),
                    source: wanted.source.clone(),
                    location: wanted.location.clone(),
                    status: wanted.status,
                });
                add_all_links(hash, wanted, &mut actions.links);
                continue;
            }
        };

        if current.source != wanted.source {
            actions.torrents.source.push(SourceChange {
                hash: hash.clone(),
                source: wanted.source.clone(),
            });
        }

        let relocated = current.location != wanted.location;
        if relocated {
            actions.torrents.relocate.push(Relocate {
                hash: hash.clone(),
                location: wanted.location.clone(),
            });
        }

        if current.status != wanted.status {
            actions.torrents.status.push(StatusChange {
                hash: hash.clone(),
                status: wanted.status,
            });
        }

        for (dest, had) in &current.links {
            let keep = match wanted.links.get(dest) {
                Some(want) => !relocated && had.same_target(want),
                None => false,
            };
            if !keep {
                actions.links.remove.push(RemoveLink {
                    hash: hash.clone(),
                    dest: dest.clone(),
                });
            }
        }
        for (dest, want) in &wanted.links {
            let present = match current.links.get(dest) {
                Some(had) => !relocated && had.same_target(want),
                None => false,
            };
            if !present {
                actions.links.add.push(AddLink {
                    hash: hash.clone(),
                    dest: dest.clone(),
                    source: want.clone(),
                });
            }
        }
    }

    // A destination can move between torrents; removals always precede adds
    // when applied, so ordering inside each list only needs to be stable.
    actions
        .links
        .remove
        .sort_by(|a, b| (&a.hash, &a.dest).cmp(&(&b.hash, &b.dest)));
    actions
        .links
        .add
        .sort_by(|a, b| (&a.hash, &a.dest).cmp(&(&b.hash, &b.dest)));

    actions
}
