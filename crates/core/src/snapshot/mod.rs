//! Flat snapshots: the desired state projected from the declaration, the
//! applied state persisted in the cache, and the diff between the two.

mod cache;
mod diff;
mod flatten;
mod types;

pub use cache::{CacheError, CacheStore, CACHE_FILE_NAME};
pub use diff::{
    diff, ActionBundle, AddLink, AddTorrent, LinkActions, Relocate, RemoveLink, SourceChange,
    StatusChange, TorrentActions,
};
pub use flatten::{
    flatten, heuristic_status, status_for, ClientView, FlattenWarning, Flattened, MIN_SEEDERS,
    TARGET_RATIO,
};
pub use types::*;
