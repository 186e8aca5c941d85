pub mod config;
pub mod database;
pub mod error;
pub mod filesystem;
pub mod manager;
pub mod paths;
pub mod reconciler;
pub mod snapshot;
pub mod testing;
pub mod torrent_client;

pub use config::{
    load_config, load_config_from_str, load_config_or_default, validate_config, ClientBackend,
    Config, ConfigError, SanitizedConfig,
};
pub use database::{load_database, Database, DatabaseError, Directories, Normalizer};
pub use error::ErrorClass;
pub use filesystem::{FileSystem, FsError, LocalFileSystem};
pub use manager::{CycleError, CycleReport, LibraryManager};
pub use reconciler::{ApplyReport, PlannedAction, ReconcileError, ReconcileOptions, Reconciler};
pub use snapshot::{diff, flatten, ActionBundle, CacheError, CacheStore, FlatSnapshot};
pub use torrent_client::{create_torrent_client, TorrentClient, TorrentClientError};
