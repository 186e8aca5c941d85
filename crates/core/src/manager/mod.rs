//! One reconciliation cycle, end to end: load the declaration and the cache,
//! ask the client what it knows, flatten, diff, apply, and persist.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database::{load_database, Database, DatabaseError, Normalizer};
use crate::error::ErrorClass;
use crate::filesystem::FileSystem;
use crate::reconciler::{PlannedAction, ReconcileError, ReconcileOptions, Reconciler};
use crate::snapshot::{diff, flatten, CacheError, CacheStore, ClientView, FlatSnapshot};
use crate::torrent_client::{TorrentClient, TorrentClientError};

/// Why a cycle did not complete.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("invalid declaration: {0}")]
    Database(#[from] DatabaseError),

    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),

    #[error("could not query the torrent client: {0}")]
    Client(#[source] TorrentClientError),

    #[error(transparent)]
    Apply(#[from] ReconcileError),

    #[error("{apply}; progress could not be saved: {source}")]
    Unsaved {
        apply: ReconcileError,
        #[source]
        source: CacheError,
    },
}

impl CycleError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Database(e) => e.class(),
            Self::Cache(e) => e.class(),
            Self::Client(e) => e.class(),
            Self::Apply(e) => e.class(),
            Self::Unsaved { source, .. } => source.class(),
        }
    }

    /// Whether the process must stop rather than wait for the next cycle.
    pub fn is_process_fatal(&self) -> bool {
        matches!(self, Self::Cache(_) | Self::Unsaved { .. })
    }
}

/// What a completed cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// The diff, one line per action.
    pub planned: Vec<String>,
    /// Side effects performed, or planned in a dry run.
    pub performed: Vec<PlannedAction>,
    /// Flatten and apply warnings.
    pub warnings: Vec<String>,
    /// Torrents whose patterns wait for a file listing.
    pub deferred: Vec<String>,
    pub dry_run: bool,
}

impl CycleReport {
    /// Whether another cycle is needed even without a declaration change.
    pub fn needs_rerun(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Whether the cycle found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.performed.is_empty()
    }
}

/// Owns the collaborators of the cycle. `reload` takes `&mut self`, so one
/// manager never runs two cycles at once.
pub struct LibraryManager {
    database_path: PathBuf,
    normalizer: Normalizer,
    cache: CacheStore,
    client: Arc<dyn TorrentClient>,
    fs: Arc<dyn FileSystem>,
    options: ReconcileOptions,
}

impl LibraryManager {
    pub fn new(
        database_path: impl Into<PathBuf>,
        cache: CacheStore,
        client: Arc<dyn TorrentClient>,
        fs: Arc<dyn FileSystem>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            database_path: database_path.into(),
            normalizer: Normalizer::new(),
            cache,
            client,
            fs,
            options,
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Runs one cycle.
    ///
    /// A declaration error leaves the cache untouched. Once apply has
    /// started, whatever it achieved is saved, even when it fails part way.
    pub async fn reload(&mut self) -> Result<CycleReport, CycleError> {
        let db = load_database(&self.database_path, &self.normalizer).await?;
        debug!(
            "Loaded declaration with {} shows and {} torrents",
            db.shows.len(),
            db.torrents.len()
        );
        let previous = self.cache.load().await?;

        let view = self.client_view(&db, &previous).await?;
        let flattened = flatten(&db, &view);

        let actions = diff(&previous, &flattened.snapshot);
        let mut report = CycleReport {
            planned: actions.describe(),
            warnings: flattened.warnings.iter().map(|w| w.to_string()).collect(),
            deferred: flattened.deferred.clone(),
            dry_run: self.options.dry_run,
            ..CycleReport::default()
        };

        let reconciler = Reconciler::new(
            self.client.clone(),
            self.fs.clone(),
            db.directories.clone(),
            self.options.clone(),
        );
        let mut working = previous;
        let result = reconciler.apply(&actions, &mut working).await;

        if !self.options.dry_run {
            if let Err(source) = self.cache.save(&working).await {
                return Err(match result {
                    Ok(_) => CycleError::Cache(source),
                    Err(apply) => CycleError::Unsaved { apply, source },
                });
            }
        }

        let applied = result?;
        for warning in &applied.warnings {
            report.warnings.push(warning.to_string());
        }
        report.performed = applied.performed;

        info!(
            "Cycle {}: {} actions, {} warnings, {} deferred",
            if report.dry_run { "planned" } else { "complete" },
            report.performed.len(),
            report.warnings.len(),
            report.deferred.len()
        );
        if !report.deferred.is_empty() {
            warn!("Patterns deferred for {:?}", report.deferred);
        }
        Ok(report)
    }

    /// Stats for every declared or cached torrent, plus file listings for
    /// torrents with patterns.
    async fn client_view(
        &self,
        db: &Database,
        previous: &FlatSnapshot,
    ) -> Result<ClientView, CycleError> {
        let hashes: Vec<String> = db
            .torrents
            .keys()
            .chain(previous.torrents.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let patterned: Vec<String> = db
            .torrents
            .values()
            .filter(|t| t.has_patterns())
            .map(|t| t.hash.clone())
            .collect();

        let stats = self.client.stats(&hashes).await.map_err(CycleError::Client)?;
        let files = if patterned.is_empty() {
            Default::default()
        } else {
            self.client
                .list_files(&patterned)
                .await
                .map_err(CycleError::Client)?
        };
        Ok(ClientView { stats, files })
    }
}
