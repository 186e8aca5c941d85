//! Applies action bundles through the torrent client and the filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::database::Directories;
use crate::filesystem::{Absence, FileSystem, Trash};
use crate::paths::relative_target;
use crate::snapshot::{
    diff, ActionBundle, AddLink, FlatSnapshot, LinkSource, RemoveLink, SnapshotEntry,
};
use crate::torrent_client::{AddTorrentRequest, TorrentClient, TorrentClientError};

use super::types::{ApplyReport, PlannedAction, ReconcileError, ReconcileOptions};

/// Drives the torrent client and the filesystem towards a desired snapshot.
pub struct Reconciler {
    client: Arc<dyn TorrentClient>,
    fs: Arc<dyn FileSystem>,
    directories: Directories,
    options: ReconcileOptions,
}

/// Names resolved so far in one apply.
type NameCache = HashMap<String, String>;

impl Reconciler {
    pub fn new(
        client: Arc<dyn TorrentClient>,
        fs: Arc<dyn FileSystem>,
        directories: Directories,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            client,
            fs,
            directories,
            options,
        }
    }

    fn trash_bin(&self) -> Option<Trash> {
        self.options
            .trash
            .then(|| Trash::new(&self.directories.trash, &self.directories.media))
    }

    /// Diffs `previous` against `desired` and applies the result.
    ///
    /// The returned snapshot reflects every side effect that succeeded, even
    /// when the apply fails part way.
    pub async fn reconcile(
        &self,
        desired: &FlatSnapshot,
        previous: FlatSnapshot,
    ) -> (FlatSnapshot, Result<ApplyReport, ReconcileError>) {
        let actions = diff(&previous, desired);
        let mut working = previous;
        let result = self.apply(&actions, &mut working).await;
        (working, result)
    }

    /// Applies `actions` phase by phase, recording each success in
    /// `snapshot`. A dry run leaves `snapshot` untouched.
    pub async fn apply(
        &self,
        actions: &ActionBundle,
        snapshot: &mut FlatSnapshot,
    ) -> Result<ApplyReport, ReconcileError> {
        let mut report = ApplyReport::default();
        let mut names = NameCache::new();
        let trash = self.trash_bin();

        for remove in &actions.links.remove {
            self.remove_link(remove, snapshot, trash.as_ref(), &mut report)
                .await?;
        }

        for hash in &actions.torrents.remove {
            self.remove_torrent(hash, snapshot, trash.as_ref(), &mut report)
                .await?;
        }

        for add in &actions.torrents.add {
            let location = self.directories.resolve(&add.location);
            report.performed.push(PlannedAction::AddTorrent {
                hash: add.hash.clone(),
                source: add.source.clone(),
                location: location.clone(),
                started: add.started(),
            });
            if self.options.dry_run {
                continue;
            }
            debug!("Adding torrent {} to {:?}", add.hash, location);
            let request = AddTorrentRequest::new(&add.hash, &add.source, location)
                .with_started(add.started());
            let added = self
                .client
                .add(request)
                .await
                .map_err(|e| ReconcileError::client(format!("add torrent {}", add.hash), e))?;
            if let Some(reported) = added.hash.filter(|h| !h.eq_ignore_ascii_case(&add.hash)) {
                warn!(
                    "Torrent declared as {} was added by the client as {}",
                    add.hash, reported
                );
            }
            snapshot.torrents.insert(
                add.hash.clone(),
                SnapshotEntry::new(&add.source, &add.location, add.status),
            );
        }

        for change in &actions.torrents.source {
            report.performed.push(PlannedAction::SetSource {
                hash: change.hash.clone(),
                source: change.source.clone(),
            });
            if self.options.dry_run {
                continue;
            }
            debug!("Re-sourcing torrent {}", change.hash);
            match self.client.set_source(&change.hash, &change.source).await {
                Ok(()) => {}
                Err(e) if !e.class().aborts_cycle() => {
                    warn!("Cannot re-source torrent {}: {}", change.hash, e);
                    report
                        .warnings
                        .push(ReconcileError::client(format!("re-source {}", change.hash), e));
                }
                Err(e) => {
                    return Err(ReconcileError::client(
                        format!("re-source {}", change.hash),
                        e,
                    ))
                }
            }
            entry_mut(snapshot, &change.hash)?.source = change.source.clone();
        }

        for relocate in &actions.torrents.relocate {
            let location = self.directories.resolve(&relocate.location);
            report.performed.push(PlannedAction::Relocate {
                hash: relocate.hash.clone(),
                location: location.clone(),
            });
            if self.options.dry_run {
                continue;
            }
            debug!("Moving torrent {} to {:?}", relocate.hash, location);
            self.client
                .move_to(&relocate.hash, &location)
                .await
                .map_err(|e| ReconcileError::client(format!("move {}", relocate.hash), e))?;
            entry_mut(snapshot, &relocate.hash)?.location = relocate.location.clone();
        }

        for change in &actions.torrents.status {
            report.performed.push(PlannedAction::SetStatus {
                hash: change.hash.clone(),
                started: change.started(),
            });
            if self.options.dry_run {
                continue;
            }
            debug!("Setting torrent {} to {}", change.hash, change.status);
            self.client
                .set_status(&change.hash, change.started())
                .await
                .map_err(|e| {
                    ReconcileError::client(format!("set status of {}", change.hash), e)
                })?;
            entry_mut(snapshot, &change.hash)?.status = change.status;
        }

        for add in &actions.links.add {
            self.add_link(add, actions, snapshot, trash.as_ref(), &mut names, &mut report)
                .await?;
        }

        self.cleanup(&mut report).await?;

        info!(
            "{} {} actions with {} warnings",
            if self.options.dry_run { "Planned" } else { "Applied" },
            report.performed.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    async fn remove_link(
        &self,
        remove: &RemoveLink,
        snapshot: &mut FlatSnapshot,
        trash: Option<&Trash>,
        report: &mut ApplyReport,
    ) -> Result<(), ReconcileError> {
        let source = snapshot
            .torrents
            .get(&remove.hash)
            .and_then(|entry| entry.links.get(&remove.dest))
            .ok_or_else(|| ReconcileError::UnknownTorrent {
                hash: remove.hash.clone(),
            })?;
        let path = self
            .directories
            .resolve(&source.destination(&remove.dest));

        if self.options.dry_run {
            report.performed.push(PlannedAction::RemoveLink { path });
            return Ok(());
        }

        debug!("Removing link {:?}", path);
        if self.fs.ensure_absent(&path, trash).await? != Absence::Missing {
            report.performed.push(PlannedAction::RemoveLink { path });
        }
        if let Some(entry) = snapshot.torrents.get_mut(&remove.hash) {
            entry.links.remove(&remove.dest);
        }
        Ok(())
    }

    async fn remove_torrent(
        &self,
        hash: &str,
        snapshot: &mut FlatSnapshot,
        trash: Option<&Trash>,
        report: &mut ApplyReport,
    ) -> Result<(), ReconcileError> {
        let stats = self
            .client
            .stats(&[hash.to_string()])
            .await
            .map_err(|e| ReconcileError::client(format!("inspect {}", hash), e))?;

        // The client knows best where the data lives; the snapshot is the
        // fallback for torrents it has already forgotten.
        let data = stats
            .get(hash)
            .and_then(|s| s.content_path())
            .or_else(|| {
                let entry = snapshot.torrents.get(hash)?;
                let name = entry.known_name()?;
                Some(self.directories.resolve(&entry.location).join(name))
            });

        if let Some(path) = data {
            if self.options.dry_run {
                report.performed.push(PlannedAction::TrashData {
                    hash: hash.to_string(),
                    path,
                });
            } else {
                debug!("Clearing data of torrent {} at {:?}", hash, path);
                if self.fs.trash(&path, trash).await? != Absence::Missing {
                    report.performed.push(PlannedAction::TrashData {
                        hash: hash.to_string(),
                        path,
                    });
                }
            }
        } else {
            debug!("No known data for torrent {}", hash);
        }

        report.performed.push(PlannedAction::RemoveTorrent {
            hash: hash.to_string(),
        });
        if self.options.dry_run {
            return Ok(());
        }
        debug!("Removing torrent {}", hash);
        self.client
            .remove(&[hash.to_string()])
            .await
            .map_err(|e| ReconcileError::client(format!("remove torrent {}", hash), e))?;
        snapshot.torrents.remove(hash);
        Ok(())
    }

    async fn add_link(
        &self,
        add: &AddLink,
        actions: &ActionBundle,
        snapshot: &mut FlatSnapshot,
        trash: Option<&Trash>,
        names: &mut NameCache,
        report: &mut ApplyReport,
    ) -> Result<(), ReconcileError> {
        let location = match target_location(&add.hash, actions, snapshot) {
            Some(location) => self.directories.resolve(&location),
            None => {
                return Err(ReconcileError::UnknownTorrent {
                    hash: add.hash.clone(),
                })
            }
        };

        let source = match add.source.name.as_resolved() {
            Some(_) => add.source.clone(),
            None => match self.resolve_name(&add.hash, names).await? {
                Some(name) => add.source.resolve(&name),
                None => add.source.clone(),
            },
        };

        let path = self.directories.resolve(&source.destination(&add.dest));
        let target = source
            .path_under(&location)
            .unwrap_or_else(|| placeholder_target(&location, &source));
        let target = relative_target(&path, &target);

        report.performed.push(PlannedAction::AddLink {
            path: path.clone(),
            target: target.clone(),
        });
        if self.options.dry_run {
            return Ok(());
        }

        debug!("Linking {:?} -> {:?}", path, target);
        self.fs.ensure_absent(&path, trash).await?;
        self.fs.symlink(&path, &target).await?;
        entry_mut(snapshot, &add.hash)?
            .links
            .insert(add.dest.clone(), source);
        Ok(())
    }

    /// Polls the client for a torrent's top-level name.
    ///
    /// Dry runs ask once and settle for `None`; real runs retry and then
    /// fail with [`ReconcileError::MetadataUnavailable`].
    async fn resolve_name(
        &self,
        hash: &str,
        names: &mut NameCache,
    ) -> Result<Option<String>, ReconcileError> {
        if let Some(name) = names.get(hash) {
            return Ok(Some(name.clone()));
        }

        let attempts = if self.options.dry_run {
            1
        } else {
            self.options.metadata_retries.max(1)
        };

        for attempt in 1..=attempts {
            match self.client.resolve_names(&[hash.to_string()]).await {
                Ok(resolved) => {
                    if let Some(name) = resolved.get(hash) {
                        names.insert(hash.to_string(), name.clone());
                        return Ok(Some(name.clone()));
                    }
                }
                Err(TorrentClientError::NotReady(_)) => {}
                Err(e) => {
                    return Err(ReconcileError::client(format!("resolve name of {}", hash), e))
                }
            }
            if attempt < attempts {
                debug!(
                    "Waiting for metadata of {} (attempt {}/{})",
                    hash, attempt, attempts
                );
                tokio::time::sleep(self.options.metadata_retry_delay).await;
            }
        }

        if self.options.dry_run {
            Ok(None)
        } else {
            Err(ReconcileError::MetadataUnavailable {
                hash: hash.to_string(),
                attempts,
            })
        }
    }

    /// Prunes empty directories left behind in every managed directory.
    async fn cleanup(&self, report: &mut ApplyReport) -> Result<(), ReconcileError> {
        let excluding = vec![self.directories.media.clone()];
        for dir in self.directories.managed() {
            let removed = self
                .fs
                .remove_empty_tree(dir, &excluding, self.options.dry_run)
                .await?;
            report.performed.extend(
                removed
                    .into_iter()
                    .map(|path| PlannedAction::RemoveDirectory { path }),
            );
        }
        Ok(())
    }
}

fn entry_mut<'a>(
    snapshot: &'a mut FlatSnapshot,
    hash: &str,
) -> Result<&'a mut SnapshotEntry, ReconcileError> {
    snapshot
        .torrents
        .get_mut(hash)
        .ok_or_else(|| ReconcileError::UnknownTorrent {
            hash: hash.to_string(),
        })
}

/// Where a torrent's data will be once this bundle is applied.
fn target_location(hash: &str, actions: &ActionBundle, snapshot: &FlatSnapshot) -> Option<PathBuf> {
    actions
        .torrents
        .relocate
        .iter()
        .find(|r| r.hash == hash)
        .map(|r| r.location.clone())
        .or_else(|| {
            actions
                .torrents
                .add
                .iter()
                .find(|a| a.hash == hash)
                .map(|a| a.location.clone())
        })
        .or_else(|| snapshot.torrents.get(hash).map(|e| e.location.clone()))
}

/// Target shown for a link whose name is still pending.
fn placeholder_target(location: &Path, source: &LinkSource) -> PathBuf {
    let mut path = location.join(source.name.to_string());
    if let Some(file) = &source.file {
        path.push(file);
    }
    path
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::filesystem::LocalFileSystem;
    use crate::snapshot::{SourceName, TorrentStatus};
    use crate::testing::MockTorrentClient;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    const HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    struct Fixture {
        _dir: TempDir,
        dirs: Directories,
        client: Arc<MockTorrentClient>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let dirs = Directories::with_media(dir.path());
            Self {
                _dir: dir,
                dirs,
                client: Arc::new(MockTorrentClient::new()),
            }
        }

        fn reconciler(&self, options: ReconcileOptions) -> Reconciler {
            Reconciler::new(
                self.client.clone(),
                Arc::new(LocalFileSystem::new()),
                self.dirs.clone(),
                options,
            )
        }
    }

    fn fast() -> ReconcileOptions {
        ReconcileOptions {
            metadata_retries: 3,
            metadata_retry_delay: Duration::from_millis(1),
            ..ReconcileOptions::default()
        }
    }

    fn desired() -> FlatSnapshot {
        let mut entry = SnapshotEntry::new("magnet:?x", ".Torrents/2019q1", TorrentStatus::Started);
        entry.links.insert(
            PathBuf::from("InProgress/Foo/Foo - 01"),
            LinkSource::new(SourceName::pending(HASH), Some(PathBuf::from("01.mkv"))),
        );
        let mut snapshot = FlatSnapshot::empty();
        snapshot.torrents.insert(HASH.to_string(), entry);
        snapshot
    }

    #[tokio::test]
    async fn test_adds_torrent_and_relative_link() {
        let fx = Fixture::new();
        fx.client.set_name(HASH, "Foo").await;
        let reconciler = fx.reconciler(fast());

        let (snapshot, result) = reconciler.reconcile(&desired(), FlatSnapshot::empty()).await;
        let report = result.unwrap();

        let link = fx.dirs.media.join("InProgress/Foo/Foo - 01.mkv");
        assert_eq!(
            tokio::fs::read_link(&link).await.unwrap(),
            PathBuf::from("../../.Torrents/2019q1/Foo/01.mkv")
        );
        assert!(report.performed.iter().any(|a| matches!(
            a,
            PlannedAction::AddTorrent { started: true, .. }
        )));

        let entry = &snapshot.torrents[HASH];
        let source = &entry.links[Path::new("InProgress/Foo/Foo - 01")];
        assert_eq!(source.name, SourceName::resolved("Foo"));
        assert!(snapshot.equivalent(&desired()));
    }

    #[tokio::test]
    async fn test_metadata_wait_is_bounded() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(fast());

        let (snapshot, result) = reconciler.reconcile(&desired(), FlatSnapshot::empty()).await;
        match result {
            Err(ReconcileError::MetadataUnavailable { hash, attempts }) => {
                assert_eq!(hash, HASH);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected metadata error, got {:?}", other),
        }
        // The torrent add already happened and must be remembered.
        assert!(snapshot.torrents[HASH].links.is_empty());
        assert_eq!(fx.client.added().await.len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_arrives_after_polling() {
        let fx = Fixture::new();
        fx.client.set_name(HASH, "Foo").await;
        fx.client.delay_metadata(HASH, 2).await;
        let reconciler = fx.reconciler(fast());

        let (_, result) = reconciler.reconcile(&desired(), FlatSnapshot::empty()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(ReconcileOptions {
            dry_run: true,
            ..fast()
        });

        let (snapshot, result) = reconciler.reconcile(&desired(), FlatSnapshot::empty()).await;
        let report = result.unwrap();

        assert!(snapshot.is_empty());
        assert!(fx.client.added().await.is_empty());
        assert!(!fx.dirs.in_progress.exists());
        let described: Vec<String> = report.performed.iter().map(|a| a.to_string()).collect();
        assert!(described[0].starts_with("add torrent"));
        assert!(described[1].contains("Foo - 01.mkv"));
        assert!(described[1].contains(&format!("$NAME:{}$/01.mkv", HASH)));
    }

    #[tokio::test]
    async fn test_removal_trashes_data_then_prunes() {
        let fx = Fixture::new();
        fx.client.set_name(HASH, "Foo").await;
        let reconciler = fx.reconciler(fast());
        let (applied, result) = reconciler.reconcile(&desired(), FlatSnapshot::empty()).await;
        result.unwrap();

        let data = fx.dirs.torrents.join("2019q1/Foo/01.mkv");
        tokio::fs::create_dir_all(data.parent().unwrap()).await.unwrap();
        tokio::fs::write(&data, b"video").await.unwrap();

        let (snapshot, result) = reconciler.reconcile(&FlatSnapshot::empty(), applied).await;
        let report = result.unwrap();

        assert!(snapshot.is_empty());
        assert!(!fx.dirs.in_progress.exists());
        assert!(!data.exists());
        assert!(fx.client.removed().await.contains(&HASH.to_string()));

        let kinds: Vec<&PlannedAction> = report
            .performed
            .iter()
            .filter(|a| !matches!(a, PlannedAction::RemoveDirectory { .. }))
            .collect();
        assert!(matches!(kinds[0], PlannedAction::RemoveLink { .. }));
        assert!(matches!(kinds[1], PlannedAction::TrashData { .. }));
        assert!(matches!(kinds[2], PlannedAction::RemoveTorrent { .. }));

        // Trashed data survives under the trash directory.
        let mut buckets = tokio::fs::read_dir(&fx.dirs.trash).await.unwrap();
        let bucket = buckets.next_entry().await.unwrap().unwrap().path();
        assert!(bucket.join(".Torrents/2019q1/Foo/01.mkv").exists());
    }

    #[tokio::test]
    async fn test_unsupported_resource_is_a_warning() {
        let fx = Fixture::new();
        fx.client.set_name(HASH, "Foo").await;
        let reconciler = fx.reconciler(fast());
        let (applied, result) = reconciler.reconcile(&desired(), FlatSnapshot::empty()).await;
        result.unwrap();

        let mut wanted = applied.clone();
        wanted.torrents.get_mut(HASH).unwrap().source = "magnet:?y".to_string();
        fx.client.refuse_set_source(true).await;

        let (snapshot, result) = reconciler.reconcile(&wanted, applied).await;
        let report = result.unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].class(), ErrorClass::Warning);
        assert_eq!(snapshot.torrents[HASH].source, "magnet:?y");
    }

    #[tokio::test]
    async fn test_client_failure_keeps_partial_progress() {
        let fx = Fixture::new();
        fx.client.set_name(HASH, "Foo").await;
        let reconciler = fx.reconciler(fast());
        let (applied, result) = reconciler.reconcile(&desired(), FlatSnapshot::empty()).await;
        result.unwrap();

        let mut wanted = applied.clone();
        wanted.torrents.get_mut(HASH).unwrap().status = TorrentStatus::Stopped;
        wanted.torrents.get_mut(HASH).unwrap().location = PathBuf::from(".Torrents/2020q2");
        fx.client
            .fail_next(TorrentClientError::ConnectionFailed("down".into()))
            .await;

        let (snapshot, result) = reconciler.reconcile(&wanted, applied.clone()).await;
        let err = result.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Retryable);
        // Links were removed before the move failed.
        assert!(snapshot.torrents[HASH].links.is_empty());
        assert_eq!(snapshot.torrents[HASH].location, applied.torrents[HASH].location);
    }

    #[tokio::test]
    async fn test_change_and_revert_restores_the_library() {
        let fx = Fixture::new();
        fx.client.set_name(HASH, "Foo").await;
        let reconciler = fx.reconciler(fast());
        let a = desired();
        let (applied, result) = reconciler.reconcile(&a, FlatSnapshot::empty()).await;
        result.unwrap();

        let mut b = a.clone();
        let entry = b.torrents.get_mut(HASH).unwrap();
        entry.location = PathBuf::from(".Torrents/2020q2");
        entry.status = TorrentStatus::Stopped;
        let source = entry
            .links
            .remove(Path::new("InProgress/Foo/Foo - 01"))
            .unwrap();
        entry
            .links
            .insert(PathBuf::from("Archived/Foo/Foo - 02"), source);

        let (changed, result) = reconciler.reconcile(&b, applied).await;
        result.unwrap();
        assert!(changed.equivalent(&b));
        assert_eq!(
            tokio::fs::read_link(fx.dirs.media.join("Archived/Foo/Foo - 02.mkv"))
                .await
                .unwrap(),
            PathBuf::from("../../.Torrents/2020q2/Foo/01.mkv")
        );
        assert!(tokio::fs::symlink_metadata(fx.dirs.media.join("InProgress/Foo/Foo - 01.mkv"))
            .await
            .is_err());

        let (reverted, result) = reconciler.reconcile(&a, changed).await;
        result.unwrap();
        assert!(reverted.equivalent(&a));
        assert_eq!(
            tokio::fs::read_link(fx.dirs.media.join("InProgress/Foo/Foo - 01.mkv"))
                .await
                .unwrap(),
            PathBuf::from("../../.Torrents/2019q1/Foo/01.mkv")
        );
        assert!(!fx.dirs.media.join("Archived/Foo").exists());

        let torrent = fx.client.torrent(HASH).await.unwrap();
        assert!(torrent.started);
        assert_eq!(torrent.location, fx.dirs.torrents.join("2019q1"));
    }

    #[tokio::test]
    async fn test_real_file_in_the_way_is_trashed() {
        let fx = Fixture::new();
        fx.client.set_name(HASH, "Foo").await;
        let squatter = fx.dirs.media.join("InProgress/Foo/Foo - 01.mkv");
        tokio::fs::create_dir_all(squatter.parent().unwrap()).await.unwrap();
        tokio::fs::write(&squatter, b"keep me").await.unwrap();

        let reconciler = fx.reconciler(fast());
        let (_, result) = reconciler.reconcile(&desired(), FlatSnapshot::empty()).await;
        result.unwrap();

        let meta = tokio::fs::symlink_metadata(&squatter).await.unwrap();
        assert!(meta.file_type().is_symlink());
        let mut buckets = tokio::fs::read_dir(&fx.dirs.trash).await.unwrap();
        let bucket = buckets.next_entry().await.unwrap().unwrap().path();
        assert_eq!(
            tokio::fs::read(bucket.join("InProgress/Foo/Foo - 01.mkv")).await.unwrap(),
            b"keep me"
        );
    }
}
