//! Local filesystem implementation.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::error::FsError;
use super::{Absence, FileSystem, Trash};

type PruneFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, FsError>> + Send + 'a>>;

/// [`FileSystem`] backed by `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }

    /// Metadata of `path` itself (not following symlinks), `None` if absent.
    async fn inspect(path: &Path) -> Result<Option<std::fs::Metadata>, FsError> {
        match fs::symlink_metadata(path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(FsError::ReadFailed {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn create_dirs(path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path)
            .await
            .map_err(|source| FsError::DirectoryCreationFailed {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn delete(path: &Path, meta: &std::fs::Metadata) -> Result<(), FsError> {
        let result = if meta.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        };
        result.map_err(|source| FsError::RemoveFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Removes `dir` if everything under it is (or would be) removable.
    fn prune<'a>(
        dir: PathBuf,
        excluding: &'a [PathBuf],
        dry_run: bool,
        removed: &'a mut Vec<PathBuf>,
    ) -> PruneFuture<'a> {
        Box::pin(async move {
            let mut entries = fs::read_dir(&dir).await.map_err(|source| FsError::ReadFailed {
                path: dir.clone(),
                source,
            })?;

            let mut keep = false;
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(source) => {
                        return Err(FsError::ReadFailed {
                            path: dir.clone(),
                            source,
                        })
                    }
                };
                let path = entry.path();
                let is_real_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);

                if !is_real_dir || excluding.contains(&path) {
                    keep = true;
                    continue;
                }
                if !Self::prune(path, excluding, dry_run, removed).await? {
                    keep = true;
                }
            }

            if keep {
                return Ok(false);
            }
            if !dry_run {
                fs::remove_dir(&dir)
                    .await
                    .map_err(|source| FsError::RemoveFailed {
                        path: dir.clone(),
                        source,
                    })?;
            }
            debug!("Removed empty directory {:?}", dir);
            removed.push(dir);
            Ok(true)
        })
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn ensure_absent(&self, path: &Path, trash: Option<&Trash>) -> Result<Absence, FsError> {
        let meta = match Self::inspect(path).await? {
            Some(meta) => meta,
            None => return Ok(Absence::Missing),
        };

        if meta.file_type().is_symlink() {
            fs::remove_file(path)
                .await
                .map_err(|source| FsError::RemoveFailed {
                    path: path.to_path_buf(),
                    source,
                })?;
            return Ok(Absence::Unlinked);
        }

        warn!("{:?} is not a symlink, clearing it out of the way", path);
        self.trash(path, trash).await
    }

    async fn trash(&self, path: &Path, trash: Option<&Trash>) -> Result<Absence, FsError> {
        let meta = match Self::inspect(path).await? {
            Some(meta) => meta,
            None => return Ok(Absence::Missing),
        };

        let Some(trash) = trash else {
            Self::delete(path, &meta).await?;
            warn!("Deleted {:?}", path);
            return Ok(Absence::Deleted);
        };

        let destination = trash.destination_for(path);
        if let Some(parent) = destination.parent() {
            Self::create_dirs(parent).await?;
        }

        fs::rename(path, &destination)
            .await
            .map_err(|source| FsError::MoveFailed {
                path: path.to_path_buf(),
                destination: destination.clone(),
                source,
            })?;
        warn!("Trashed {:?} to {:?}", path, destination);
        Ok(Absence::Trashed(destination))
    }

    #[cfg(unix)]
    async fn symlink(&self, path: &Path, target: &Path) -> Result<(), FsError> {
        if let Some(parent) = path.parent() {
            Self::create_dirs(parent).await?;
        }
        fs::symlink(target, path)
            .await
            .map_err(|source| FsError::LinkFailed {
                path: path.to_path_buf(),
                target: target.to_path_buf(),
                source,
            })
    }

    #[cfg(not(unix))]
    async fn symlink(&self, _path: &Path, _target: &Path) -> Result<(), FsError> {
        Err(FsError::SymlinksUnsupported)
    }

    async fn remove_empty_tree(
        &self,
        root: &Path,
        excluding: &[PathBuf],
        dry_run: bool,
    ) -> Result<Vec<PathBuf>, FsError> {
        let mut removed = Vec::new();
        if excluding.iter().any(|e| e == root) {
            return Ok(removed);
        }
        match Self::inspect(root).await? {
            Some(meta) if meta.is_dir() => {
                Self::prune(root.to_path_buf(), excluding, dry_run, &mut removed).await?;
            }
            _ => {}
        }
        Ok(removed)
    }
}
