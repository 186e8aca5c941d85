//! Filesystem operations on the library tree: symlinks, trashing, and
//! pruning of empty directories.

mod error;
mod local;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

pub use error::FsError;
pub use local::LocalFileSystem;

/// Where removed data goes instead of being deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trash {
    /// Trash directory.
    pub dir: PathBuf,
    /// Root that trashed paths are made relative to.
    pub root: PathBuf,
}

impl Trash {
    pub fn new(dir: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            root: root.into(),
        }
    }

    /// Fresh location for `path`: `dir/<uuid>/<path relative to root>`.
    ///
    /// Paths outside the root keep only their file name.
    pub fn destination_for(&self, path: &Path) -> PathBuf {
        let bucket = self.dir.join(Uuid::new_v4().to_string());
        match path.strip_prefix(&self.root) {
            Ok(rel) if !rel.as_os_str().is_empty() => bucket.join(rel),
            _ => match path.file_name() {
                Some(name) => bucket.join(name),
                None => bucket,
            },
        }
    }
}

/// What [`FileSystem::ensure_absent`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Absence {
    /// Nothing was there.
    Missing,
    /// A symlink was removed.
    Unlinked,
    /// Real data was moved into the trash at the given path.
    Trashed(PathBuf),
    /// Real data was deleted because no trash was given.
    Deleted,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Make sure nothing exists at `path`. Symlinks are removed quietly;
    /// real files and directories are trashed (or deleted without a trash
    /// directory) with a warning.
    async fn ensure_absent(&self, path: &Path, trash: Option<&Trash>) -> Result<Absence, FsError>;

    /// Move `path` into the trash directory, or delete it when there is none.
    async fn trash(&self, path: &Path, trash: Option<&Trash>) -> Result<Absence, FsError>;

    /// Create a symlink at `path` pointing to `target`, creating parents.
    async fn symlink(&self, path: &Path, target: &Path) -> Result<(), FsError>;

    /// Remove empty directories under `root` bottom-up, `root` included.
    /// Directories in `excluding` are neither removed nor descended into.
    /// Returns the removed (or, in a dry run, removable) directories.
    async fn remove_empty_tree(
        &self,
        root: &Path,
        excluding: &[PathBuf],
        dry_run: bool,
    ) -> Result<Vec<PathBuf>, FsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trash_destination_keeps_relative_path() {
        let trash = Trash::new("/srv/anime/.Trash", "/srv/anime");
        let dest = trash.destination_for(Path::new("/srv/anime/.Torrents/2019q1/Foo"));

        let rel = dest.strip_prefix("/srv/anime/.Trash").unwrap();
        let mut components = rel.components();
        let bucket = components.next().unwrap().as_os_str().to_string_lossy().into_owned();
        assert!(Uuid::parse_str(&bucket).is_ok());
        assert_eq!(components.as_path(), Path::new(".Torrents/2019q1/Foo"));
    }

    #[test]
    fn test_trash_destination_outside_root() {
        let trash = Trash::new("/srv/anime/.Trash", "/srv/anime");
        let dest = trash.destination_for(Path::new("/elsewhere/Foo"));
        assert_eq!(dest.file_name().unwrap(), "Foo");
        assert_eq!(dest.parent().unwrap().parent().unwrap(), Path::new("/srv/anime/.Trash"));
    }
}
