//! Error types for the filesystem module.

use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

use crate::error::ErrorClass;

/// Errors from filesystem operations on the library tree.
#[derive(Debug, Error)]
pub enum FsError {
    /// Failed to create a directory.
    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create a symlink.
    #[error("Failed to link {path} -> {target}")]
    LinkFailed {
        path: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to move an entry into the trash.
    #[error("Failed to move {path} to {destination}")]
    MoveFailed {
        path: PathBuf,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to delete an entry.
    #[error("Failed to remove {path}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to inspect an entry.
    #[error("Failed to read {path}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Symlinks are not available on this platform.
    #[error("Symlinks are not supported on this platform")]
    SymlinksUnsupported,
}

impl FsError {
    fn io(&self) -> Option<&std::io::Error> {
        match self {
            Self::DirectoryCreationFailed { source, .. }
            | Self::LinkFailed { source, .. }
            | Self::MoveFailed { source, .. }
            | Self::RemoveFailed { source, .. }
            | Self::ReadFailed { source, .. } => Some(source),
            Self::SymlinksUnsupported => None,
        }
    }

    /// Transient I/O conditions are retryable; everything else is fatal.
    pub fn class(&self) -> ErrorClass {
        match self.io().map(|e| e.kind()) {
            Some(ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                ErrorClass::Retryable
            }
            _ => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class() {
        let transient = FsError::RemoveFailed {
            path: PathBuf::from("/x"),
            source: std::io::Error::from(ErrorKind::Interrupted),
        };
        assert_eq!(transient.class(), ErrorClass::Retryable);

        let denied = FsError::LinkFailed {
            path: PathBuf::from("/x"),
            target: PathBuf::from("../y"),
            source: std::io::Error::from(ErrorKind::PermissionDenied),
        };
        assert_eq!(denied.class(), ErrorClass::Fatal);
        assert_eq!(FsError::SymlinksUnsupported.class(), ErrorClass::Fatal);
    }
}
