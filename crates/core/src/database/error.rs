//! Error types for loading and validating the declaration.

use std::path::PathBuf;
use thiserror::Error;

use crate::error::ErrorClass;

/// Errors raised while reading or normalizing the declaration.
///
/// Every variant names the offending field so the operator can fix the
/// document without guessing.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The declaration could not be read from disk.
    #[error("failed to read database {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The declaration is not well-formed YAML or has the wrong shape.
    #[error("failed to parse database: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A required field is absent.
    #[error("invalid database: missing required field {field:?}")]
    MissingField { field: String },

    /// A field is present but holds an unusable value.
    #[error("invalid database: {field}: {reason}")]
    InvalidField { field: String, reason: String },

    /// A torrent key is not a lowercase 40 character hex hash.
    #[error("invalid database: torrent ID {hash:?} is not a valid hash")]
    InvalidHash { hash: String },

    /// A pattern regex failed to compile.
    #[error("invalid database: invalid episode regex for torrent ID {hash:?}: {reason}")]
    InvalidPattern { hash: String, reason: String },

    /// A season uses a name outside winter/spring/summer/fall.
    #[error("invalid database: season {name:?} for show {show:?} not one of winter, spring, summer, fall")]
    UnknownSeasonName { show: String, name: String },

    /// An episode refers to a show that is not declared.
    #[error("invalid database: torrent ID {hash:?} refers to unknown show {show:?}")]
    UnknownShow { hash: String, show: String },

    /// An episode refers to a season the show does not have.
    #[error("invalid database: torrent ID {hash:?} refers to season {season} of show {show:?}, which has {available}")]
    UnknownSeason {
        hash: String,
        show: String,
        season: u32,
        available: usize,
    },

    /// Two shows share a title.
    #[error("invalid database: show {title:?} declared more than once")]
    DuplicateShow { title: String },
}

impl DatabaseError {
    /// Builds a missing-field error from a dotted field path.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Builds an invalid-field error from a dotted field path and a reason.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Declaration problems abort the current cycle but leave the cache alone.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Read { .. } => ErrorClass::Retryable,
            _ => ErrorClass::Fatal,
        }
    }
}
