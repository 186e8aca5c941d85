//! The declarative library description.
//!
//! The YAML document is parsed into [`raw`] types, then checked and completed
//! by the [`Normalizer`] into a [`Database`]. The database is rebuilt from
//! the document on every cycle and never persisted.

mod error;
mod normalize;
pub mod raw;
mod types;

use std::path::Path;

pub use error::DatabaseError;
pub use normalize::Normalizer;
pub use raw::RawDatabase;
pub use types::*;

/// Reads and normalizes the declaration at `path`.
pub async fn load_database(path: &Path, normalizer: &Normalizer) -> Result<Database, DatabaseError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DatabaseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let raw = RawDatabase::from_yaml(&text)?;
    normalizer.normalize(raw)
}
