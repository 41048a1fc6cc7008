//! CLI command implementations.

pub mod inspect;
pub mod verify;

use catalogdb_core::{CatalogHeader, CoreError, HEADER_FILE};
use catalogdb_storage::{FileBackend, StorageError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by the commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no catalog header.
    #[error("no catalog found at {}", .0.display())]
    NotFound(PathBuf),

    /// Verification found damaged data.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),

    /// Engine error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads the current catalog header of the directory at `path`.
///
/// Nothing is written, so this works on a catalog another process holds.
pub fn load_header(path: &Path) -> Result<CatalogHeader, CliError> {
    let header_path = path.join(HEADER_FILE);
    if !header_path.is_file() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    let backend = FileBackend::open(&header_path)?;
    CatalogHeader::read(&backend)?.ok_or_else(|| CliError::NotFound(path.to_path_buf()))
}

#[cfg(test)]
pub(crate) mod testing {
    use catalogdb_core::{Config, Database, EntityBuilder};
    use std::path::Path;

    /// Creates a live catalog with two products under `path`.
    pub fn create_catalog(path: &Path) {
        let db = Database::open(path, "shop", Config::default()).unwrap();
        let session = db.create_session().unwrap();
        for pk in 1..=2 {
            let mut product = EntityBuilder::with_primary_key("product", pk);
            product.set_attribute("code", format!("code-{pk}"));
            session.upsert_entity(&product.to_mutation()).unwrap();
        }
        session.go_live().unwrap();
        drop(session);
        db.close().unwrap();
    }
}
