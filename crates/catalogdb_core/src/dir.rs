//! Catalog directory management.
//!
//! This module handles the file system layout of one catalog:
//!
//! ```text
//! <root>/
//! ├─ LOCK                 # Advisory lock, one process per directory
//! ├─ catalog.hdr          # Append-only log of catalog headers
//! └─ collection-<id>.dat  # Record store of one entity collection
//! ```
//!
//! The LOCK file ensures only one process opens the catalog at a time.

use crate::catalog::HEADER_FILE;
use crate::error::{CoreError, CoreResult};
use catalogdb_storage::DirectoryProvider;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// Holds the exclusive lock on a catalog directory.
///
/// The lock is released when the value drops.
#[derive(Debug)]
pub struct CatalogDir {
    path: PathBuf,
    _lock_file: File,
}

impl CatalogDir {
    /// Opens or creates a catalog directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `CatalogLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "catalog directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::CatalogLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the catalog directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the catalog header log.
    #[must_use]
    pub fn header_path(&self) -> PathBuf {
        self.path.join(HEADER_FILE)
    }

    /// Returns true if no catalog was ever written here.
    #[must_use]
    pub fn is_new_catalog(&self) -> bool {
        !self.header_path().exists()
    }

    /// Backend provider rooted at this directory.
    #[must_use]
    pub fn provider(&self) -> DirectoryProvider {
        DirectoryProvider::new(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("new_catalog");

        let dir = CatalogDir::open(&path, true).unwrap();
        assert!(path.is_dir());
        assert!(dir.is_new_catalog());
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = CatalogDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("locked");

        let _first = CatalogDir::open(&path, true).unwrap();
        let result = CatalogDir::open(&path, true);
        assert!(matches!(result, Err(CoreError::CatalogLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("reopen");

        {
            let _dir = CatalogDir::open(&path, true).unwrap();
        }
        let _again = CatalogDir::open(&path, true).unwrap();
    }

    #[test]
    fn paths_are_correct() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("paths");

        let dir = CatalogDir::open(&path, true).unwrap();
        assert_eq!(dir.header_path(), path.join("catalog.hdr"));
        assert_eq!(dir.provider().root(), path.as_path());
    }
}
