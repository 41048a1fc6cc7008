//! Named backend providers.
//!
//! A catalog owns several storage files (its header log plus one record
//! store per entity type). Providers hand out backends by file name so the
//! engine never builds paths itself.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Opens, probes and removes named storage files.
pub trait BackendProvider: Send + Sync + fmt::Debug {
    /// Opens (creating if missing) the backend called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened.
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Returns whether a backend called `name` exists.
    fn exists(&self, name: &str) -> bool;

    /// Removes the backend called `name`; missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing backend cannot be removed.
    fn remove(&self, name: &str) -> StorageResult<()>;
}

/// Provider backed by files in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    /// Creates a provider rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory this provider writes into.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BackendProvider for DirectoryProvider {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::open(&self.root.join(name))?))
    }

    fn exists(&self, name: &str) -> bool {
        self.root.join(name).exists()
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        let path = self.root.join(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Provider keeping named in-memory backends.
///
/// Clones share the same set of files, so a database can be "reopened"
/// from a clone to exercise recovery.
#[derive(Debug, Default, Clone)]
pub struct MemoryProvider {
    files: Arc<RwLock<HashMap<String, InMemoryBackend>>>,
}

impl MemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle onto an existing file, if any.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<InMemoryBackend> {
        self.files.read().get(name).cloned()
    }

    /// Returns the names of all files, sorted.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl BackendProvider for MemoryProvider {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let backend = self
            .files
            .write()
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(Box::new(backend))
    }

    fn exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        self.files.write().remove(name);
        Ok(())
    }
}
