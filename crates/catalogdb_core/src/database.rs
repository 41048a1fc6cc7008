//! Database facade.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::dir::CatalogDir;
use crate::error::{CoreError, CoreResult};
use crate::session::Session;
use crate::types::CatalogState;
use arc_swap::ArcSwap;
use catalogdb_storage::{BackendProvider, MemoryProvider};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State shared between a [`Database`] and its sessions.
pub(crate) struct DatabaseInner {
    current: ArcSwap<Catalog>,
    /// Holds the directory lock. None for databases without a directory.
    dir: Option<CatalogDir>,
    is_open: AtomicBool,
}

impl DatabaseInner {
    pub(crate) fn publisher(&self) -> &ArcSwap<Catalog> {
        &self.current
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }
}

/// The main database handle.
///
/// `Database` owns one catalog and hands out [`Session`]s to work with it.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use catalogdb_core::{Config, Database, EntityBuilder};
/// use std::path::Path;
///
/// let db = Database::open(Path::new("shop_data"), "shop", Config::default())?;
/// let session = db.create_session()?;
///
/// let mut product = EntityBuilder::new("product");
/// product.set_attribute("code", "phone");
/// session.upsert_entity(&product.to_mutation())?;
///
/// // bulk load done, make every further commit durable
/// session.go_live()?;
/// db.close()?;
/// ```
///
/// # In-Memory Databases
///
/// ```rust,ignore
/// let db = Database::open_in_memory("shop")?;
/// ```
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Opens catalog `name` stored in directory `path`.
    ///
    /// The directory is locked for the lifetime of the database.
    ///
    /// # Errors
    ///
    /// `CatalogLocked` if another process has it open; see
    /// [`Catalog::open`] for the rest.
    pub fn open(path: &Path, name: &str, config: Config) -> CoreResult<Self> {
        let dir = CatalogDir::open(path, config.create_if_missing)?;
        let provider = Arc::new(dir.provider());
        Self::assemble(provider, name, config, Some(dir))
    }

    /// Opens an empty catalog held in memory.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature mirrors [`Database::open`].
    pub fn open_in_memory(name: &str) -> CoreResult<Self> {
        Self::open_with_provider(Arc::new(MemoryProvider::new()), name, Config::default())
    }

    /// Opens catalog `name` from custom storage.
    ///
    /// # Errors
    ///
    /// See [`Catalog::open`].
    pub fn open_with_provider(
        provider: Arc<dyn BackendProvider>,
        name: &str,
        config: Config,
    ) -> CoreResult<Self> {
        Self::assemble(provider, name, config, None)
    }

    fn assemble(
        provider: Arc<dyn BackendProvider>,
        name: &str,
        config: Config,
        dir: Option<CatalogDir>,
    ) -> CoreResult<Self> {
        let catalog = Catalog::open(name, config, provider)?;
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                current: ArcSwap::new(catalog),
                dir,
                is_open: AtomicBool::new(true),
            }),
        })
    }

    /// The current catalog.
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        self.inner.current.load_full()
    }

    /// Directory the database lives in, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.dir.as_ref().map(CatalogDir::path)
    }

    /// Opens a session.
    ///
    /// # Errors
    ///
    /// `DatabaseClosed` after [`Database::close`].
    pub fn create_session(&self) -> CoreResult<Session> {
        self.inner.ensure_open()?;
        Ok(Session::new(Arc::clone(&self.inner)))
    }

    /// Number of open sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.inner.current.load().shared().sessions.active()
    }

    /// Closes the database.
    ///
    /// A warming-up catalog is flushed first. Sessions still open fail
    /// with `DatabaseClosed` afterwards.
    ///
    /// # Errors
    ///
    /// Flush errors; the database stays open and the call can be retried.
    pub fn close(&self) -> CoreResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        let catalog = self.catalog();
        if catalog.state() == CatalogState::WarmingUp {
            catalog.flush(&self.inner.current)?;
        }
        if self
            .inner
            .is_open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.catalog().close_stores();
            tracing::info!(catalog = %catalog.name(), "database closed");
        }
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_open.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let catalog = self.catalog();
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("catalog", &catalog.name())
            .field("state", &catalog.state())
            .field("version", &catalog.version())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to close database");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityBuilder, EntityContentRequirements};
    use tempfile::tempdir;

    fn create_db() -> Database {
        Database::open_in_memory("shop").unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = create_db();
        assert!(db.is_open());
        assert_eq!(db.catalog().state(), CatalogState::WarmingUp);
        assert!(db.path().is_none());
    }

    #[test]
    fn sessions_are_counted() {
        let db = create_db();
        let first = db.create_session().unwrap();
        let second = db.create_session().unwrap();
        assert_eq!(db.active_sessions(), 2);
        drop(first);
        drop(second);
        assert_eq!(db.active_sessions(), 0);
    }

    #[test]
    fn closed_database_rejects_sessions() {
        let db = create_db();
        let session = db.create_session().unwrap();
        db.close().unwrap();

        assert!(matches!(db.create_session(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(
            session.get_or_create_collection("product"),
            Err(CoreError::DatabaseClosed)
        ));
    }

    #[test]
    fn reopen_from_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("shop");
        {
            let db = Database::open(&path, "shop", Config::default()).unwrap();
            let session = db.create_session().unwrap();
            let mut product = EntityBuilder::with_primary_key("product", 7);
            product.set_attribute("code", "phone");
            session.upsert_entity(&product.to_mutation()).unwrap();
            drop(session);
            db.close().unwrap();
        }

        let db = Database::open(&path, "shop", Config::default()).unwrap();
        let session = db.create_session().unwrap();
        let product = session
            .get_entity("product", 7, &EntityContentRequirements::all())
            .unwrap()
            .unwrap();
        assert_eq!(
            product.attribute("code").unwrap(),
            Some(&"phone".into())
        );
    }

    #[test]
    fn second_open_of_a_directory_is_locked() {
        let temp = tempdir().unwrap();
        let _db = Database::open(temp.path(), "shop", Config::default()).unwrap();
        let result = Database::open(temp.path(), "shop", Config::default());
        assert!(matches!(result, Err(CoreError::CatalogLocked)));
    }
}
