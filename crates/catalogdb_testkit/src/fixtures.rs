//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use catalogdb_core::{
    AttributeValue, Config, Database, EntityBuilder, EntityContentRequirements, EntityMutation,
    PriceKey, PriceValue, PrimaryKey, Session,
};
use catalogdb_storage::MemoryProvider;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Name of the catalog every fixture opens.
pub const TEST_CATALOG: &str = "test_catalog";

/// Entity type used by the product helpers.
pub const PRODUCT: &str = "product";

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// Shared files of an in-memory database, for reopening.
    provider: Option<MemoryProvider>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates a new in-memory test database with `config`.
    pub fn memory_with_config(config: Config) -> Self {
        let provider = MemoryProvider::new();
        Self {
            db: open_memory(&provider, config),
            provider: Some(provider),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&catalog_path(&temp_dir), TEST_CATALOG, Config::default())
            .expect("Failed to open file database");
        Self {
            db,
            provider: None,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(catalog_path)
    }

    /// Returns the files of an in-memory database.
    pub fn provider(&self) -> Option<&MemoryProvider> {
        self.provider.as_ref()
    }

    /// Closes the database and opens it again from the same storage.
    ///
    /// Every session must be dropped first, or the directory lock of a
    /// file database is still held.
    pub fn reopen(self) -> Self {
        let Self {
            db,
            provider,
            temp_dir,
        } = self;
        db.close().expect("Failed to close database");
        drop(db);

        let db = match (&provider, &temp_dir) {
            (Some(provider), _) => open_memory(provider, Config::default()),
            (None, Some(dir)) => Database::open(&catalog_path(dir), TEST_CATALOG, Config::default())
                .expect("Failed to reopen file database"),
            (None, None) => unreachable!("fixture without storage"),
        };
        Self {
            db,
            provider,
            temp_dir,
        }
    }

    /// Opens a session on the database.
    pub fn session(&self) -> Session {
        self.db.create_session().expect("Failed to create session")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

fn open_memory(provider: &MemoryProvider, config: Config) -> Database {
    Database::open_with_provider(Arc::new(provider.clone()), TEST_CATALOG, config)
        .expect("Failed to open in-memory database")
}

fn catalog_path(dir: &TempDir) -> PathBuf {
    dir.path().join(TEST_CATALOG)
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use catalogdb_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let session = db.create_session().unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

/// An upsert of product `primary_key` with a `code` attribute.
pub fn product(primary_key: PrimaryKey, code: &str) -> EntityMutation {
    let mut builder = EntityBuilder::with_primary_key(PRODUCT, primary_key);
    builder.set_attribute("code", code);
    builder.to_mutation()
}

/// An upsert of product `primary_key` with one EUR price per
/// `(price list, amount)`, all at 21 % tax.
pub fn priced_product(primary_key: PrimaryKey, prices: &[(&str, i64)]) -> EntityMutation {
    let mut builder = EntityBuilder::with_primary_key(PRODUCT, primary_key);
    for (price_id, (list, amount)) in (1..).zip(prices) {
        let amount = Decimal::new(*amount, 0);
        builder.set_price(
            PriceKey::new(price_id, *list, "EUR"),
            PriceValue::new(amount, Decimal::new(21, 0), amount),
        );
    }
    builder.to_mutation()
}

/// Reads the `code` attribute of product `primary_key`, if it exists.
pub fn product_code(session: &Session, primary_key: PrimaryKey) -> Option<String> {
    let requirements = EntityContentRequirements::body_only().with_attributes();
    let entity = session
        .get_entity(PRODUCT, primary_key, &requirements)
        .expect("Failed to read product")?;
    match entity.attribute("code").expect("Attributes were fetched") {
        Some(AttributeValue::String(code)) => Some(code.clone()),
        _ => None,
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a database holding products `1..=count`, flushed and alive.
    pub fn live_catalog(count: i64) -> TestDatabase {
        let test_db = TestDatabase::memory();
        {
            let session = test_db.session();
            for pk in 1..=count {
                session
                    .upsert_entity(&product(pk, &format!("code-{pk}")))
                    .expect("Failed to upsert product");
            }
            session.go_live().expect("Failed to go live");
        }
        test_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalogdb_core::CatalogState;

    #[test]
    fn test_memory_database() {
        let test_db = TestDatabase::memory();
        assert!(test_db.path().is_none());
        assert!(test_db.provider().is_some());
        assert_eq!(test_db.catalog().name(), TEST_CATALOG);
    }

    #[test]
    fn test_with_temp_db() {
        with_temp_db(|db| {
            let session = db.create_session().unwrap();
            session.upsert_entity(&product(1, "phone")).unwrap();
            assert_eq!(product_code(&session, 1).as_deref(), Some("phone"));
        });
    }

    #[test]
    fn test_with_file_db() {
        with_file_db(|db, path| {
            assert_eq!(db.path(), Some(path));
            assert!(path.join("LOCK").exists());
        });
    }

    #[test]
    fn test_live_catalog_scenario() {
        let test_db = scenarios::live_catalog(3);
        assert_eq!(test_db.catalog().state(), CatalogState::Alive);
        let session = test_db.session();
        assert_eq!(product_code(&session, 3).as_deref(), Some("code-3"));
    }

    #[test]
    fn test_reopen_keeps_flushed_products() {
        let test_db = scenarios::live_catalog(2).reopen();
        let session = test_db.session();
        assert_eq!(product_code(&session, 2).as_deref(), Some("code-2"));
    }
}
