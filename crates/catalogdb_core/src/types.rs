//! Core type definitions for CatalogDB.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing per catalog and never
/// reused. A higher id commits no earlier than a lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identifier of an entity collection's storage file.
///
/// Assigned when the collection is created and never reused, so a
/// collection deleted and recreated under the same type gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub u32);

impl CollectionId {
    /// Creates a new collection ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Name of the record store file backing this collection.
    #[must_use]
    pub fn file_name(self) -> String {
        format!("collection-{}.dat", self.0)
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col:{}", self.0)
    }
}

/// Identifier of a persisted entity index within its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexId(pub u32);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idx:{}", self.0)
    }
}

/// Primary key of an entity within its collection.
pub type PrimaryKey = i64;

/// Lifecycle state of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogState {
    /// Bulk loading: writes are buffered and made durable by `flush`.
    WarmingUp,
    /// Transactional: every commit is durable.
    Alive,
}

impl fmt::Display for CatalogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WarmingUp => f.write_str("WARMING_UP"),
            Self::Alive => f.write_str("ALIVE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        assert!(t1 < t2);
        assert_eq!(t2.to_string(), "txn:2");
    }

    #[test]
    fn collection_file_name() {
        let c = CollectionId::new(42);
        assert_eq!(c.to_string(), "col:42");
        assert_eq!(c.file_name(), "collection-42.dat");
    }

    #[test]
    fn state_display() {
        assert_eq!(CatalogState::WarmingUp.to_string(), "WARMING_UP");
        assert_eq!(CatalogState::Alive.to_string(), "ALIVE");
    }
}
