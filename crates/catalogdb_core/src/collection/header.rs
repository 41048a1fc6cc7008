//! Durable per-collection metadata.

use crate::types::{CollectionId, IndexId, PrimaryKey};
use catalogdb_storage::FileLocation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the catalog header records about one entity collection.
///
/// Produced by [`crate::EntityCollection::flush`]; everything needed to
/// reopen the collection is reachable from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHeader {
    /// Entity type.
    pub entity_type: String,
    /// Storage file id.
    pub collection_id: CollectionId,
    /// Collection version at the flush.
    pub version: u64,
    /// Number of entities.
    pub record_count: u64,
    /// Primary key high-water mark.
    pub last_primary_key: PrimaryKey,
    /// Index id high-water mark.
    pub last_index_id: u32,
    /// Key table frame of the record store; `None` before the first flush.
    pub storage_location: Option<FileLocation>,
    /// Aliases of non-integer record keys.
    pub compressed_keys: BTreeMap<String, i64>,
    /// Version of the key table at `storage_location`.
    pub key_table_version: u64,
    /// Id of the global index, once created.
    pub global_index_id: Option<IndexId>,
    /// Ids of the reduced indexes.
    pub reduced_index_ids: Vec<IndexId>,
    /// Version of the stored schema.
    pub schema_version: u64,
    /// Transaction that produced this header.
    pub last_transaction_id: u64,
}

impl CollectionHeader {
    /// Header of a collection that was never flushed.
    #[must_use]
    pub fn empty(entity_type: impl Into<String>, collection_id: CollectionId) -> Self {
        Self {
            entity_type: entity_type.into(),
            collection_id,
            version: 1,
            record_count: 0,
            last_primary_key: 0,
            last_index_id: 0,
            storage_location: None,
            compressed_keys: BTreeMap::new(),
            key_table_version: 0,
            global_index_id: None,
            reduced_index_ids: Vec::new(),
            schema_version: 1,
            last_transaction_id: 0,
        }
    }
}
