//! Transaction state.

use super::writes::PendingWrites;
use crate::catalog::{Catalog, CatalogPublisher};
use crate::collection::parts::Payload;
use crate::collection::{CollectionLayer, EntityCollection};
use crate::error::{CoreError, CoreResult};
use crate::schema::EntitySchema;
use crate::types::TransactionId;
use catalogdb_storage::RecordKey;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State of a transaction.
///
/// ```text
/// OPEN ─┬─▶ COMMITTING ──▶ COMMITTED
///       └─▶ ROLLING_BACK ─▶ ROLLED_BACK
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting reads and writes.
    Open,
    /// Merging into a new catalog.
    Committing,
    /// Published.
    Committed,
    /// Discarding its layers.
    RollingBack,
    /// Finished without effect.
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "OPEN",
            Self::Committing => "COMMITTING",
            Self::Committed => "COMMITTED",
            Self::RollingBack => "ROLLING_BACK",
            Self::RolledBack => "ROLLED_BACK",
        };
        f.write_str(name)
    }
}

/// How a transaction closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new catalog with this version was published.
    Committed {
        /// Version of the published catalog.
        catalog_version: u64,
    },
    /// Nothing was touched; the catalog is unchanged.
    NothingToCommit,
    /// The transaction was rollback-only and left no trace.
    RolledBack,
}

/// An open unit of work over one catalog snapshot.
///
/// Reads see the snapshot the transaction started from plus its own
/// writes. Writes are kept in per-collection layers and pending record
/// lists until [`Transaction::close`] merges them into a new catalog.
/// Dropping an open transaction rolls it back.
pub struct Transaction {
    id: TransactionId,
    catalog: Arc<Catalog>,
    durable: bool,
    state: Mutex<TransactionState>,
    rollback_only: AtomicBool,
    layers: Mutex<BTreeMap<String, Arc<CollectionLayer>>>,
    removed: Mutex<BTreeMap<String, Arc<EntityCollection>>>,
    pending: Mutex<BTreeMap<String, PendingWrites>>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("catalog_version", &self.catalog.version())
            .field("durable", &self.durable)
            .field("state", &self.state())
            .field("rollback_only", &self.is_rollback_only())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    /// Opens a transaction over `catalog`.
    ///
    /// A durable transaction flushes the collections it touched and
    /// writes a catalog header on commit; a non-durable one only buffers.
    pub(crate) fn begin(catalog: Arc<Catalog>, durable: bool) -> Self {
        let id = catalog.next_transaction_id();
        tracing::debug!(txn = %id, catalog_version = catalog.version(), durable, "transaction opened");
        Self {
            id,
            catalog,
            durable,
            state: Mutex::new(TransactionState::Open),
            rollback_only: AtomicBool::new(false),
            layers: Mutex::new(BTreeMap::new()),
            removed: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// The snapshot this transaction reads.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Whether commit makes the changes durable.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Whether close will discard everything.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::Acquire)
    }

    /// Dooms the transaction: close rolls it back.
    pub fn set_rollback_only(&self) {
        if !self.rollback_only.swap(true, Ordering::AcqRel) {
            tracing::debug!(txn = %self.id, "transaction marked rollback only");
        }
    }

    fn ensure_open(&self) -> CoreResult<()> {
        let state = self.state();
        if state != TransactionState::Open {
            return Err(CoreError::invalid_state(format!(
                "transaction {} is {state}",
                self.id
            )));
        }
        Ok(())
    }

    /// Collection `entity_type` as this transaction sees it.
    #[must_use]
    pub fn collection(&self, entity_type: &str) -> Option<Arc<EntityCollection>> {
        if let Some(layer) = self.layers.lock().get(entity_type) {
            return Some(Arc::clone(layer.base()));
        }
        if self.removed.lock().contains_key(entity_type) {
            return None;
        }
        self.catalog.collection(entity_type)
    }

    /// Entity types visible to this transaction.
    #[must_use]
    pub fn collection_types(&self) -> Vec<String> {
        let layers = self.layers.lock();
        let removed = self.removed.lock();
        let mut types: Vec<String> = self
            .catalog
            .collection_types()
            .into_iter()
            .filter(|entity_type| !removed.contains_key(entity_type))
            .chain(layers.keys().cloned())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    pub(crate) fn layer(&self, entity_type: &str) -> Option<Arc<CollectionLayer>> {
        self.layers.lock().get(entity_type).cloned()
    }

    /// `Some(true)` if the transaction created `entity_type`, `Some(false)`
    /// if it removed it, `None` if it left the catalog's answer standing.
    pub(crate) fn collection_override(&self, entity_type: &str) -> Option<bool> {
        if self
            .layers
            .lock()
            .get(entity_type)
            .is_some_and(|layer| layer.is_created())
        {
            return Some(true);
        }
        self.removed
            .lock()
            .contains_key(entity_type)
            .then_some(false)
    }

    /// The layer writes to `entity_type` go through, opened on first use.
    pub(crate) fn collection_for_write(&self, entity_type: &str) -> CoreResult<Arc<CollectionLayer>> {
        self.ensure_open()?;
        let mut layers = self.layers.lock();
        if let Some(layer) = layers.get(entity_type) {
            return Ok(Arc::clone(layer));
        }
        if self.removed.lock().contains_key(entity_type) {
            return Err(CoreError::collection_not_found(entity_type));
        }
        let base = self
            .catalog
            .collection(entity_type)
            .ok_or_else(|| CoreError::collection_not_found(entity_type))?;
        let layer = Arc::new(CollectionLayer::new(base, false));
        layers.insert(entity_type.to_owned(), Arc::clone(&layer));
        Ok(layer)
    }

    /// Creates collection `schema.name` inside this transaction.
    pub(crate) fn create_collection(&self, schema: EntitySchema) -> CoreResult<Arc<EntityCollection>> {
        self.ensure_open()?;
        let entity_type = schema.name.clone();
        if self.collection(&entity_type).is_some() {
            return Err(CoreError::DuplicateCollection { entity_type });
        }
        let collection = Arc::new(self.catalog.new_collection(schema)?);
        self.layers.lock().insert(
            entity_type.clone(),
            Arc::new(CollectionLayer::new(Arc::clone(&collection), true)),
        );
        tracing::info!(txn = %self.id, %entity_type, collection_id = %collection.collection_id(), "collection created");
        Ok(collection)
    }

    /// Returns collection `entity_type`, creating it with an empty schema.
    pub(crate) fn get_or_create_collection(&self, entity_type: &str) -> CoreResult<Arc<EntityCollection>> {
        match self.collection(entity_type) {
            Some(collection) => Ok(collection),
            None => self.create_collection(EntitySchema::new(entity_type)),
        }
    }

    /// Removes collection `entity_type`; `false` if it does not exist.
    pub(crate) fn delete_collection(&self, entity_type: &str) -> CoreResult<bool> {
        self.ensure_open()?;
        let layer = self.layers.lock().remove(entity_type);
        self.pending.lock().remove(entity_type);
        match layer {
            Some(layer) if layer.is_created() => {
                // never committed anywhere, so its file can go right away
                self.catalog.discard_collection(layer.base());
            }
            Some(layer) => {
                self.removed
                    .lock()
                    .insert(entity_type.to_owned(), Arc::clone(layer.base()));
            }
            None => {
                if self.removed.lock().contains_key(entity_type) {
                    return Ok(false);
                }
                let Some(collection) = self.catalog.collection(entity_type) else {
                    return Ok(false);
                };
                self.removed.lock().insert(entity_type.to_owned(), collection);
            }
        }
        tracing::info!(txn = %self.id, %entity_type, "collection deleted");
        Ok(true)
    }

    /// Appends a record write for `entity_type`.
    pub fn register_write(&self, entity_type: &str, key: RecordKey, payload: Payload) {
        self.pending
            .lock()
            .entry(entity_type.to_owned())
            .or_default()
            .write(key, payload);
    }

    /// Appends a record removal for `entity_type`.
    pub fn register_removal(&self, entity_type: &str, key: RecordKey) {
        self.pending
            .lock()
            .entry(entity_type.to_owned())
            .or_default()
            .remove(key);
    }

    pub(crate) fn pending_record(&self, entity_type: &str, key: &RecordKey) -> Option<Option<Payload>> {
        self.pending.lock().get(entity_type)?.get(key)
    }

    pub(crate) fn take_pending(&self, entity_type: &str) -> PendingWrites {
        self.pending.lock().remove(entity_type).unwrap_or_default()
    }

    pub(crate) fn layers(&self) -> Vec<Arc<CollectionLayer>> {
        self.layers.lock().values().cloned().collect()
    }

    pub(crate) fn removed_collections(&self) -> Vec<Arc<EntityCollection>> {
        self.removed.lock().values().cloned().collect()
    }

    /// Whether any structure was touched.
    #[must_use]
    pub fn is_touched(&self) -> bool {
        !self.layers.lock().is_empty()
            || !self.removed.lock().is_empty()
            || !self.pending.lock().is_empty()
    }

    /// Ends the transaction.
    ///
    /// A rollback-only transaction is discarded. Otherwise its changes are
    /// merged into the catalog `publisher` currently holds and the result is
    /// published, all under the commit lock.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the transaction is not open. Any failure while
    /// committing rolls the transaction back and is returned wrapped in
    /// `RollbackFailure`; the published catalog is then unchanged.
    pub fn close(&self, publisher: &dyn CatalogPublisher) -> CoreResult<CommitOutcome> {
        self.ensure_open()?;
        if self.is_rollback_only() {
            self.abort();
            return Ok(CommitOutcome::RolledBack);
        }
        if !self.is_touched() {
            *self.state.lock() = TransactionState::Committed;
            tracing::debug!(txn = %self.id, "nothing to commit");
            return Ok(CommitOutcome::NothingToCommit);
        }

        *self.state.lock() = TransactionState::Committing;
        let shared = self.catalog.shared();
        let timeout = shared.config.commit_lock_timeout;
        let result = match shared.commit_lock.try_lock_for(timeout) {
            Some(_guard) => publisher
                .current()
                .commit_transaction(self)
                .map(|next| {
                    let version = next.version();
                    publisher.publish(next);
                    version
                }),
            None => {
                tracing::warn!(txn = %self.id, ?timeout, "timed out waiting for the commit lock");
                Err(CoreError::CommitLockTimeout {
                    transaction_id: self.id.as_u64(),
                    waited: timeout,
                })
            }
        };

        match result {
            Ok(catalog_version) => {
                *self.state.lock() = TransactionState::Committed;
                tracing::debug!(txn = %self.id, catalog_version, "transaction committed");
                Ok(CommitOutcome::Committed { catalog_version })
            }
            Err(err) => {
                if let CoreError::TransactionConflict { entity_type } = &err {
                    tracing::warn!(txn = %self.id, %entity_type, "commit conflict");
                }
                *self.state.lock() = TransactionState::Open;
                self.abort();
                Err(CoreError::rollback(self.id.as_u64(), err))
            }
        }
    }

    /// Discards the transaction.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the transaction is not open.
    pub fn rollback(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.abort();
        Ok(())
    }

    fn abort(&self) {
        *self.state.lock() = TransactionState::RollingBack;
        let txid = self.id.as_u64();
        let layers = std::mem::take(&mut *self.layers.lock());
        for layer in layers.values() {
            layer.base().store().discard(txid);
            if layer.is_created() {
                self.catalog.discard_collection(layer.base());
            }
        }
        self.removed.lock().clear();
        self.pending.lock().clear();
        *self.state.lock() = TransactionState::RolledBack;
        tracing::debug!(txn = %self.id, "transaction rolled back");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state() == TransactionState::Open {
            self.abort();
        }
    }
}
