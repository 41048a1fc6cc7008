//! The catalog: an immutable snapshot of all entity collections.
//!
//! A [`Catalog`] value never changes. Committing a transaction builds a new
//! catalog next to the old one, and the owner of the "current catalog"
//! reference (a [`CatalogPublisher`]) swaps it in atomically. Readers
//! holding an older catalog keep reading it undisturbed.
//!
//! ## Lifecycle
//!
//! A catalog starts WARMING_UP: writes commit without touching storage and
//! [`Catalog::flush`] persists them in bulk. [`Catalog::go_live`] flushes
//! one last time and switches to ALIVE, where every commit is durable.

mod header;

pub use header::{CatalogHeader, FORMAT_VERSION, HEADER_FILE};
pub(crate) use header::HeaderStore;

use crate::cache::{supervisor_for, CacheSupervisor};
use crate::collection::EntityCollection;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::layer::{LayerDelta, VersionedMap};
use crate::schema::EntitySchema;
use crate::sequence::{SequenceKind, SequenceRegistry};
use crate::session::SessionRegistry;
use crate::transaction::Transaction;
use crate::types::{CatalogState, CollectionId, TransactionId};
use arc_swap::ArcSwap;
use catalogdb_storage::BackendProvider;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owner of the current catalog reference.
pub trait CatalogPublisher: Send + Sync {
    /// The catalog new transactions start from.
    fn current(&self) -> Arc<Catalog>;

    /// Makes `catalog` the current catalog.
    fn publish(&self, catalog: Arc<Catalog>);
}

impl CatalogPublisher for ArcSwap<Catalog> {
    fn current(&self) -> Arc<Catalog> {
        self.load_full()
    }

    fn publish(&self, catalog: Arc<Catalog>) {
        self.store(catalog);
    }
}

/// State shared by every catalog version of one database.
pub(crate) struct CatalogShared {
    pub(crate) config: Config,
    pub(crate) provider: Arc<dyn BackendProvider>,
    pub(crate) sequences: SequenceRegistry,
    pub(crate) cache: Arc<dyn CacheSupervisor>,
    pub(crate) sessions: SessionRegistry,
    pub(crate) commit_lock: Mutex<()>,
    header_store: Mutex<HeaderStore>,
    going_live: AtomicBool,
}

impl fmt::Debug for CatalogShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogShared")
            .field("config", &self.config)
            .field("provider", &self.provider)
            .field("cache", &self.cache)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of all entity collections.
pub struct Catalog {
    name: String,
    state: CatalogState,
    version: u64,
    last_committed_transaction_id: u64,
    collections: VersionedMap<String, Arc<EntityCollection>>,
    /// Last header written to storage.
    header: Arc<CatalogHeader>,
    shared: Arc<CatalogShared>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("version", &self.version)
            .field(
                "last_committed_transaction_id",
                &self.last_committed_transaction_id,
            )
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Catalog {
    /// Opens catalog `name` stored in `provider`, creating it if allowed.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the catalog does not exist and may not be
    /// created, `InvalidFormat` if the stored header names another catalog
    /// or does not match the collection files, storage errors otherwise.
    pub fn open(
        name: &str,
        config: Config,
        provider: Arc<dyn BackendProvider>,
    ) -> CoreResult<Arc<Self>> {
        if !provider.exists(HEADER_FILE) && !config.create_if_missing {
            return Err(CoreError::invalid_state(format!(
                "catalog `{name}` does not exist"
            )));
        }
        let (mut header_store, header) =
            HeaderStore::open(provider.open(HEADER_FILE)?, config.sync_on_commit)?;
        let header = match header {
            Some(header) if header.name != name => {
                return Err(CoreError::invalid_format(format!(
                    "storage holds catalog `{}`, not `{name}`",
                    header.name
                )));
            }
            Some(header) => header,
            None => {
                let header = CatalogHeader::new(name);
                header_store.write(&header)?;
                header
            }
        };

        let shared = Arc::new(CatalogShared {
            cache: supervisor_for(config.entity_cache_capacity),
            sequences: SequenceRegistry::new(),
            sessions: SessionRegistry::default(),
            commit_lock: Mutex::new(()),
            header_store: Mutex::new(header_store),
            going_live: AtomicBool::new(header.state == CatalogState::Alive),
            config,
            provider,
        });
        let last_transaction_id = i64::try_from(header.last_transaction_id())
            .map_err(|_| CoreError::invalid_format("transaction id out of range"))?;
        shared
            .sequences
            .ensure_at_least(SequenceKind::TransactionId, last_transaction_id);
        shared.sequences.ensure_at_least(
            SequenceKind::CollectionId,
            i64::from(header.last_collection_id),
        );

        let mut collections = Vec::with_capacity(header.collections.len());
        for (entity_type, collection_header) in &header.collections {
            if *entity_type != collection_header.entity_type {
                return Err(CoreError::invalid_format(format!(
                    "collection header `{}` is filed under `{entity_type}`",
                    collection_header.entity_type
                )));
            }
            let collection = EntityCollection::load(collection_header.clone(), Arc::clone(&shared))?;
            collections.push(Arc::new(collection));
        }

        tracing::info!(
            catalog = name,
            state = %header.state,
            version = header.version,
            collections = collections.len(),
            "catalog opened"
        );
        let catalog = Self {
            name: header.name.clone(),
            state: header.state,
            version: header.version,
            last_committed_transaction_id: header.last_committed_transaction_id,
            collections: VersionedMap::new(),
            header: Arc::new(header),
            shared,
        };
        Ok(catalog.publishable(collections))
    }

    /// Wraps a catalog under construction, pointing every collection back
    /// at it.
    fn publishable(mut self, collections: impl IntoIterator<Item = Arc<EntityCollection>>) -> Arc<Self> {
        Arc::new_cyclic(|catalog| {
            self.collections = collections
                .into_iter()
                .map(|collection| {
                    (
                        collection.entity_type().to_owned(),
                        Arc::new(collection.with_catalog(catalog.clone())),
                    )
                })
                .collect();
            self
        })
    }

    /// The next catalog version, without collections.
    fn successor(&self) -> Self {
        Self {
            name: self.name.clone(),
            state: self.state,
            version: self.version + 1,
            last_committed_transaction_id: self.last_committed_transaction_id,
            collections: VersionedMap::new(),
            header: Arc::clone(&self.header),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Catalog name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> CatalogState {
        self.state
    }

    /// Version, bumped by every commit and flush.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Id of the last transaction merged into this catalog.
    #[must_use]
    pub fn last_committed_transaction_id(&self) -> u64 {
        self.last_committed_transaction_id
    }

    /// Last header written to storage.
    #[must_use]
    pub fn header(&self) -> &Arc<CatalogHeader> {
        &self.header
    }

    /// Configuration the catalog was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub(crate) fn shared(&self) -> &Arc<CatalogShared> {
        &self.shared
    }

    /// Collection of `entity_type`.
    #[must_use]
    pub fn collection(&self, entity_type: &str) -> Option<Arc<EntityCollection>> {
        self.collections.get(entity_type).cloned()
    }

    /// Entity types, in order.
    #[must_use]
    pub fn collection_types(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// All collections, ordered by entity type.
    pub fn collections(&self) -> impl Iterator<Item = &Arc<EntityCollection>> {
        self.collections.values()
    }

    /// Whether committed changes still wait for a flush.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.collections.values().any(|collection| collection.is_dirty())
    }

    /// Allocates a transaction id, unique and increasing per catalog.
    #[must_use]
    pub fn next_transaction_id(&self) -> TransactionId {
        TransactionId::new(self.shared.sequences.next(SequenceKind::TransactionId).unsigned_abs())
    }

    /// Creates a collection that no catalog references yet.
    pub(crate) fn new_collection(self: &Arc<Self>, schema: EntitySchema) -> CoreResult<EntityCollection> {
        let id = u32::try_from(self.shared.sequences.next(SequenceKind::CollectionId))
            .map_err(|_| CoreError::consistency("collection ids exhausted"))?;
        EntityCollection::create(
            schema,
            CollectionId::new(id),
            Arc::clone(&self.shared),
            Arc::downgrade(self),
        )
    }

    /// Removes the storage file of a collection no durable header
    /// references.
    pub(crate) fn discard_collection(&self, collection: &EntityCollection) {
        let file = collection.collection_id().file_name();
        if let Err(err) = self.shared.provider.remove(&file) {
            tracing::warn!(%file, error = %err, "failed to remove collection file");
        }
    }

    fn lock_for_commit(&self, transaction_id: TransactionId) -> CoreResult<MutexGuard<'_, ()>> {
        let timeout = self.shared.config.commit_lock_timeout;
        self.shared.commit_lock.try_lock_for(timeout).ok_or_else(|| {
            tracing::warn!(txn = %transaction_id, ?timeout, "timed out waiting for the commit lock");
            CoreError::CommitLockTimeout {
                transaction_id: transaction_id.as_u64(),
                waited: timeout,
            }
        })
    }

    /// The current collection `collection` was read from, provided no
    /// other transaction changed it since.
    fn unchanged(&self, collection: &EntityCollection) -> CoreResult<&Arc<EntityCollection>> {
        match self.collections.get(collection.entity_type()) {
            Some(current)
                if current.collection_id() == collection.collection_id()
                    && current.version() == collection.version() =>
            {
                Ok(current)
            }
            _ => Err(CoreError::TransactionConflict {
                entity_type: collection.entity_type().to_owned(),
            }),
        }
    }

    /// Merges `txn` into a new catalog. The caller publishes it.
    ///
    /// A durable transaction flushes every collection it changed and
    /// writes a catalog header stamped with its id before returning. Once
    /// the catalog is ALIVE every commit is durable, including one that
    /// began during warm-up.
    ///
    /// # Errors
    ///
    /// `TransactionConflict` if a collection `txn` touched changed since
    /// it began; flush and header I/O errors. Nothing is published on error.
    pub fn commit_transaction(self: &Arc<Self>, txn: &Transaction) -> CoreResult<Arc<Catalog>> {
        let txid = txn.id().as_u64();
        let durable = txn.is_durable() || self.state == CatalogState::Alive;
        let mut delta = LayerDelta::new();

        let removed = txn.removed_collections();
        let removed_types: BTreeSet<&str> =
            removed.iter().map(|collection| collection.entity_type()).collect();
        for collection in &removed {
            self.unchanged(collection)?;
            delta.remove(collection.entity_type().to_owned());
        }

        let mut merged = Vec::new();
        for layer in txn.layers() {
            let base = layer.base();
            let entity_type = base.entity_type();
            let current = if layer.is_created() {
                if self.collections.contains_key(entity_type)
                    && !removed_types.contains(entity_type)
                {
                    return Err(CoreError::TransactionConflict {
                        entity_type: entity_type.to_owned(),
                    });
                }
                base
            } else {
                self.unchanged(base)?
            };
            let next = Arc::new(current.commit_layer(&layer, txn.take_pending(entity_type)));
            merged.push(if durable {
                next.flush(txid)?
            } else {
                next
            });
        }
        for collection in merged {
            delta.write(collection.entity_type().to_owned(), collection);
        }

        let collections = self.collections.commit(delta);
        let mut next = self.successor();
        next.last_committed_transaction_id = txid;
        if durable {
            let header = next.header_for(collections.values())?;
            self.shared.header_store.lock().write(&header)?;
            self.remove_orphans(&header);
            next.header = Arc::new(header);
        } else {
            for collection in &removed {
                if !self.is_durable_collection(collection) {
                    self.discard_collection(collection);
                }
            }
        }
        tracing::debug!(
            txn = txid,
            catalog_version = next.version,
            touched = ?collections.keys().collect::<Vec<_>>(),
            "merged transaction"
        );
        Ok(next.publishable(collections.values().cloned()))
    }

    fn is_durable_collection(&self, collection: &EntityCollection) -> bool {
        self.header
            .collections
            .values()
            .any(|header| header.collection_id == collection.collection_id())
    }

    fn header_for<'a>(
        &self,
        collections: impl Iterator<Item = &'a Arc<EntityCollection>>,
    ) -> CoreResult<CatalogHeader> {
        let last_collection_id = u32::try_from(self.shared.sequences.current(SequenceKind::CollectionId))
            .map_err(|_| CoreError::consistency("collection ids exhausted"))?;
        Ok(CatalogHeader {
            format_version: FORMAT_VERSION,
            name: self.name.clone(),
            state: self.state,
            version: self.version,
            last_committed_transaction_id: self.last_committed_transaction_id,
            last_collection_id,
            collections: collections
                .map(|collection| {
                    (
                        collection.entity_type().to_owned(),
                        (**collection.header()).clone(),
                    )
                })
                .collect(),
        })
    }

    /// Removes files the previous durable header referenced and `next`
    /// no longer does.
    fn remove_orphans(&self, next: &CatalogHeader) {
        let live: BTreeSet<CollectionId> = next
            .collections
            .values()
            .map(|collection| collection.collection_id)
            .collect();
        for orphan in self
            .header
            .collections
            .values()
            .filter(|collection| !live.contains(&collection.collection_id))
        {
            let file = orphan.collection_id.file_name();
            tracing::debug!(entity_type = %orphan.entity_type, %file, "removing dropped collection file");
            if let Err(err) = self.shared.provider.remove(&file) {
                tracing::warn!(%file, error = %err, "failed to remove collection file");
            }
        }
    }

    /// Persists every buffered change and writes a new header. Valid only
    /// while WARMING_UP.
    ///
    /// Returns the published catalog, which is `publisher`'s current one
    /// when nothing changed.
    ///
    /// # Errors
    ///
    /// `InvalidState` once ALIVE; `CommitLockTimeout`; storage errors.
    pub fn flush(self: &Arc<Self>, publisher: &dyn CatalogPublisher) -> CoreResult<Arc<Catalog>> {
        if self.state != CatalogState::WarmingUp {
            return Err(CoreError::invalid_state(
                "flush is only available while the catalog is warming up",
            ));
        }
        let txid = self.next_transaction_id();
        let _guard = self.lock_for_commit(txid)?;
        let current = publisher.current();
        if current.state != CatalogState::WarmingUp {
            return Err(CoreError::invalid_state(
                "flush is only available while the catalog is warming up",
            ));
        }
        let next = current.flush_all(txid, CatalogState::WarmingUp)?;
        if !Arc::ptr_eq(&next, &current) {
            publisher.publish(Arc::clone(&next));
        }
        Ok(next)
    }

    fn flush_all(self: &Arc<Self>, txid: TransactionId, state: CatalogState) -> CoreResult<Arc<Catalog>> {
        let mut changed = state != self.state
            || self.header.collections.keys().ne(self.collections.keys());
        let mut flushed = Vec::with_capacity(self.collections.len());
        for collection in self.collections.values() {
            let next = collection.flush(txid.as_u64())?;
            changed |= !Arc::ptr_eq(&next, collection);
            flushed.push(next);
        }
        if !changed {
            tracing::debug!(catalog = %self.name, "nothing to flush");
            return Ok(Arc::clone(self));
        }

        let mut next = self.successor();
        next.state = state;
        let header = next.header_for(flushed.iter())?;
        self.shared.header_store.lock().write(&header)?;
        self.remove_orphans(&header);
        next.header = Arc::new(header);
        tracing::debug!(
            catalog = %self.name,
            version = next.version,
            state = %next.state,
            collections = flushed.len(),
            "catalog flushed"
        );
        Ok(next.publishable(flushed))
    }

    /// Switches a WARMING_UP catalog to ALIVE, flushing it first.
    ///
    /// # Errors
    ///
    /// `InvalidState` if already alive, `ConcurrentTransition` if another
    /// caller is switching it right now, flush errors otherwise. A failed
    /// switch can be retried.
    pub fn go_live(self: &Arc<Self>, publisher: &dyn CatalogPublisher) -> CoreResult<Arc<Catalog>> {
        if publisher.current().state == CatalogState::Alive {
            return Err(CoreError::invalid_state("catalog is already alive"));
        }
        if self
            .shared
            .going_live
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoreError::ConcurrentTransition);
        }
        let result = self.switch_alive(publisher);
        if result.is_err() {
            self.shared.going_live.store(false, Ordering::Release);
        }
        result
    }

    fn switch_alive(&self, publisher: &dyn CatalogPublisher) -> CoreResult<Arc<Catalog>> {
        let txid = self.next_transaction_id();
        let _guard = self.lock_for_commit(txid)?;
        let current = publisher.current();
        let next = current.flush_all(txid, CatalogState::Alive)?;
        publisher.publish(Arc::clone(&next));
        tracing::info!(catalog = %next.name, version = next.version, "catalog is alive");
        Ok(next)
    }

    /// Closes the record stores of every collection.
    pub(crate) fn close_stores(&self) {
        for collection in self.collections.values() {
            collection.store().close();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use catalogdb_storage::MemoryProvider;

    /// An in-memory catalog behind its publisher.
    pub(crate) fn create_catalog(config: Config) -> (Arc<MemoryProvider>, ArcSwap<Catalog>) {
        let provider = Arc::new(MemoryProvider::new());
        let catalog = Catalog::open("test", config, provider.clone()).unwrap();
        (provider, ArcSwap::new(catalog))
    }

    pub(crate) fn reopen(provider: &Arc<MemoryProvider>, config: Config) -> Arc<Catalog> {
        Catalog::open("test", config, provider.clone()).unwrap()
    }
}
