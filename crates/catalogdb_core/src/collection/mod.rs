//! Entity collections.
//!
//! An [`EntityCollection`] is an immutable snapshot of one entity type:
//! its schema, its entity indexes and a handle to the record store holding
//! the entity parts. Reads never block writers; writes go through the
//! transaction's [`CollectionLayer`] and become a new collection value at
//! commit.
//!
//! Record reads resolve in this order:
//!
//! 1. writes pending in the reading transaction
//! 2. records committed but not yet flushed (warm-up buffering)
//! 3. the record store, as seen by this snapshot's key table

mod header;
mod layer;
mod mutator;
pub(crate) mod parts;

pub use header::CollectionHeader;
pub(crate) use layer::CollectionLayer;

use crate::cache::CacheKey;
use crate::catalog::{Catalog, CatalogShared};
use crate::error::{CoreError, CoreResult};
use crate::index::{EntityIndex, EntityIndexKey, IndexLookup, IndexMaintainer};
use crate::layer::{LayerDelta, VersionedMap};
use crate::model::{
    AssociatedDataRecord, Entity, EntityContentRequirements, EntityMutation, EntityReference,
    PriceInnerRecordHandling, SealedEntity,
};
use crate::schema::EntitySchema;
use crate::sequence::SequenceKind;
use crate::transaction::{PendingWrites, Transaction};
use crate::types::{CollectionId, PrimaryKey};
use catalogdb_storage::{FlushOutcome, KeyTable, RecordKey, RecordStore};
use mutator::EntityMutator;
use parts::{
    associated_data_key, attributes_key, body_key, decode_part, encode_part, index_key,
    prices_key, references_key, schema_key, AttributesPart, EntityBody, Payload, PricesPart,
    ReferencesPart,
};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

/// Immutable snapshot of one entity type.
#[derive(Clone)]
pub struct EntityCollection {
    entity_type: String,
    collection_id: CollectionId,
    version: u64,
    schema: Arc<EntitySchema>,
    indexes: VersionedMap<EntityIndexKey, Arc<EntityIndex>>,
    store: Arc<RecordStore>,
    key_table: Arc<KeyTable>,
    /// Committed records not yet flushed; `None` marks a removal.
    buffered: VersionedMap<RecordKey, Option<Payload>>,
    dirty_indexes: BTreeSet<EntityIndexKey>,
    removed_index_ids: BTreeSet<crate::types::IndexId>,
    schema_dirty: bool,
    header: Arc<CollectionHeader>,
    shared: Arc<CatalogShared>,
    catalog: Weak<Catalog>,
}

impl fmt::Debug for EntityCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCollection")
            .field("entity_type", &self.entity_type)
            .field("collection_id", &self.collection_id)
            .field("version", &self.version)
            .field("schema_version", &self.schema.version)
            .field("indexes", &self.indexes.len())
            .field("buffered", &self.buffered.len())
            .finish_non_exhaustive()
    }
}

impl EntityCollection {
    /// Creates a collection that was never flushed.
    pub(crate) fn create(
        schema: EntitySchema,
        collection_id: CollectionId,
        shared: Arc<CatalogShared>,
        catalog: Weak<Catalog>,
    ) -> CoreResult<Self> {
        let backend = shared.provider.open(&collection_id.file_name())?;
        let (store, key_table) = RecordStore::open(backend, None)?;
        let store = store.with_sync(shared.config.sync_on_commit);
        tracing::debug!(entity_type = %schema.name, %collection_id, "creating collection");
        Ok(Self {
            entity_type: schema.name.clone(),
            collection_id,
            version: 1,
            header: Arc::new(CollectionHeader::empty(&schema.name, collection_id)),
            schema: Arc::new(schema),
            indexes: VersionedMap::new(),
            store: Arc::new(store),
            key_table,
            buffered: VersionedMap::new(),
            dirty_indexes: BTreeSet::new(),
            removed_index_ids: BTreeSet::new(),
            schema_dirty: true,
            shared,
            catalog,
        })
    }

    /// Reopens a collection from its durable header.
    pub(crate) fn load(header: CollectionHeader, shared: Arc<CatalogShared>) -> CoreResult<Self> {
        let backend = shared.provider.open(&header.collection_id.file_name())?;
        let (store, key_table) = RecordStore::open(backend, header.storage_location)?;
        let store = store.with_sync(shared.config.sync_on_commit);
        if key_table.compressed_keys() != &header.compressed_keys {
            return Err(CoreError::invalid_format(format!(
                "key table of `{}` does not match its header",
                header.entity_type
            )));
        }

        let schema = match store.get(&key_table, &schema_key())? {
            Some(bytes) => decode_part::<EntitySchema>(&bytes)?,
            None => EntitySchema::new(&header.entity_type),
        };

        let mut indexes = Vec::new();
        for id in header.global_index_id.iter().chain(&header.reduced_index_ids) {
            let bytes = store.get(&key_table, &index_key(*id))?.ok_or_else(|| {
                CoreError::invalid_format(format!(
                    "entity index {id} of `{}` is missing",
                    header.entity_type
                ))
            })?;
            let index: EntityIndex = decode_part(&bytes)?;
            indexes.push((index.key(), Arc::new(index)));
        }

        let id = header.collection_id;
        shared
            .sequences
            .ensure_at_least(SequenceKind::PrimaryKey(id), header.last_primary_key);
        shared
            .sequences
            .ensure_at_least(SequenceKind::IndexId(id), i64::from(header.last_index_id));

        tracing::debug!(
            entity_type = %header.entity_type,
            collection_id = %id,
            records = header.record_count,
            indexes = indexes.len(),
            "loaded collection"
        );
        Ok(Self {
            entity_type: header.entity_type.clone(),
            collection_id: id,
            version: header.version,
            schema: Arc::new(schema),
            indexes: indexes.into_iter().collect(),
            store: Arc::new(store),
            key_table,
            buffered: VersionedMap::new(),
            dirty_indexes: BTreeSet::new(),
            removed_index_ids: BTreeSet::new(),
            schema_dirty: false,
            header: Arc::new(header),
            shared,
            catalog: Weak::new(),
        })
    }

    /// Same snapshot, owned by `catalog`.
    pub(crate) fn with_catalog(&self, catalog: Weak<Catalog>) -> Self {
        Self {
            catalog,
            ..self.clone()
        }
    }

    /// Entity type held by the collection.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Storage file id.
    #[must_use]
    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    /// Version, bumped by every commit that changes the collection.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Schema of this snapshot.
    #[must_use]
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Last header written for this collection.
    #[must_use]
    pub fn header(&self) -> &Arc<CollectionHeader> {
        &self.header
    }

    /// The catalog snapshot owning this collection, while it is alive.
    #[must_use]
    pub fn catalog(&self) -> Option<Arc<Catalog>> {
        self.catalog.upgrade()
    }

    /// Entity index stored under `key`.
    #[must_use]
    pub fn index(&self, key: &EntityIndexKey) -> Option<&Arc<EntityIndex>> {
        self.indexes.get(key)
    }

    pub(crate) fn indexes(&self) -> &VersionedMap<EntityIndexKey, Arc<EntityIndex>> {
        &self.indexes
    }

    pub(crate) fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Whether committed changes still wait for a flush.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.buffered.is_empty()
            || !self.dirty_indexes.is_empty()
            || !self.removed_index_ids.is_empty()
            || self.schema_dirty
    }

    /// The transaction's layer over this very collection, if it has one.
    fn own_layer(&self, txn: Option<&Transaction>) -> Option<Arc<CollectionLayer>> {
        txn.and_then(|txn| txn.layer(&self.entity_type))
            .filter(|layer| layer.base().collection_id == self.collection_id)
    }

    fn index_view(&self, txn: Option<&Transaction>, key: &EntityIndexKey) -> Option<Arc<EntityIndex>> {
        match self.own_layer(txn) {
            Some(layer) => layer.index(key),
            None => self.indexes.get(key).cloned(),
        }
    }

    fn read_record<T: DeserializeOwned>(
        &self,
        txn: Option<&Transaction>,
        key: &RecordKey,
    ) -> CoreResult<Option<T>> {
        if let Some(txn) = txn.filter(|_| self.own_layer(txn).is_some()) {
            if let Some(pending) = txn.pending_record(&self.entity_type, key) {
                return pending.map(|bytes| decode_part(&bytes)).transpose();
            }
        }
        if let Some(buffered) = self.buffered.get(key) {
            return buffered.as_ref().map(|bytes| decode_part(bytes)).transpose();
        }
        match self.shared.sessions.buffers() {
            Some(pool) => {
                let mut buf = pool.lease();
                self.store
                    .read_with(&self.key_table, key, &mut buf, |payload| decode_part(payload))?
                    .transpose()
            }
            None => self
                .store
                .get(&self.key_table, key)?
                .map(|bytes| decode_part(&bytes))
                .transpose(),
        }
    }

    /// Loads entity `primary_key` with the sections in `requirements`.
    pub(crate) fn fetch_entity(
        &self,
        txn: Option<&Transaction>,
        primary_key: PrimaryKey,
        requirements: &EntityContentRequirements,
    ) -> CoreResult<Option<Entity>> {
        let Some(body) = self.read_record::<EntityBody>(txn, &body_key(primary_key))? else {
            return Ok(None);
        };
        let mut entity = Entity::new(self.entity_type.clone(), primary_key);
        entity.version = body.version;
        entity.parent = body.parent;
        entity.associated_data_keys = body.associated_data_keys;
        self.fill(
            txn,
            &mut entity,
            &EntityContentRequirements::body_only(),
            requirements,
        )?;
        Ok(Some(entity))
    }

    /// Loads the sections `want` covers and `have` does not.
    fn fill(
        &self,
        txn: Option<&Transaction>,
        entity: &mut Entity,
        have: &EntityContentRequirements,
        want: &EntityContentRequirements,
    ) -> CoreResult<()> {
        let pk = entity.primary_key;
        if want.attributes && !have.attributes {
            if let Some(part) = self.read_record::<AttributesPart>(txn, &attributes_key(pk))? {
                entity.attributes = part.attributes;
            }
        }
        if want.prices && !have.prices {
            if let Some(part) = self.read_record::<PricesPart>(txn, &prices_key(pk))? {
                entity.price_inner_record_handling =
                    PriceInnerRecordHandling::from_code(part.inner_record_handling)?;
                entity.prices = part
                    .prices
                    .into_iter()
                    .map(|price| (price.key.clone(), price))
                    .collect();
            }
        }
        if want.references && !have.references {
            if let Some(part) = self.read_record::<ReferencesPart>(txn, &references_key(pk))? {
                entity.references = part
                    .references
                    .into_iter()
                    .map(|reference| (reference.key.clone(), reference))
                    .collect();
            }
        }
        let names: Vec<String> = entity
            .associated_data_keys
            .iter()
            .filter(|name| want.associated_data.covers_key(name))
            .filter(|name| !have.associated_data.covers_key(name))
            .cloned()
            .collect();
        for name in names {
            let key = associated_data_key(pk, &name);
            if let Some(record) = self.read_record::<AssociatedDataRecord>(txn, &key)? {
                entity.associated_data.insert(name, record);
            }
        }
        Ok(())
    }

    /// Returns entity `primary_key` with the sections in `requirements`.
    ///
    /// Reads outside a writing transaction go through the entity cache.
    ///
    /// # Errors
    ///
    /// Storage or decoding failures.
    pub fn get_entity(
        &self,
        txn: Option<&Transaction>,
        primary_key: PrimaryKey,
        requirements: &EntityContentRequirements,
    ) -> CoreResult<Option<SealedEntity>> {
        let mut loader = |requirements: &EntityContentRequirements| -> CoreResult<Option<SealedEntity>> {
            Ok(self
                .fetch_entity(txn, primary_key, requirements)?
                .map(|entity| SealedEntity::new(Arc::new(entity), requirements.clone())))
        };
        if self.own_layer(txn).is_some() {
            return loader(requirements);
        }
        let key = CacheKey {
            collection_id: self.collection_id,
            entity_type: self.entity_type.clone(),
            primary_key,
            collection_version: self.version,
        };
        self.shared.cache.analyse(
            key,
            requirements,
            &mut loader,
            &mut |entity, wider| self.enrich_entity(txn, &entity, wider),
            &|entity, narrower| self.limit_entity(entity, narrower),
        )
    }

    /// Adds the sections of `requirements` that `entity` lacks.
    ///
    /// If the entity changed since it was read, it is loaded again.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the entity belongs to another collection or no
    /// longer exists.
    pub fn enrich_entity(
        &self,
        txn: Option<&Transaction>,
        entity: &SealedEntity,
        requirements: &EntityContentRequirements,
    ) -> CoreResult<SealedEntity> {
        if entity.entity_type() != self.entity_type {
            return Err(CoreError::invalid_request(format!(
                "entity of type `{}` cannot be enriched by collection `{}`",
                entity.entity_type(),
                self.entity_type
            )));
        }
        if entity.requirements().covers(requirements) {
            return Ok(entity.clone());
        }
        let wider = entity.requirements().union(requirements);
        let pk = entity.primary_key();
        let gone = || CoreError::invalid_request(format!("entity {}:{pk} no longer exists", self.entity_type));
        let body = self
            .read_record::<EntityBody>(txn, &body_key(pk))?
            .ok_or_else(gone)?;
        if body.version != entity.version() {
            tracing::debug!(entity_type = %self.entity_type, pk, "entity changed, refetching");
            let fresh = self.fetch_entity(txn, pk, &wider)?.ok_or_else(gone)?;
            return Ok(SealedEntity::new(Arc::new(fresh), wider));
        }
        let mut enriched = Entity::clone(entity.entity());
        self.fill(txn, &mut enriched, entity.requirements(), &wider)?;
        Ok(SealedEntity::new(Arc::new(enriched), wider))
    }

    /// Hides sections of `entity` beyond `requirements`. Never does I/O.
    #[must_use]
    pub fn limit_entity(
        &self,
        entity: &SealedEntity,
        requirements: &EntityContentRequirements,
    ) -> SealedEntity {
        entity.limit(requirements)
    }

    /// Number of entities visible to `txn`.
    #[must_use]
    pub fn size(&self, txn: Option<&Transaction>) -> usize {
        self.index_view(txn, &EntityIndexKey::Global)
            .and_then(|index| index.as_global().map(|global| global.len()))
            .unwrap_or(0)
    }

    /// Whether entity `primary_key` is visible to `txn`.
    #[must_use]
    pub fn contains(&self, txn: Option<&Transaction>, primary_key: PrimaryKey) -> bool {
        self.index_view(txn, &EntityIndexKey::Global)
            .and_then(|index| index.as_global().map(|global| global.contains(primary_key)))
            .unwrap_or(false)
    }

    /// Primary keys of all entities visible to `txn`, ascending.
    #[must_use]
    pub fn entity_primary_keys(&self, txn: Option<&Transaction>) -> Vec<PrimaryKey> {
        self.lookup(txn, &EntityIndexKey::Global, &IndexLookup::AllEntities)
    }

    /// Runs `query` against the entity index `index`; an absent index
    /// yields no keys.
    #[must_use]
    pub fn lookup(
        &self,
        txn: Option<&Transaction>,
        index: &EntityIndexKey,
        query: &IndexLookup,
    ) -> Vec<PrimaryKey> {
        self.index_view(txn, index)
            .map(|index| index.lookup(query))
            .unwrap_or_default()
    }

    fn write<R>(
        &self,
        txn: &Transaction,
        f: impl FnOnce(&EntityMutator<'_>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let result = txn
            .collection_for_write(&self.entity_type)
            .and_then(|layer| {
                if layer.base().collection_id != self.collection_id {
                    return Err(CoreError::invalid_request(format!(
                        "collection `{}` ({}) is not part of transaction {}",
                        self.entity_type,
                        self.collection_id,
                        txn.id()
                    )));
                }
                f(&EntityMutator::new(txn, &layer))
            });
        if let Err(err) = &result {
            tracing::debug!(entity_type = %self.entity_type, txn = %txn.id(), error = %err, "write failed, marking rollback only");
            txn.set_rollback_only();
        }
        result
    }

    /// Inserts or updates an entity, or removes it for
    /// [`EntityMutation::Remove`].
    ///
    /// # Errors
    ///
    /// Identity, version or schema violations. Any error marks `txn`
    /// rollback-only.
    pub fn upsert_entity(
        &self,
        txn: &Transaction,
        mutation: &EntityMutation,
    ) -> CoreResult<EntityReference> {
        if mutation.entity_type() != self.entity_type {
            txn.set_rollback_only();
            return Err(CoreError::invalid_request(format!(
                "mutation of `{}` applied to collection `{}`",
                mutation.entity_type(),
                self.entity_type
            )));
        }
        self.write(txn, |mutator| mutator.apply(mutation))
    }

    /// Removes entity `primary_key`; `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Storage failures. Any error marks `txn` rollback-only.
    pub fn delete_entity(&self, txn: &Transaction, primary_key: PrimaryKey) -> CoreResult<bool> {
        self.write(txn, |mutator| mutator.delete(primary_key))
    }

    /// Removes entity `primary_key` and all its hierarchical descendants,
    /// returning how many entities were removed.
    ///
    /// # Errors
    ///
    /// Storage failures. Any error marks `txn` rollback-only.
    pub fn delete_entity_and_subtree(
        &self,
        txn: &Transaction,
        primary_key: PrimaryKey,
    ) -> CoreResult<usize> {
        self.write(txn, |mutator| mutator.delete_subtree(primary_key))
    }

    /// Merges a transaction layer into a new collection value.
    ///
    /// Nothing is written to storage; changes stay buffered until
    /// [`EntityCollection::flush`].
    pub(crate) fn commit_layer(&self, layer: &CollectionLayer, writes: PendingWrites) -> Self {
        let delta = layer.take_delta();
        let staged_schema = layer.schema_cell().staged();
        if delta.indexes.is_empty() && staged_schema.is_none() && writes.is_empty() {
            return self.clone();
        }

        let mut next = self.clone();
        for (key, change) in delta.indexes.changes() {
            let previous = self.indexes.get(key).map(|index| index.id());
            match change {
                Some(index) => {
                    next.dirty_indexes.insert(key.clone());
                    if let Some(id) = previous.filter(|id| *id != index.id()) {
                        next.removed_index_ids.insert(id);
                    }
                }
                None => {
                    next.dirty_indexes.remove(key);
                    if let Some(id) = previous {
                        next.removed_index_ids.insert(id);
                    }
                }
            }
        }
        next.indexes = self.indexes.commit(delta.indexes);

        if let Some(schema) = staged_schema {
            next.schema = schema;
            next.schema_dirty = true;
        }

        let mut buffered = LayerDelta::new();
        for (key, payload) in writes.into_records() {
            buffered.write(key, payload);
        }
        next.buffered = self.buffered.commit(buffered);
        next.version = self.version + 1;
        next
    }

    /// Writes buffered changes to the record store as transaction `txid`.
    ///
    /// A clean collection is returned as is, without any I/O.
    ///
    /// # Errors
    ///
    /// Storage failures; nothing staged by the failed flush survives.
    pub fn flush(self: &Arc<Self>, txid: u64) -> CoreResult<Arc<Self>> {
        if !self.is_dirty() {
            return Ok(Arc::clone(self));
        }
        let outcome = match self.write_dirty(txid) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.store.discard(txid);
                return Err(err);
            }
        };
        let header = self.flushed_header(txid, &outcome)?;
        tracing::debug!(
            entity_type = %self.entity_type,
            version = self.version,
            records = header.record_count,
            key_table_version = outcome.version,
            "flushed collection"
        );
        Ok(Arc::new(Self {
            key_table: outcome.key_table,
            buffered: VersionedMap::new(),
            dirty_indexes: BTreeSet::new(),
            removed_index_ids: BTreeSet::new(),
            schema_dirty: false,
            header: Arc::new(header),
            ..Self::clone(self)
        }))
    }

    fn write_dirty(&self, txid: u64) -> CoreResult<FlushOutcome> {
        for (key, payload) in self.buffered.iter() {
            match payload {
                Some(bytes) => self.store.put(txid, key.clone(), bytes.to_vec())?,
                None => self.store.remove(txid, key.clone())?,
            }
        }
        for key in &self.dirty_indexes {
            if let Some(index) = self.indexes.get(key) {
                self.store
                    .put(txid, index_key(index.id()), encode_part(index.as_ref())?.to_vec())?;
            }
        }
        for id in &self.removed_index_ids {
            self.store.remove(txid, index_key(*id))?;
        }
        if self.schema_dirty {
            self.store
                .put(txid, schema_key(), encode_part(self.schema.as_ref())?.to_vec())?;
        }
        Ok(self.store.flush(txid, &self.key_table)?)
    }

    fn flushed_header(&self, txid: u64, outcome: &FlushOutcome) -> CoreResult<CollectionHeader> {
        let global = self.indexes.get(&EntityIndexKey::Global);
        let last_index_id = self
            .shared
            .sequences
            .current(SequenceKind::IndexId(self.collection_id));
        Ok(CollectionHeader {
            entity_type: self.entity_type.clone(),
            collection_id: self.collection_id,
            version: self.version,
            record_count: global
                .and_then(|index| index.as_global())
                .map_or(0, |global| global.len() as u64),
            last_primary_key: self
                .shared
                .sequences
                .current(SequenceKind::PrimaryKey(self.collection_id)),
            last_index_id: u32::try_from(last_index_id)
                .map_err(|_| CoreError::consistency("entity index ids exhausted"))?,
            storage_location: Some(outcome.location),
            compressed_keys: outcome.key_table.compressed_keys().clone(),
            key_table_version: outcome.version,
            global_index_id: global.map(|index| index.id()),
            reduced_index_ids: self
                .indexes
                .values()
                .filter_map(|index| index.as_reduced().map(|reduced| reduced.id()))
                .collect(),
            schema_version: self.schema.version,
            last_transaction_id: txid,
        })
    }
}
