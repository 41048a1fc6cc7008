//! Transaction-private state of one entity collection.

use super::EntityCollection;
use crate::error::{CoreError, CoreResult};
use crate::index::{EntityIndex, EntityIndexKey};
use crate::layer::{LayerDelta, VersionedCell, VersionedMap};
use crate::schema::EntitySchema;
use crate::types::IndexId;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Index changes a transaction made to one collection.
#[derive(Debug, Default)]
pub(crate) struct CollectionDelta {
    pub(crate) indexes: LayerDelta<EntityIndexKey, Arc<EntityIndex>>,
    /// Primary key policy settled by the first upsert of the transaction.
    pub(crate) generated_primary_key: Option<bool>,
}

impl CollectionDelta {
    pub(crate) fn index(
        &self,
        base: &VersionedMap<EntityIndexKey, Arc<EntityIndex>>,
        key: &EntityIndexKey,
    ) -> Option<Arc<EntityIndex>> {
        self.indexes.read(base, key).cloned()
    }

    /// Mutable access to an index, copied out of `base` on first touch.
    pub(crate) fn index_mut(
        &mut self,
        base: &VersionedMap<EntityIndexKey, Arc<EntityIndex>>,
        key: &EntityIndexKey,
    ) -> CoreResult<&mut EntityIndex> {
        self.indexes
            .entry_mut(base, key)
            .map(Arc::make_mut)
            .ok_or_else(|| CoreError::consistency(format!("entity index {key} does not exist")))
    }

    /// Like [`CollectionDelta::index_mut`], creating the index with an id
    /// from `next_id` when it does not exist yet.
    pub(crate) fn index_or_create(
        &mut self,
        base: &VersionedMap<EntityIndexKey, Arc<EntityIndex>>,
        key: &EntityIndexKey,
        next_id: impl FnOnce() -> CoreResult<IndexId>,
    ) -> CoreResult<&mut EntityIndex> {
        if self.indexes.read(base, key).is_none() {
            let index = EntityIndex::create(next_id()?, key);
            tracing::debug!(index = %key, id = %index.id(), "creating entity index");
            self.indexes.write(key.clone(), Arc::new(index));
        }
        self.index_mut(base, key)
    }

    pub(crate) fn drop_index(&mut self, key: &EntityIndexKey) {
        tracing::debug!(index = %key, "dropping empty entity index");
        self.indexes.remove(key.clone());
    }
}

/// A collection as seen by one transaction: the snapshot base, a staged
/// schema and the private index delta.
#[derive(Debug)]
pub(crate) struct CollectionLayer {
    base: Arc<EntityCollection>,
    created: bool,
    schema: VersionedCell<EntitySchema>,
    state: Mutex<CollectionDelta>,
}

impl CollectionLayer {
    pub(crate) fn new(base: Arc<EntityCollection>, created: bool) -> Self {
        let schema = VersionedCell::new(Arc::clone(base.schema()));
        Self {
            base,
            created,
            schema,
            state: Mutex::new(CollectionDelta::default()),
        }
    }

    pub(crate) fn base(&self) -> &Arc<EntityCollection> {
        &self.base
    }

    /// Whether the transaction created this collection.
    pub(crate) fn is_created(&self) -> bool {
        self.created
    }

    pub(crate) fn schema(&self) -> Arc<EntitySchema> {
        self.schema.get()
    }

    pub(crate) fn schema_cell(&self) -> &VersionedCell<EntitySchema> {
        &self.schema
    }

    /// Reads an index through the delta.
    pub(crate) fn index(&self, key: &EntityIndexKey) -> Option<Arc<EntityIndex>> {
        self.state.lock().index(self.base.indexes(), key)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CollectionDelta> {
        self.state.lock()
    }

    /// Takes the delta out, leaving the layer empty.
    pub(crate) fn take_delta(&self) -> CollectionDelta {
        std::mem::take(&mut *self.state.lock())
    }
}
