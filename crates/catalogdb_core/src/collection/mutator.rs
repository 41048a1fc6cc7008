//! Applies entity mutations to a transaction's collection layer.
//!
//! Every accepted local mutation is routed to the indexes it affects:
//!
//! - attributes and prices go to the global index and to the reduced index
//!   of every live reference
//! - the parent goes to the global index only
//! - adding a reference inserts the entity into that reference's reduced
//!   index, removing one takes it out (dropping the index once empty)
//!
//! The changed entity parts are then registered as pending writes.

use super::layer::{CollectionDelta, CollectionLayer};
use super::parts::{
    associated_data_key, attributes_key, body_key, encode_part, prices_key, references_key,
    AttributesPart, EntityBody, PricesPart, ReferencesPart,
};
use super::EntityCollection;
use crate::error::{CoreError, CoreResult};
use crate::index::{EntityIndex, EntityIndexKey, IndexMaintainer, IndexMutation, IndexedPrice};
use crate::model::{
    AppliedChange, Entity, EntityContentRequirements, EntityExistence, EntityMutation,
    EntityReference, LocalMutation, ReferenceKey,
};
use crate::schema::update_schema;
use crate::sequence::SequenceKind;
use crate::transaction::Transaction;
use crate::types::{IndexId, PrimaryKey};
use std::collections::BTreeSet;

/// Entity parts that need rewriting.
#[derive(Debug, Default)]
struct DirtyParts {
    body: bool,
    attributes: bool,
    prices: bool,
    references: bool,
    associated_data: BTreeSet<String>,
}

impl DirtyParts {
    fn any(&self) -> bool {
        self.body
            || self.attributes
            || self.prices
            || self.references
            || !self.associated_data.is_empty()
    }
}

pub(super) struct EntityMutator<'a> {
    txn: &'a Transaction,
    layer: &'a CollectionLayer,
    collection: &'a EntityCollection,
}

impl<'a> EntityMutator<'a> {
    pub(super) fn new(txn: &'a Transaction, layer: &'a CollectionLayer) -> Self {
        Self {
            txn,
            layer,
            collection: layer.base(),
        }
    }

    pub(super) fn apply(&self, mutation: &EntityMutation) -> CoreResult<EntityReference> {
        match mutation {
            EntityMutation::Upsert {
                primary_key,
                existence,
                mutations,
                ..
            } => self.upsert(*primary_key, *existence, mutations),
            EntityMutation::Remove { primary_key, .. } => {
                if !self.delete(*primary_key)? {
                    return Err(CoreError::invalid_request(format!(
                        "cannot remove {}:{primary_key}: it does not exist",
                        self.collection.entity_type
                    )));
                }
                Ok(self.reference(*primary_key))
            }
        }
    }

    fn reference(&self, primary_key: PrimaryKey) -> EntityReference {
        EntityReference {
            entity_type: self.collection.entity_type.clone(),
            primary_key,
        }
    }

    fn upsert(
        &self,
        primary_key: Option<PrimaryKey>,
        existence: EntityExistence,
        mutations: &[LocalMutation],
    ) -> CoreResult<EntityReference> {
        let attempts = self.collection.shared.config.schema_update_attempts;
        update_schema(self.layer.schema_cell(), attempts, |schema| {
            schema.evolve_for(mutations, |entity_type| self.is_collection(entity_type))
        })?;

        let mut delta = self.layer.lock();
        let pk = self.resolve_primary_key(&mut delta, primary_key)?;
        let existing =
            self.collection
                .fetch_entity(Some(self.txn), pk, &EntityContentRequirements::all())?;
        match (existence, existing.is_some()) {
            (EntityExistence::MustNotExist, true) => {
                return Err(CoreError::invalid_request(format!(
                    "entity {}:{pk} already exists",
                    self.collection.entity_type
                )));
            }
            (EntityExistence::MustExist, false) => {
                return Err(CoreError::invalid_request(format!(
                    "entity {}:{pk} does not exist",
                    self.collection.entity_type
                )));
            }
            _ => {}
        }

        let is_new = existing.is_none();
        let mut entity =
            existing.unwrap_or_else(|| Entity::new(self.collection.entity_type.clone(), pk));
        let global = delta.index_or_create(
            self.collection.indexes(),
            &EntityIndexKey::Global,
            || self.next_index_id(),
        )?;
        if is_new {
            global.apply_mutation(pk, &IndexMutation::InsertEntity)?;
        }

        let mut dirty = DirtyParts {
            body: is_new,
            ..DirtyParts::default()
        };
        for mutation in mutations {
            self.apply_local(&mut delta, &mut entity, mutation, &mut dirty)?;
        }
        if dirty.any() {
            entity.version += 1;
            self.register_writes(&entity, &dirty)?;
        }
        tracing::trace!(
            entity_type = %self.collection.entity_type,
            pk,
            version = entity.version,
            created = is_new,
            "upserted entity"
        );
        Ok(self.reference(pk))
    }

    pub(super) fn delete(&self, primary_key: PrimaryKey) -> CoreResult<bool> {
        let mut delta = self.layer.lock();
        let Some(mut entity) = self.collection.fetch_entity(
            Some(self.txn),
            primary_key,
            &EntityContentRequirements::all(),
        )?
        else {
            return Ok(false);
        };
        let mut dirty = DirtyParts::default();
        for mutation in entity.to_removal_mutation() {
            self.apply_local(&mut delta, &mut entity, &mutation, &mut dirty)?;
        }
        delta
            .index_mut(self.collection.indexes(), &EntityIndexKey::Global)?
            .apply_mutation(primary_key, &IndexMutation::RemoveEntity)?;

        let entity_type = &self.collection.entity_type;
        self.txn.register_removal(entity_type, body_key(primary_key));
        self.txn.register_removal(entity_type, attributes_key(primary_key));
        self.txn.register_removal(entity_type, prices_key(primary_key));
        self.txn.register_removal(entity_type, references_key(primary_key));
        for name in &entity.associated_data_keys {
            self.txn
                .register_removal(entity_type, associated_data_key(primary_key, name));
        }
        tracing::trace!(entity_type = %entity_type, pk = primary_key, "removed entity");
        Ok(true)
    }

    /// Removes `primary_key` and its descendants, deepest first.
    pub(super) fn delete_subtree(&self, primary_key: PrimaryKey) -> CoreResult<usize> {
        let subtree = self
            .layer
            .index(&EntityIndexKey::Global)
            .and_then(|index| {
                index
                    .as_global()
                    .map(|global| global.list_subtree_including_self(primary_key))
            })
            .unwrap_or_default();
        let mut removed = 0;
        for pk in subtree.into_iter().rev() {
            if self.delete(pk)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn is_collection(&self, entity_type: &str) -> bool {
        match self.txn.collection_override(entity_type) {
            Some(exists) => exists,
            None => self
                .collection
                .catalog()
                .is_some_and(|catalog| catalog.collection(entity_type).is_some()),
        }
    }

    fn next_index_id(&self) -> CoreResult<IndexId> {
        let id = self
            .collection
            .shared
            .sequences
            .next(SequenceKind::IndexId(self.collection.collection_id));
        u32::try_from(id)
            .map(IndexId)
            .map_err(|_| CoreError::consistency("entity index ids exhausted"))
    }

    fn global_index(&self, delta: &CollectionDelta) -> Option<std::sync::Arc<EntityIndex>> {
        delta.index(self.collection.indexes(), &EntityIndexKey::Global)
    }

    fn exists(&self, delta: &CollectionDelta, primary_key: PrimaryKey) -> bool {
        self.global_index(delta)
            .and_then(|index| index.as_global().map(|global| global.contains(primary_key)))
            .unwrap_or(false)
    }

    fn is_empty(&self, delta: &CollectionDelta) -> bool {
        self.global_index(delta)
            .map_or(true, |index| index.is_empty())
    }

    /// Decides the primary key of an upsert.
    ///
    /// The first upsert of a transaction may flip the collection's key
    /// policy while the collection is empty.
    fn resolve_primary_key(
        &self,
        delta: &mut CollectionDelta,
        supplied: Option<PrimaryKey>,
    ) -> CoreResult<PrimaryKey> {
        let generated = match delta.generated_primary_key {
            Some(generated) => generated,
            None => {
                let generated = self.settle_key_policy(delta, supplied)?;
                delta.generated_primary_key = Some(generated);
                generated
            }
        };
        let entity_type = &self.collection.entity_type;
        match (generated, supplied) {
            (true, None) => Ok(self
                .collection
                .shared
                .sequences
                .next(SequenceKind::PrimaryKey(self.collection.collection_id))),
            (false, Some(pk)) if pk < 0 => Err(CoreError::invalid_request(format!(
                "primary key of `{entity_type}` must not be negative, got {pk}"
            ))),
            (false, Some(pk)) => {
                self.collection
                    .shared
                    .sequences
                    .ensure_at_least(SequenceKind::PrimaryKey(self.collection.collection_id), pk);
                Ok(pk)
            }
            (true, Some(pk)) if self.exists(delta, pk) => Ok(pk),
            (true, Some(pk)) => Err(CoreError::invalid_request(format!(
                "collection `{entity_type}` generates primary keys, cannot insert {pk}"
            ))),
            (false, None) => Err(CoreError::invalid_request(format!(
                "collection `{entity_type}` requires a primary key"
            ))),
        }
    }

    fn settle_key_policy(
        &self,
        delta: &CollectionDelta,
        supplied: Option<PrimaryKey>,
    ) -> CoreResult<bool> {
        let schema = self.layer.schema();
        let mismatch = match supplied {
            None => !schema.generated_primary_key,
            Some(pk) => schema.generated_primary_key && !self.exists(delta, pk),
        };
        if !mismatch || !self.is_empty(delta) {
            return Ok(schema.generated_primary_key);
        }
        let wanted = supplied.is_none();
        let attempts = self.collection.shared.config.schema_update_attempts;
        let adapted = update_schema(self.layer.schema_cell(), attempts, |schema| {
            if schema.generated_primary_key == wanted {
                return Ok(None);
            }
            schema.adapt_primary_key_generation(wanted).map(Some)
        })?;
        tracing::debug!(
            entity_type = %self.collection.entity_type,
            generated = adapted.generated_primary_key,
            "adapted primary key generation"
        );
        Ok(adapted.generated_primary_key)
    }

    fn apply_local(
        &self,
        delta: &mut CollectionDelta,
        entity: &mut Entity,
        mutation: &LocalMutation,
        dirty: &mut DirtyParts,
    ) -> CoreResult<()> {
        let pk = entity.primary_key;
        match entity.apply(mutation)? {
            AppliedChange::Unchanged => return Ok(()),
            AppliedChange::Attribute { name, old, new } => {
                dirty.attributes = true;
                self.route(delta, entity, &IndexMutation::Attribute { name, old, new })?;
            }
            AppliedChange::AssociatedData => {
                if let LocalMutation::UpsertAssociatedData { name, .. }
                | LocalMutation::RemoveAssociatedData { name, .. } = mutation
                {
                    dirty.associated_data.insert(name.clone());
                }
            }
            AppliedChange::Price { old, new } => {
                dirty.prices = true;
                let old = old.as_ref().and_then(IndexedPrice::of);
                let new = new.as_ref().and_then(IndexedPrice::of);
                if old.is_some() || new.is_some() {
                    self.route(delta, entity, &IndexMutation::Price { old, new })?;
                }
            }
            AppliedChange::PriceHandling => dirty.prices = true,
            AppliedChange::ReferenceAdded(key) => {
                dirty.references = true;
                self.join_reduced(delta, entity, &key)?;
            }
            AppliedChange::ReferenceRemoved(key) => {
                dirty.references = true;
                self.leave_reduced(delta, pk, &key)?;
            }
            AppliedChange::ReferenceUpdated => dirty.references = true,
            AppliedChange::Parent { old, new } => {
                delta
                    .index_mut(self.collection.indexes(), &EntityIndexKey::Global)?
                    .apply_mutation(pk, &IndexMutation::Parent { old, new })?;
            }
        }
        dirty.body = true;
        Ok(())
    }

    /// Sends `mutation` to the global index and every live reference's
    /// reduced index.
    fn route(
        &self,
        delta: &mut CollectionDelta,
        entity: &Entity,
        mutation: &IndexMutation,
    ) -> CoreResult<()> {
        let base = self.collection.indexes();
        let pk = entity.primary_key;
        delta
            .index_mut(base, &EntityIndexKey::Global)?
            .apply_mutation(pk, mutation)?;
        for reference in entity.references() {
            delta
                .index_mut(base, &EntityIndexKey::reduced(&reference.key))?
                .apply_mutation(pk, mutation)?;
        }
        Ok(())
    }

    fn join_reduced(
        &self,
        delta: &mut CollectionDelta,
        entity: &Entity,
        reference: &ReferenceKey,
    ) -> CoreResult<()> {
        let pk = entity.primary_key;
        let index = delta.index_or_create(
            self.collection.indexes(),
            &EntityIndexKey::reduced(reference),
            || self.next_index_id(),
        )?;
        index.apply_mutation(pk, &IndexMutation::InsertEntity)?;
        for (name, value) in entity.attributes() {
            index.apply_mutation(
                pk,
                &IndexMutation::Attribute {
                    name: name.to_owned(),
                    old: None,
                    new: Some(value.clone()),
                },
            )?;
        }
        for price in entity.prices().filter_map(IndexedPrice::of) {
            index.apply_mutation(
                pk,
                &IndexMutation::Price {
                    old: None,
                    new: Some(price),
                },
            )?;
        }
        Ok(())
    }

    fn leave_reduced(
        &self,
        delta: &mut CollectionDelta,
        primary_key: PrimaryKey,
        reference: &ReferenceKey,
    ) -> CoreResult<()> {
        let key = EntityIndexKey::reduced(reference);
        let index = delta.index_mut(self.collection.indexes(), &key)?;
        index.apply_mutation(primary_key, &IndexMutation::RemoveEntity)?;
        if index.is_empty() {
            delta.drop_index(&key);
        }
        Ok(())
    }

    fn register_writes(&self, entity: &Entity, dirty: &DirtyParts) -> CoreResult<()> {
        let entity_type = &self.collection.entity_type;
        let pk = entity.primary_key;
        let body = EntityBody {
            primary_key: pk,
            version: entity.version,
            parent: entity.parent,
            associated_data_keys: entity.associated_data_keys.clone(),
        };
        self.txn
            .register_write(entity_type, body_key(pk), encode_part(&body)?);
        if dirty.attributes {
            let part = AttributesPart {
                attributes: entity.attributes.clone(),
            };
            self.txn
                .register_write(entity_type, attributes_key(pk), encode_part(&part)?);
        }
        if dirty.prices {
            let part = PricesPart {
                inner_record_handling: entity.price_inner_record_handling.code(),
                prices: entity.prices.values().cloned().collect(),
            };
            self.txn
                .register_write(entity_type, prices_key(pk), encode_part(&part)?);
        }
        if dirty.references {
            let part = ReferencesPart {
                references: entity.references.values().cloned().collect(),
            };
            self.txn
                .register_write(entity_type, references_key(pk), encode_part(&part)?);
        }
        for name in &dirty.associated_data {
            if let Some(record) = entity.associated_data.get(name) {
                self.txn.register_write(
                    entity_type,
                    associated_data_key(pk, name),
                    encode_part(record)?,
                );
            }
        }
        Ok(())
    }
}
