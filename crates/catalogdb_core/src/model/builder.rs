//! The entity builder.
//!
//! One concrete builder edits any entity. It compares every change against
//! the entity it was opened on and emits only the mutations that actually
//! differ from it.

use crate::model::entity::Entity;
use crate::model::mutation::{EntityExistence, EntityMutation, LocalMutation};
use crate::model::price::{PriceInnerRecordHandling, PriceKey, PriceValue};
use crate::model::reference::ReferenceKey;
use crate::model::value::AttributeValue;
use crate::types::PrimaryKey;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Unit a pending change targets. Variant order is emission order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Unit {
    Parent,
    Attribute(String),
    AssociatedData(String),
    PriceHandling,
    Price(PriceKey),
    Reference(ReferenceKey),
    ReferenceAttribute(ReferenceKey, String),
    ReferenceGroup(ReferenceKey),
}

/// Records changes to an entity as a minimal [`EntityMutation`].
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    entity_type: String,
    primary_key: Option<PrimaryKey>,
    base: Option<Arc<Entity>>,
    changes: BTreeMap<Unit, LocalMutation>,
}

impl EntityBuilder {
    /// Starts a new entity whose primary key will be generated.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            primary_key: None,
            base: None,
            changes: BTreeMap::new(),
        }
    }

    /// Starts a new entity with a supplied primary key.
    pub fn with_primary_key(entity_type: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            primary_key: Some(primary_key),
            ..Self::new(entity_type)
        }
    }

    /// Opens an existing entity for editing.
    #[must_use]
    pub fn from_entity(entity: Arc<Entity>) -> Self {
        Self {
            entity_type: entity.entity_type.clone(),
            primary_key: Some(entity.primary_key),
            base: Some(entity),
            changes: BTreeMap::new(),
        }
    }

    fn record(&mut self, unit: Unit, differs: bool, mutation: LocalMutation) -> &mut Self {
        if differs {
            self.changes.insert(unit, mutation);
        } else {
            self.changes.remove(&unit);
        }
        self
    }

    /// Sets an attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        let differs = self.base.as_ref().and_then(|e| e.attribute(&name)) != Some(&value);
        self.record(
            Unit::Attribute(name.clone()),
            differs,
            LocalMutation::UpsertAttribute {
                name,
                value,
                expected_version: None,
            },
        )
    }

    /// Removes an attribute.
    pub fn remove_attribute(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        let differs = self.base.as_ref().and_then(|e| e.attribute(&name)).is_some();
        self.record(
            Unit::Attribute(name.clone()),
            differs,
            LocalMutation::RemoveAttribute {
                name,
                expected_version: None,
            },
        )
    }

    /// Sets an associated data value.
    pub fn set_associated_data(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> &mut Self {
        let name = name.into();
        let value = value.into();
        let differs = self.base.as_ref().and_then(|e| e.associated_data(&name)) != Some(&value);
        self.record(
            Unit::AssociatedData(name.clone()),
            differs,
            LocalMutation::UpsertAssociatedData {
                name,
                value,
                expected_version: None,
            },
        )
    }

    /// Removes an associated data value.
    pub fn remove_associated_data(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        let differs = self
            .base
            .as_ref()
            .and_then(|e| e.associated_data(&name))
            .is_some();
        self.record(
            Unit::AssociatedData(name.clone()),
            differs,
            LocalMutation::RemoveAssociatedData {
                name,
                expected_version: None,
            },
        )
    }

    /// Sets a price.
    pub fn set_price(&mut self, key: PriceKey, value: PriceValue) -> &mut Self {
        let differs = self
            .base
            .as_ref()
            .and_then(|e| e.price(&key))
            .filter(|p| !p.dropped)
            .map_or(true, |p| p.value != value);
        self.record(
            Unit::Price(key.clone()),
            differs,
            LocalMutation::UpsertPrice {
                key,
                value,
                expected_version: None,
            },
        )
    }

    /// Removes a price.
    pub fn remove_price(&mut self, key: PriceKey) -> &mut Self {
        let differs = self
            .base
            .as_ref()
            .and_then(|e| e.price(&key))
            .is_some_and(|p| !p.dropped);
        self.record(
            Unit::Price(key.clone()),
            differs,
            LocalMutation::RemovePrice {
                key,
                expected_version: None,
            },
        )
    }

    /// Sets the price inner record handling.
    pub fn set_price_inner_record_handling(&mut self, handling: PriceInnerRecordHandling) -> &mut Self {
        let current = self
            .base
            .as_ref()
            .map_or(PriceInnerRecordHandling::None, |e| e.price_inner_record_handling());
        self.record(
            Unit::PriceHandling,
            current != handling,
            LocalMutation::SetPriceInnerRecordHandling(handling),
        )
    }

    fn has_live_reference(&self, key: &ReferenceKey) -> bool {
        self.base
            .as_ref()
            .and_then(|e| e.reference(key))
            .is_some_and(|r| !r.dropped)
    }

    /// Adds a reference.
    pub fn set_reference(&mut self, referenced_entity_type: impl Into<String>, primary_key: PrimaryKey) -> &mut Self {
        let key = ReferenceKey::new(referenced_entity_type, primary_key);
        let differs = !self.has_live_reference(&key);
        self.record(
            Unit::Reference(key.clone()),
            differs,
            LocalMutation::UpsertReference {
                key,
                expected_version: None,
            },
        )
    }

    /// Removes a reference together with pending changes to it.
    pub fn remove_reference(&mut self, referenced_entity_type: impl Into<String>, primary_key: PrimaryKey) -> &mut Self {
        let key = ReferenceKey::new(referenced_entity_type, primary_key);
        self.changes.retain(|unit, _| match unit {
            Unit::ReferenceAttribute(k, _) | Unit::ReferenceGroup(k) => *k != key,
            _ => true,
        });
        let differs = self.has_live_reference(&key);
        self.record(
            Unit::Reference(key.clone()),
            differs,
            LocalMutation::RemoveReference {
                key,
                expected_version: None,
            },
        )
    }

    /// Sets an attribute on a reference, adding the reference if needed.
    pub fn set_reference_attribute(
        &mut self,
        referenced_entity_type: impl Into<String>,
        primary_key: PrimaryKey,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> &mut Self {
        let key = ReferenceKey::new(referenced_entity_type, primary_key);
        if !self.has_live_reference(&key) {
            self.set_reference(key.referenced_entity_type.clone(), primary_key);
        }
        let name = name.into();
        let value = value.into();
        let differs = self
            .base
            .as_ref()
            .and_then(|e| e.reference(&key))
            .filter(|r| !r.dropped)
            .and_then(|r| r.attribute(&name))
            != Some(&value);
        self.record(
            Unit::ReferenceAttribute(key.clone(), name.clone()),
            differs,
            LocalMutation::UpsertReferenceAttribute {
                reference: key,
                name,
                value,
                expected_version: None,
            },
        )
    }

    /// Sets the group of a reference, adding the reference if needed.
    pub fn set_reference_group(
        &mut self,
        referenced_entity_type: impl Into<String>,
        primary_key: PrimaryKey,
        group_type: impl Into<String>,
        group_primary_key: PrimaryKey,
    ) -> &mut Self {
        let key = ReferenceKey::new(referenced_entity_type, primary_key);
        if !self.has_live_reference(&key) {
            self.set_reference(key.referenced_entity_type.clone(), primary_key);
        }
        let group_type = group_type.into();
        let differs = !self
            .base
            .as_ref()
            .and_then(|e| e.reference(&key))
            .filter(|r| !r.dropped)
            .and_then(|r| r.group())
            .is_some_and(|g| g.entity_type == group_type && g.primary_key == group_primary_key);
        self.record(
            Unit::ReferenceGroup(key.clone()),
            differs,
            LocalMutation::SetReferenceGroup {
                reference: key,
                group_type,
                group_primary_key,
                expected_version: None,
            },
        )
    }

    /// Places the entity under `parent`.
    pub fn set_parent(&mut self, parent: PrimaryKey) -> &mut Self {
        let differs = self.base.as_ref().and_then(|e| e.parent()) != Some(parent);
        self.record(Unit::Parent, differs, LocalMutation::SetParent { parent })
    }

    /// Makes the entity a hierarchy root.
    pub fn remove_parent(&mut self) -> &mut Self {
        let differs = self.base.as_ref().and_then(|e| e.parent()).is_some();
        self.record(Unit::Parent, differs, LocalMutation::RemoveParent)
    }

    /// Returns whether nothing differs from the base entity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// The local mutations in application order.
    #[must_use]
    pub fn local_mutations(&self) -> Vec<LocalMutation> {
        self.changes.values().cloned().collect()
    }

    /// Builds the entity mutation.
    #[must_use]
    pub fn to_mutation(&self) -> EntityMutation {
        EntityMutation::Upsert {
            entity_type: self.entity_type.clone(),
            primary_key: self.primary_key,
            existence: if self.base.is_some() {
                EntityExistence::MustExist
            } else {
                EntityExistence::MayExist
            },
            mutations: self.local_mutations(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn create_base() -> Arc<Entity> {
        let mut entity = Entity::new("product", 10);
        for mutation in [
            LocalMutation::upsert_attribute("code", "phone"),
            LocalMutation::upsert_attribute("stock", 3_i64),
            LocalMutation::upsert_reference("brand", 1),
        ] {
            entity.apply(&mutation).unwrap();
        }
        Arc::new(entity)
    }

    #[test]
    fn new_entity_emits_everything() {
        let mut builder = EntityBuilder::new("product");
        builder
            .set_attribute("code", "phone")
            .set_price(
                PriceKey::new(1, "basic", "EUR"),
                PriceValue::new(Decimal::ONE, Decimal::ZERO, Decimal::ONE),
            )
            .set_parent(4);
        let EntityMutation::Upsert {
            primary_key,
            existence,
            mutations,
            ..
        } = builder.to_mutation()
        else {
            panic!("expected upsert");
        };
        assert_eq!(primary_key, None);
        assert_eq!(existence, EntityExistence::MayExist);
        assert_eq!(mutations.len(), 3);
        assert_eq!(mutations[0], LocalMutation::SetParent { parent: 4 });
    }

    #[test]
    fn only_differences_are_emitted() {
        let mut builder = EntityBuilder::from_entity(create_base());
        builder
            .set_attribute("code", "phone")
            .set_attribute("stock", 2_i64)
            .set_reference("brand", 1);
        assert_eq!(
            builder.local_mutations(),
            vec![LocalMutation::upsert_attribute("stock", 2_i64)]
        );
    }

    #[test]
    fn reverting_a_change_cancels_it() {
        let mut builder = EntityBuilder::from_entity(create_base());
        builder.set_attribute("stock", 2_i64).set_attribute("stock", 3_i64);
        assert!(builder.is_empty());
        builder.remove_attribute("missing");
        assert!(builder.is_empty());
    }

    #[test]
    fn removing_reference_drops_its_pending_changes() {
        let mut builder = EntityBuilder::from_entity(create_base());
        builder
            .set_reference_attribute("brand", 1, "order", 1_i64)
            .remove_reference("brand", 1);
        assert_eq!(builder.local_mutations().len(), 1);
        assert!(matches!(
            builder.local_mutations()[0],
            LocalMutation::RemoveReference { .. }
        ));
    }

    #[test]
    fn reference_attribute_adds_reference_first() {
        let mut builder = EntityBuilder::with_primary_key("product", 3);
        builder.set_reference_attribute("category", 8, "priority", 1_i64);
        let mutations = builder.local_mutations();
        assert_eq!(mutations.len(), 2);
        assert!(matches!(mutations[0], LocalMutation::UpsertReference { .. }));
    }
}
