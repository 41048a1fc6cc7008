//! Entity schemas and their evolution.
//!
//! A schema grows implicitly: the first write that uses a new attribute,
//! associated data key, reference, price or parent extends it, if its
//! [`EvolutionMode`]s allow. Each extension bumps the schema version.

use crate::error::{CoreError, CoreResult};
use crate::layer::{Versioned, VersionedCell};
use crate::model::{AttributeType, AttributeValue, LocalMutation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Kind of implicit schema change a collection accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EvolutionMode {
    /// New attributes (entity or reference level).
    AddingAttributes,
    /// New associated data keys.
    AddingAssociatedData,
    /// New references and reference groups.
    AddingReferences,
    /// Enabling prices.
    AddingPrices,
    /// Enabling hierarchy placement.
    AddingHierarchy,
    /// Switching primary key generation while the collection is empty.
    AdaptingPrimaryKeyGeneration,
}

impl EvolutionMode {
    /// Every mode.
    pub const ALL: [Self; 6] = [
        Self::AddingAttributes,
        Self::AddingAssociatedData,
        Self::AddingReferences,
        Self::AddingPrices,
        Self::AddingHierarchy,
        Self::AdaptingPrimaryKeyGeneration,
    ];
}

/// Schema of an attribute or associated data key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    /// Value type every write must match.
    pub value_type: AttributeType,
}

/// Schema of a reference to another entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSchema {
    /// Whether the referenced type is a collection of the same catalog.
    pub managed: bool,
    /// Group entity type, once a group was set.
    pub group_type: Option<String>,
    /// Attributes of the reference.
    pub attributes: BTreeMap<String, AttributeSchema>,
}

/// Schema of an entity collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type.
    pub name: String,
    /// Incremented on every change.
    pub version: u64,
    /// Whether primary keys are assigned by the collection.
    pub generated_primary_key: bool,
    /// Whether entities may have a hierarchical parent.
    pub with_hierarchy: bool,
    /// Whether entities may have prices.
    pub with_price: bool,
    /// Entity attributes.
    pub attributes: BTreeMap<String, AttributeSchema>,
    /// Associated data keys.
    pub associated_data: BTreeMap<String, AttributeSchema>,
    /// References by referenced entity type.
    pub references: BTreeMap<String, ReferenceSchema>,
    /// Allowed implicit changes.
    pub evolution: BTreeSet<EvolutionMode>,
}

impl Versioned for EntitySchema {
    fn version(&self) -> u64 {
        self.version
    }
}

fn check_type(
    target: &mut BTreeMap<String, AttributeSchema>,
    allowed: bool,
    what: &str,
    name: &str,
    value: &AttributeValue,
) -> CoreResult<bool> {
    match target.get(name) {
        Some(schema) if schema.value_type == value.value_type() => Ok(false),
        Some(schema) => Err(CoreError::invalid_request(format!(
            "{what} `{name}` is {:?}, got {:?}",
            schema.value_type,
            value.value_type()
        ))),
        None if allowed => {
            target.insert(
                name.to_owned(),
                AttributeSchema {
                    value_type: value.value_type(),
                },
            );
            Ok(true)
        }
        None => Err(CoreError::invalid_request(format!(
            "{what} `{name}` is not in the schema and may not be added"
        ))),
    }
}

impl EntitySchema {
    /// Creates an empty schema accepting every evolution.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            generated_primary_key: false,
            with_hierarchy: false,
            with_price: false,
            attributes: BTreeMap::new(),
            associated_data: BTreeMap::new(),
            references: BTreeMap::new(),
            evolution: EvolutionMode::ALL.into_iter().collect(),
        }
    }

    /// Sets whether primary keys are generated.
    #[must_use]
    pub fn with_generated_primary_key(mut self, generated: bool) -> Self {
        self.generated_primary_key = generated;
        self
    }

    /// Restricts implicit evolution to `modes`.
    #[must_use]
    pub fn with_evolution(mut self, modes: impl IntoIterator<Item = EvolutionMode>) -> Self {
        self.evolution = modes.into_iter().collect();
        self
    }

    /// Declares an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value_type: AttributeType) -> Self {
        self.attributes.insert(name.into(), AttributeSchema { value_type });
        self
    }

    /// Returns whether `mode` is allowed.
    #[must_use]
    pub fn allows(&self, mode: EvolutionMode) -> bool {
        self.evolution.contains(&mode)
    }

    /// Returns the schema extended to accept `mutations`, or `None` if it
    /// already does.
    ///
    /// `is_collection` tells whether an entity type is a collection of the
    /// same catalog; it decides whether new references are managed.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if a value contradicts a declared type or an
    /// evolution mode forbids a needed change.
    pub fn evolve_for(
        &self,
        mutations: &[LocalMutation],
        is_collection: impl Fn(&str) -> bool,
    ) -> CoreResult<Option<Self>> {
        let mut next = self.clone();
        let mut changed = false;
        for mutation in mutations {
            changed |= next.accept(mutation, &is_collection)?;
        }
        if changed {
            next.version = self.version + 1;
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }

    fn require(&self, mode: EvolutionMode, what: impl FnOnce() -> String) -> CoreResult<()> {
        if self.allows(mode) {
            Ok(())
        } else {
            Err(CoreError::invalid_request(format!(
                "schema `{}` does not allow {}",
                self.name,
                what()
            )))
        }
    }

    fn accept(&mut self, mutation: &LocalMutation, is_collection: &impl Fn(&str) -> bool) -> CoreResult<bool> {
        let adding_attributes = self.allows(EvolutionMode::AddingAttributes);
        match mutation {
            LocalMutation::UpsertAttribute { name, value, .. } => {
                check_type(&mut self.attributes, adding_attributes, "attribute", name, value)
            }
            LocalMutation::UpsertAssociatedData { name, value, .. } => {
                let allowed = self.allows(EvolutionMode::AddingAssociatedData);
                check_type(&mut self.associated_data, allowed, "associated data", name, value)
            }
            LocalMutation::UpsertPrice { .. } if !self.with_price => {
                self.require(EvolutionMode::AddingPrices, || "prices".into())?;
                self.with_price = true;
                Ok(true)
            }
            LocalMutation::SetParent { .. } if !self.with_hierarchy => {
                self.require(EvolutionMode::AddingHierarchy, || "hierarchy".into())?;
                self.with_hierarchy = true;
                Ok(true)
            }
            LocalMutation::UpsertReference { key, .. } => {
                if self.references.contains_key(&key.referenced_entity_type) {
                    return Ok(false);
                }
                self.require(EvolutionMode::AddingReferences, || {
                    format!("references to `{}`", key.referenced_entity_type)
                })?;
                self.references.insert(
                    key.referenced_entity_type.clone(),
                    ReferenceSchema {
                        managed: is_collection(&key.referenced_entity_type),
                        group_type: None,
                        attributes: BTreeMap::new(),
                    },
                );
                Ok(true)
            }
            LocalMutation::UpsertReferenceAttribute {
                reference,
                name,
                value,
                ..
            } => {
                let schema = self.reference_schema(&reference.referenced_entity_type)?;
                check_type(
                    &mut schema.attributes,
                    adding_attributes,
                    "reference attribute",
                    name,
                    value,
                )
            }
            LocalMutation::SetReferenceGroup {
                reference,
                group_type,
                ..
            } => {
                let allowed = self.allows(EvolutionMode::AddingReferences);
                let schema = self.reference_schema(&reference.referenced_entity_type)?;
                match &schema.group_type {
                    Some(existing) if existing == group_type => Ok(false),
                    Some(existing) => Err(CoreError::invalid_request(format!(
                        "references to `{}` are grouped by `{existing}`, not `{group_type}`",
                        reference.referenced_entity_type
                    ))),
                    None if allowed => {
                        schema.group_type = Some(group_type.clone());
                        Ok(true)
                    }
                    None => Err(CoreError::invalid_request(format!(
                        "reference groups of `{}` may not be added",
                        reference.referenced_entity_type
                    ))),
                }
            }
            _ => Ok(false),
        }
    }

    fn reference_schema(&mut self, referenced_entity_type: &str) -> CoreResult<&mut ReferenceSchema> {
        self.references.get_mut(referenced_entity_type).ok_or_else(|| {
            CoreError::invalid_request(format!(
                "no reference to `{referenced_entity_type}` in schema"
            ))
        })
    }

    /// Returns the schema with primary key generation switched.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` unless adapting primary key generation is allowed.
    pub fn adapt_primary_key_generation(&self, generated: bool) -> CoreResult<Self> {
        self.require(EvolutionMode::AdaptingPrimaryKeyGeneration, || {
            "changing primary key generation".into()
        })?;
        let mut next = self.clone();
        next.generated_primary_key = generated;
        next.version = self.version + 1;
        Ok(next)
    }
}

/// Runs an optimistic schema update on `cell`.
///
/// `evolve` maps the current schema to its replacement (`None` when no
/// change is needed). If another writer replaced the schema meanwhile, the
/// update is retried on the winner, up to `attempts` times. The first
/// attempt always runs, even with a budget of zero.
///
/// # Errors
///
/// Errors from `evolve`, or `SchemaConflict` once the attempts run out.
pub fn update_schema<F>(cell: &VersionedCell<EntitySchema>, attempts: u32, mut evolve: F) -> CoreResult<Arc<EntitySchema>>
where
    F: FnMut(&EntitySchema) -> CoreResult<Option<EntitySchema>>,
{
    let attempts = attempts.max(1);
    let mut current = cell.get();
    for attempt in 1..=attempts {
        let Some(next) = evolve(&current)? else {
            return Ok(current);
        };
        match cell.compare_and_set(current.version, Arc::new(next)) {
            Ok(updated) => return Ok(updated),
            Err(winner) => {
                tracing::warn!(
                    entity_type = %current.name,
                    attempt,
                    "schema changed concurrently, retrying"
                );
                current = winner;
            }
        }
    }
    Err(CoreError::SchemaConflict {
        entity_type: current.name.clone(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PriceKey, PriceValue, ReferenceKey};
    use rust_decimal::Decimal;

    fn create_schema() -> EntitySchema {
        EntitySchema::new("product")
    }

    #[test]
    fn evolves_for_new_units() {
        let schema = create_schema();
        let mutations = [
            LocalMutation::upsert_attribute("code", "phone"),
            LocalMutation::upsert_price(
                PriceKey::new(1, "basic", "EUR"),
                PriceValue::new(Decimal::ONE, Decimal::ZERO, Decimal::ONE),
            ),
            LocalMutation::upsert_reference("brand", 1),
        ];
        let evolved = schema
            .evolve_for(&mutations, |t| t == "brand")
            .unwrap()
            .unwrap();
        assert_eq!(evolved.version, 2);
        assert!(evolved.with_price);
        assert!(evolved.references["brand"].managed);
        assert_eq!(evolved.attributes["code"].value_type, AttributeType::String);
        assert!(evolved.evolve_for(&mutations, |_| true).unwrap().is_none());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let schema = create_schema().with_attribute("stock", AttributeType::Integer);
        let err = schema
            .evolve_for(&[LocalMutation::upsert_attribute("stock", "many")], |_| false)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
    }

    #[test]
    fn disallowed_evolution_is_rejected() {
        let schema = create_schema().with_evolution([EvolutionMode::AddingAttributes]);
        assert!(schema
            .evolve_for(&[LocalMutation::SetParent { parent: 1 }], |_| false)
            .is_err());
        assert!(schema.adapt_primary_key_generation(true).is_err());
    }

    #[test]
    fn reference_attribute_needs_reference() {
        let schema = create_schema();
        let attribute = LocalMutation::UpsertReferenceAttribute {
            reference: ReferenceKey::new("brand", 1),
            name: "order".into(),
            value: 1_i64.into(),
            expected_version: None,
        };
        assert!(schema.evolve_for(&[attribute.clone()], |_| false).is_err());
        let evolved = schema
            .evolve_for(&[LocalMutation::upsert_reference("brand", 1), attribute], |_| false)
            .unwrap()
            .unwrap();
        assert!(evolved.references["brand"].attributes.contains_key("order"));
    }

    #[test]
    fn update_retries_on_concurrent_change() {
        let cell = VersionedCell::new(Arc::new(create_schema()));
        let mut calls = 0;
        let updated = update_schema(&cell, 10, |current| {
            calls += 1;
            if calls == 1 {
                // another writer evolves the schema first
                let rival = current
                    .evolve_for(&[LocalMutation::upsert_attribute("ean", "1")], |_| false)?
                    .unwrap();
                cell.compare_and_set(current.version, Arc::new(rival)).unwrap();
            }
            current.evolve_for(&[LocalMutation::upsert_attribute("code", "x")], |_| false)
        })
        .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(updated.version, 3);
        assert!(updated.attributes.contains_key("ean"));
        assert!(updated.attributes.contains_key("code"));
    }

    #[test]
    fn update_gives_up_after_attempts() {
        let cell = VersionedCell::new(Arc::new(create_schema()));
        let err = update_schema(&cell, 3, |current| {
            let rival = current.adapt_primary_key_generation(!current.generated_primary_key)?;
            cell.compare_and_set(current.version, Arc::new(rival)).unwrap();
            current.evolve_for(&[LocalMutation::upsert_attribute("code", "x")], |_| false)
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::SchemaConflict { attempts: 3, .. }));
    }

    #[test]
    fn unchanged_schema_is_not_staged() {
        let cell = VersionedCell::new(Arc::new(create_schema()));
        let schema = update_schema(&cell, 10, |_| Ok(None)).unwrap();
        assert_eq!(schema.version, 1);
        assert!(cell.staged().is_none());
    }

    #[test]
    fn zero_budget_still_makes_one_attempt() {
        let cell = VersionedCell::new(Arc::new(create_schema()));
        let unchanged = update_schema(&cell, 0, |_| Ok(None)).unwrap();
        assert_eq!(unchanged.version, 1);

        let updated = update_schema(&cell, 0, |current| {
            current.evolve_for(&[LocalMutation::upsert_attribute("code", "x")], |_| false)
        })
        .unwrap();
        assert_eq!(updated.version, 2);
        assert!(updated.attributes.contains_key("code"));
    }
}
