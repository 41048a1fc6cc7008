//! Entities and their versioned units.
//!
//! Every unit an entity is made of (attribute, associated data, price,
//! reference, reference group) carries its own version. Removing a unit
//! leaves a tombstone (`dropped`) so that setting it again continues the
//! version sequence instead of restarting it.

use crate::error::{CoreError, CoreResult};
use crate::model::mutation::LocalMutation;
use crate::model::price::{Price, PriceInnerRecordHandling, PriceKey};
use crate::model::reference::{Reference, ReferenceGroup, ReferenceKey};
use crate::model::value::AttributeValue;
use crate::types::PrimaryKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A unit that is versioned and removed by tombstoning.
pub trait Droppable {
    /// Current version.
    fn version(&self) -> u64;
    /// Whether the unit is a tombstone.
    fn dropped(&self) -> bool;
}

/// A named attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRecord {
    /// The value (kept when dropped).
    pub value: AttributeValue,
    /// Version, incremented on every accepted change.
    pub version: u64,
    /// Tombstone flag.
    pub dropped: bool,
}

impl Droppable for AttributeRecord {
    fn version(&self) -> u64 {
        self.version
    }

    fn dropped(&self) -> bool {
        self.dropped
    }
}

/// A named associated data value, stored apart from the entity body.
pub type AssociatedDataRecord = AttributeRecord;

/// What a local mutation changed, as seen by the indexes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AppliedChange {
    Unchanged,
    Attribute {
        name: String,
        old: Option<AttributeValue>,
        new: Option<AttributeValue>,
    },
    AssociatedData,
    Price {
        old: Option<Price>,
        new: Option<Price>,
    },
    PriceHandling,
    ReferenceAdded(ReferenceKey),
    ReferenceRemoved(ReferenceKey),
    ReferenceUpdated,
    Parent {
        old: Option<PrimaryKey>,
        new: Option<PrimaryKey>,
    },
}

/// An entity: a primary key plus its versioned units.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub(crate) entity_type: String,
    pub(crate) primary_key: PrimaryKey,
    pub(crate) version: u64,
    pub(crate) parent: Option<PrimaryKey>,
    pub(crate) attributes: BTreeMap<String, AttributeRecord>,
    pub(crate) associated_data_keys: BTreeSet<String>,
    pub(crate) associated_data: BTreeMap<String, AssociatedDataRecord>,
    pub(crate) price_inner_record_handling: PriceInnerRecordHandling,
    pub(crate) prices: BTreeMap<PriceKey, Price>,
    pub(crate) references: BTreeMap<ReferenceKey, Reference>,
}

fn check_expected(unit: impl FnOnce() -> String, expected: Option<u64>, actual: u64) -> CoreResult<()> {
    match expected {
        Some(expected) if expected != actual => {
            Err(CoreError::version_mismatch(unit(), expected, actual))
        }
        _ => Ok(()),
    }
}

fn missing(unit: impl std::fmt::Display) -> CoreError {
    CoreError::invalid_request(format!("cannot remove {unit}: it does not exist"))
}

/// Applies an upsert to a versioned attribute map.
fn upsert_attribute(
    map: &mut BTreeMap<String, AttributeRecord>,
    unit: &str,
    name: &str,
    value: &AttributeValue,
    expected: Option<u64>,
) -> CoreResult<Option<Option<AttributeValue>>> {
    let existing = map.get(name);
    check_expected(
        || format!("{unit} `{name}`"),
        expected,
        existing.map_or(0, |a| a.version),
    )?;
    if existing.is_some_and(|a| !a.dropped && a.value == *value) {
        return Ok(None);
    }
    let old = existing.filter(|a| !a.dropped).map(|a| a.value.clone());
    let version = existing.map_or(1, |a| a.version + 1);
    map.insert(
        name.to_owned(),
        AttributeRecord {
            value: value.clone(),
            version,
            dropped: false,
        },
    );
    Ok(Some(old))
}

fn remove_attribute(
    map: &mut BTreeMap<String, AttributeRecord>,
    unit: &str,
    name: &str,
    expected: Option<u64>,
) -> CoreResult<AttributeValue> {
    let Some(existing) = map.get_mut(name).filter(|a| !a.dropped) else {
        return Err(missing(format_args!("{unit} `{name}`")));
    };
    check_expected(|| format!("{unit} `{name}`"), expected, existing.version)?;
    existing.dropped = true;
    existing.version += 1;
    Ok(existing.value.clone())
}

impl Entity {
    /// Creates an empty entity that was never stored.
    pub fn new(entity_type: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            entity_type: entity_type.into(),
            primary_key,
            version: 0,
            parent: None,
            attributes: BTreeMap::new(),
            associated_data_keys: BTreeSet::new(),
            associated_data: BTreeMap::new(),
            price_inner_record_handling: PriceInnerRecordHandling::None,
            prices: BTreeMap::new(),
            references: BTreeMap::new(),
        }
    }

    /// Entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Primary key.
    #[must_use]
    pub fn primary_key(&self) -> PrimaryKey {
        self.primary_key
    }

    /// Body version; 0 for an entity that was never stored.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Hierarchical parent.
    #[must_use]
    pub fn parent(&self) -> Option<PrimaryKey> {
        self.parent
    }

    /// Live attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .get(name)
            .filter(|a| !a.dropped)
            .map(|a| &a.value)
    }

    /// Attribute record, including tombstones.
    #[must_use]
    pub fn attribute_record(&self, name: &str) -> Option<&AttributeRecord> {
        self.attributes.get(name)
    }

    /// Live attributes in name order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes
            .iter()
            .filter(|(_, a)| !a.dropped)
            .map(|(name, a)| (name.as_str(), &a.value))
    }

    /// Live associated data value.
    #[must_use]
    pub fn associated_data(&self, name: &str) -> Option<&AttributeValue> {
        self.associated_data
            .get(name)
            .filter(|a| !a.dropped)
            .map(|a| &a.value)
    }

    /// Names of all associated data the entity ever stored.
    pub fn associated_data_keys(&self) -> impl Iterator<Item = &str> {
        self.associated_data_keys.iter().map(String::as_str)
    }

    /// Price inner record handling.
    #[must_use]
    pub fn price_inner_record_handling(&self) -> PriceInnerRecordHandling {
        self.price_inner_record_handling
    }

    /// All prices, including dropped and non-sellable ones.
    pub fn prices(&self) -> impl Iterator<Item = &Price> {
        self.prices.values()
    }

    /// Price by key, including tombstones.
    #[must_use]
    pub fn price(&self, key: &PriceKey) -> Option<&Price> {
        self.prices.get(key)
    }

    /// Live references.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.references.values().filter(|r| !r.dropped)
    }

    /// Reference by key, including tombstones.
    #[must_use]
    pub fn reference(&self, key: &ReferenceKey) -> Option<&Reference> {
        self.references.get(key)
    }

    /// Applies one local mutation and reports what changed.
    pub(crate) fn apply(&mut self, mutation: &LocalMutation) -> CoreResult<AppliedChange> {
        match mutation {
            LocalMutation::UpsertAttribute {
                name,
                value,
                expected_version,
            } => Ok(
                match upsert_attribute(&mut self.attributes, "attribute", name, value, *expected_version)? {
                    Some(old) => AppliedChange::Attribute {
                        name: name.clone(),
                        old,
                        new: Some(value.clone()),
                    },
                    None => AppliedChange::Unchanged,
                },
            ),
            LocalMutation::RemoveAttribute {
                name,
                expected_version,
            } => {
                let old = remove_attribute(&mut self.attributes, "attribute", name, *expected_version)?;
                Ok(AppliedChange::Attribute {
                    name: name.clone(),
                    old: Some(old),
                    new: None,
                })
            }
            LocalMutation::UpsertAssociatedData {
                name,
                value,
                expected_version,
            } => {
                let changed = upsert_attribute(
                    &mut self.associated_data,
                    "associated data",
                    name,
                    value,
                    *expected_version,
                )?;
                if changed.is_none() {
                    return Ok(AppliedChange::Unchanged);
                }
                self.associated_data_keys.insert(name.clone());
                Ok(AppliedChange::AssociatedData)
            }
            LocalMutation::RemoveAssociatedData {
                name,
                expected_version,
            } => {
                remove_attribute(
                    &mut self.associated_data,
                    "associated data",
                    name,
                    *expected_version,
                )?;
                Ok(AppliedChange::AssociatedData)
            }
            LocalMutation::UpsertPrice {
                key,
                value,
                expected_version,
            } => {
                let existing = self.prices.get(key);
                check_expected(
                    || key.to_string(),
                    *expected_version,
                    existing.map_or(0, |p| p.version),
                )?;
                if existing.is_some_and(|p| !p.dropped && p.value == *value) {
                    return Ok(AppliedChange::Unchanged);
                }
                let old = existing.filter(|p| !p.dropped).cloned();
                let price = Price {
                    key: key.clone(),
                    value: value.clone(),
                    version: existing.map_or(1, |p| p.version + 1),
                    dropped: false,
                };
                self.prices.insert(key.clone(), price.clone());
                Ok(AppliedChange::Price {
                    old,
                    new: Some(price),
                })
            }
            LocalMutation::RemovePrice {
                key,
                expected_version,
            } => {
                let Some(existing) = self.prices.get_mut(key).filter(|p| !p.dropped) else {
                    return Err(missing(key));
                };
                check_expected(|| key.to_string(), *expected_version, existing.version)?;
                let old = existing.clone();
                existing.dropped = true;
                existing.version += 1;
                Ok(AppliedChange::Price {
                    old: Some(old),
                    new: None,
                })
            }
            LocalMutation::SetPriceInnerRecordHandling(handling) => {
                if self.price_inner_record_handling == *handling {
                    return Ok(AppliedChange::Unchanged);
                }
                self.price_inner_record_handling = *handling;
                Ok(AppliedChange::PriceHandling)
            }
            LocalMutation::UpsertReference {
                key,
                expected_version,
            } => {
                let existing = self.references.get_mut(key);
                let actual = existing.as_ref().map_or(0, |r| r.version);
                check_expected(|| format!("reference {key}"), *expected_version, actual)?;
                match existing {
                    Some(reference) if !reference.dropped => Ok(AppliedChange::Unchanged),
                    Some(reference) => {
                        reference.dropped = false;
                        reference.version += 1;
                        Ok(AppliedChange::ReferenceAdded(key.clone()))
                    }
                    None => {
                        self.references.insert(key.clone(), Reference::new(key.clone()));
                        Ok(AppliedChange::ReferenceAdded(key.clone()))
                    }
                }
            }
            LocalMutation::RemoveReference {
                key,
                expected_version,
            } => {
                let reference = self.live_reference(key)?;
                check_expected(|| format!("reference {key}"), *expected_version, reference.version)?;
                reference.dropped = true;
                reference.version += 1;
                Ok(AppliedChange::ReferenceRemoved(key.clone()))
            }
            LocalMutation::UpsertReferenceAttribute {
                reference,
                name,
                value,
                expected_version,
            } => {
                let target = self.live_reference(reference)?;
                let changed = upsert_attribute(
                    &mut target.attributes,
                    "reference attribute",
                    name,
                    value,
                    *expected_version,
                )?;
                Ok(if changed.is_some() {
                    AppliedChange::ReferenceUpdated
                } else {
                    AppliedChange::Unchanged
                })
            }
            LocalMutation::RemoveReferenceAttribute {
                reference,
                name,
                expected_version,
            } => {
                let target = self.live_reference(reference)?;
                remove_attribute(
                    &mut target.attributes,
                    "reference attribute",
                    name,
                    *expected_version,
                )?;
                Ok(AppliedChange::ReferenceUpdated)
            }
            LocalMutation::SetReferenceGroup {
                reference,
                group_type,
                group_primary_key,
                expected_version,
            } => {
                let target = self.live_reference(reference)?;
                let existing = target.group.as_ref();
                check_expected(
                    || format!("group of reference {reference}"),
                    *expected_version,
                    existing.map_or(0, |g| g.version),
                )?;
                if existing.is_some_and(|g| {
                    !g.dropped && g.entity_type == *group_type && g.primary_key == *group_primary_key
                }) {
                    return Ok(AppliedChange::Unchanged);
                }
                let version = existing.map_or(1, |g| g.version + 1);
                target.group = Some(ReferenceGroup {
                    entity_type: group_type.clone(),
                    primary_key: *group_primary_key,
                    version,
                    dropped: false,
                });
                Ok(AppliedChange::ReferenceUpdated)
            }
            LocalMutation::RemoveReferenceGroup {
                reference,
                expected_version,
            } => {
                let target = self.live_reference(reference)?;
                let Some(group) = target.group.as_mut().filter(|g| !g.dropped) else {
                    return Err(missing(format_args!("group of reference {reference}")));
                };
                check_expected(
                    || format!("group of reference {reference}"),
                    *expected_version,
                    group.version,
                )?;
                group.dropped = true;
                group.version += 1;
                Ok(AppliedChange::ReferenceUpdated)
            }
            LocalMutation::SetParent { parent } => {
                if *parent == self.primary_key {
                    return Err(CoreError::invalid_request(format!(
                        "entity {} cannot be its own parent",
                        self.primary_key
                    )));
                }
                if self.parent == Some(*parent) {
                    return Ok(AppliedChange::Unchanged);
                }
                let old = self.parent.replace(*parent);
                Ok(AppliedChange::Parent {
                    old,
                    new: Some(*parent),
                })
            }
            LocalMutation::RemoveParent => {
                let Some(old) = self.parent.take() else {
                    return Err(missing("hierarchical parent"));
                };
                Ok(AppliedChange::Parent {
                    old: Some(old),
                    new: None,
                })
            }
        }
    }

    fn live_reference(&mut self, key: &ReferenceKey) -> CoreResult<&mut Reference> {
        self.references
            .get_mut(key)
            .filter(|r| !r.dropped)
            .ok_or_else(|| missing(format_args!("reference {key}")))
    }

    /// Mutations that drop every live unit of this entity.
    ///
    /// Each carries the unit's current version as its expected version.
    #[must_use]
    pub fn to_removal_mutation(&self) -> Vec<LocalMutation> {
        let attributes = self
            .attributes
            .iter()
            .filter(|(_, a)| !a.dropped)
            .map(|(name, a)| LocalMutation::RemoveAttribute {
                name: name.clone(),
                expected_version: Some(a.version),
            });
        let associated_data = self
            .associated_data
            .iter()
            .filter(|(_, a)| !a.dropped)
            .map(|(name, a)| LocalMutation::RemoveAssociatedData {
                name: name.clone(),
                expected_version: Some(a.version),
            });
        let prices = self
            .prices
            .values()
            .filter(|p| !p.dropped)
            .map(|p| LocalMutation::RemovePrice {
                key: p.key.clone(),
                expected_version: Some(p.version),
            });
        let references = self.references().map(|r| LocalMutation::RemoveReference {
            key: r.key.clone(),
            expected_version: Some(r.version),
        });
        let parent = self.parent.map(|_| LocalMutation::RemoveParent);
        attributes
            .chain(associated_data)
            .chain(prices)
            .chain(references)
            .chain(parent)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::price::PriceValue;
    use rust_decimal::Decimal;

    fn create_entity() -> Entity {
        Entity::new("product", 1)
    }

    fn basic_price() -> PriceKey {
        PriceKey::new(1, "basic", "EUR")
    }

    fn price_value(amount: i64) -> PriceValue {
        PriceValue::new(Decimal::new(amount, 0), Decimal::new(21, 0), Decimal::new(amount, 0))
    }

    fn upsert_price(amount: i64) -> LocalMutation {
        LocalMutation::UpsertPrice {
            key: basic_price(),
            value: price_value(amount),
            expected_version: None,
        }
    }

    #[test]
    fn attribute_versions_increment() {
        let mut entity = create_entity();
        for code in ["a", "b", "c"] {
            entity
                .apply(&LocalMutation::upsert_attribute("code", code))
                .unwrap();
        }
        assert_eq!(entity.attribute_record("code").unwrap().version, 3);
        assert_eq!(entity.attribute("code"), Some(&AttributeValue::from("c")));
    }

    #[test]
    fn same_value_is_unchanged() {
        let mut entity = create_entity();
        entity
            .apply(&LocalMutation::upsert_attribute("code", "a"))
            .unwrap();
        let change = entity
            .apply(&LocalMutation::upsert_attribute("code", "a"))
            .unwrap();
        assert_eq!(change, AppliedChange::Unchanged);
        assert_eq!(entity.attribute_record("code").unwrap().version, 1);
    }

    #[test]
    fn tombstone_continues_versioning() {
        let mut entity = create_entity();
        entity.apply(&upsert_price(100)).unwrap();
        entity.apply(&upsert_price(110)).unwrap();
        entity
            .apply(&LocalMutation::RemovePrice {
                key: basic_price(),
                expected_version: None,
            })
            .unwrap();
        let dropped = entity.price(&basic_price()).unwrap();
        assert!(dropped.dropped);
        assert_eq!(dropped.version, 3);

        entity.apply(&upsert_price(100)).unwrap();
        let restored = entity.price(&basic_price()).unwrap();
        assert!(!restored.dropped);
        assert_eq!(restored.version, 4);
    }

    #[test]
    fn removing_missing_unit_fails() {
        let mut entity = create_entity();
        let err = entity
            .apply(&LocalMutation::RemoveAttribute {
                name: "code".into(),
                expected_version: None,
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
        assert!(entity.apply(&LocalMutation::RemoveParent).is_err());
    }

    #[test]
    fn stale_expected_version_is_rejected() {
        let mut entity = create_entity();
        let mutation = LocalMutation::UpsertAttribute {
            name: "code".into(),
            value: "a".into(),
            expected_version: Some(0),
        };
        entity.apply(&mutation).unwrap();
        let err = entity.apply(&mutation).unwrap_err();
        assert!(matches!(
            err,
            CoreError::VersionMismatch {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn reference_attributes_need_live_reference() {
        let mut entity = create_entity();
        let brand = ReferenceKey::new("brand", 5);
        let attribute = LocalMutation::UpsertReferenceAttribute {
            reference: brand.clone(),
            name: "order".into(),
            value: 1_i64.into(),
            expected_version: None,
        };
        assert!(entity.apply(&attribute).is_err());

        let added = entity
            .apply(&LocalMutation::UpsertReference {
                key: brand.clone(),
                expected_version: None,
            })
            .unwrap();
        assert_eq!(added, AppliedChange::ReferenceAdded(brand.clone()));
        entity.apply(&attribute).unwrap();
        assert_eq!(
            entity.reference(&brand).unwrap().attribute("order"),
            Some(&AttributeValue::Integer(1))
        );
    }

    #[test]
    fn removal_mutation_drops_everything() {
        let mut entity = create_entity();
        entity
            .apply(&LocalMutation::upsert_attribute("code", "a"))
            .unwrap();
        entity.apply(&upsert_price(100)).unwrap();
        entity
            .apply(&LocalMutation::UpsertReference {
                key: ReferenceKey::new("brand", 5),
                expected_version: None,
            })
            .unwrap();
        entity.apply(&LocalMutation::SetParent { parent: 9 }).unwrap();

        let removal = entity.to_removal_mutation();
        assert_eq!(removal.len(), 4);
        for mutation in &removal {
            entity.apply(mutation).unwrap();
        }
        assert_eq!(entity.attributes().count(), 0);
        assert!(entity.prices().all(|p| p.dropped));
        assert_eq!(entity.references().count(), 0);
        assert_eq!(entity.parent(), None);
    }

    #[test]
    fn entity_cannot_parent_itself() {
        let mut entity = create_entity();
        assert!(entity.apply(&LocalMutation::SetParent { parent: 1 }).is_err());
    }
}
