//! Entity indexes.
//!
//! Every non-empty collection has exactly one [`GlobalEntityIndex`] over
//! all of its entities, plus one [`ReducedEntityIndex`] per referenced
//! entity (`brand#7`, `category#3`, ...) holding only the entities that
//! reference it. Reduced indexes are created by the first entity that
//! references their bucket and removed with the last one.
//!
//! Indexes are plain values: a transaction clones the index it touches
//! into its private layer and mutates the copy.

mod attribute;
mod global;
mod hierarchy;
mod price;
mod reduced;

pub use attribute::AttributeIndex;
pub use global::GlobalEntityIndex;
pub use hierarchy::HierarchyIndex;
pub use price::{IndexedPrice, PriceSuperIndex};
pub use reduced::ReducedEntityIndex;

use crate::error::CoreResult;
use crate::model::{AttributeValue, ReferenceKey};
use crate::types::{IndexId, PrimaryKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an index within its collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityIndexKey {
    /// The index over every entity.
    Global,
    /// The index over entities referencing one entity.
    Reduced {
        /// Referenced entity type.
        referenced_entity_type: String,
        /// Referenced primary key.
        primary_key: PrimaryKey,
    },
}

impl EntityIndexKey {
    /// Key of the reduced index bucketed by `reference`.
    #[must_use]
    pub fn reduced(reference: &ReferenceKey) -> Self {
        Self::Reduced {
            referenced_entity_type: reference.referenced_entity_type.clone(),
            primary_key: reference.primary_key,
        }
    }
}

impl fmt::Display for EntityIndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Reduced {
                referenced_entity_type,
                primary_key,
            } => write!(f, "reduced({referenced_entity_type}#{primary_key})"),
        }
    }
}

/// A change an index must reflect.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexMutation {
    /// The entity joins the index.
    InsertEntity,
    /// The entity leaves the index; everything it contributed is purged.
    RemoveEntity,
    /// An attribute value changed.
    Attribute {
        /// Attribute name.
        name: String,
        /// Previous live value.
        old: Option<AttributeValue>,
        /// New live value.
        new: Option<AttributeValue>,
    },
    /// A sellable price appeared, changed or disappeared.
    Price {
        /// Previous indexed form.
        old: Option<IndexedPrice>,
        /// New indexed form.
        new: Option<IndexedPrice>,
    },
    /// The hierarchical parent changed.
    Parent {
        /// Previous parent.
        old: Option<PrimaryKey>,
        /// New parent.
        new: Option<PrimaryKey>,
    },
}

/// A query answered by an index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexLookup {
    /// Every entity in the index.
    AllEntities,
    /// Entities whose attribute equals a value.
    AttributeEquals {
        /// Attribute name.
        name: String,
        /// Value to match.
        value: AttributeValue,
    },
    /// Entities whose attribute lies within `from..=to`.
    AttributeBetween {
        /// Attribute name.
        name: String,
        /// Inclusive lower bound.
        from: AttributeValue,
        /// Inclusive upper bound.
        to: AttributeValue,
    },
    /// Entities with a sellable price in a price list and currency.
    PriceList {
        /// Price list.
        price_list: String,
        /// Currency.
        currency: String,
    },
    /// Direct hierarchical children (`None` for roots).
    Children {
        /// Parent primary key.
        parent: Option<PrimaryKey>,
    },
}

/// Operations every index variant supports.
pub trait IndexMaintainer {
    /// Reflects `mutation` of entity `primary_key`.
    ///
    /// # Errors
    ///
    /// `Consistency` if the mutation contradicts the index content.
    fn apply_mutation(&mut self, primary_key: PrimaryKey, mutation: &IndexMutation) -> CoreResult<()>;

    /// Answers `query` in ascending primary key order.
    fn lookup(&self, query: &IndexLookup) -> Vec<PrimaryKey>;

    /// Returns true if no entity is indexed.
    fn is_empty(&self) -> bool;
}

/// An index of either kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityIndex {
    /// The global index.
    Global(GlobalEntityIndex),
    /// A reduced index.
    Reduced(ReducedEntityIndex),
}

impl EntityIndex {
    /// Creates an empty index for `key`.
    #[must_use]
    pub fn create(id: IndexId, key: &EntityIndexKey) -> Self {
        match key {
            EntityIndexKey::Global => Self::Global(GlobalEntityIndex::new(id)),
            EntityIndexKey::Reduced {
                referenced_entity_type,
                primary_key,
            } => Self::Reduced(ReducedEntityIndex::new(
                id,
                ReferenceKey::new(referenced_entity_type.clone(), *primary_key),
            )),
        }
    }

    /// Storage id.
    #[must_use]
    pub fn id(&self) -> IndexId {
        match self {
            Self::Global(index) => index.id(),
            Self::Reduced(index) => index.id(),
        }
    }

    /// Identity within the collection.
    #[must_use]
    pub fn key(&self) -> EntityIndexKey {
        match self {
            Self::Global(_) => EntityIndexKey::Global,
            Self::Reduced(index) => EntityIndexKey::reduced(index.reference()),
        }
    }

    /// The global index, if this is one.
    #[must_use]
    pub fn as_global(&self) -> Option<&GlobalEntityIndex> {
        match self {
            Self::Global(index) => Some(index),
            Self::Reduced(_) => None,
        }
    }

    /// The reduced index, if this is one.
    #[must_use]
    pub fn as_reduced(&self) -> Option<&ReducedEntityIndex> {
        match self {
            Self::Global(_) => None,
            Self::Reduced(index) => Some(index),
        }
    }
}

impl IndexMaintainer for EntityIndex {
    fn apply_mutation(&mut self, primary_key: PrimaryKey, mutation: &IndexMutation) -> CoreResult<()> {
        match self {
            Self::Global(index) => index.apply_mutation(primary_key, mutation),
            Self::Reduced(index) => index.apply_mutation(primary_key, mutation),
        }
    }

    fn lookup(&self, query: &IndexLookup) -> Vec<PrimaryKey> {
        match self {
            Self::Global(index) => index.lookup(query),
            Self::Reduced(index) => index.lookup(query),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Global(index) => index.is_empty(),
            Self::Reduced(index) => index.is_empty(),
        }
    }
}

/// Serializes a map as a sequence of `(key, value)` pairs, for keys that
/// are not strings.
pub(crate) mod entries {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub(crate) fn serialize<S, K, V>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        serializer.collect_seq(map.iter())
    }

    pub(crate) fn deserialize<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
    {
        Vec::<(K, V)>::deserialize(deserializer).map(|pairs| pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_order_global_first() {
        let reduced = EntityIndexKey::reduced(&ReferenceKey::new("brand", 1));
        assert!(EntityIndexKey::Global < reduced);
        assert_eq!(reduced.to_string(), "reduced(brand#1)");
    }

    #[test]
    fn create_matches_key() {
        let key = EntityIndexKey::reduced(&ReferenceKey::new("brand", 7));
        let index = EntityIndex::create(IndexId(3), &key);
        assert_eq!(index.key(), key);
        assert_eq!(index.id(), IndexId(3));
        assert!(index.as_reduced().is_some());
        assert!(index.is_empty());
    }

    #[test]
    fn index_survives_codec() {
        let mut index = EntityIndex::create(IndexId(1), &EntityIndexKey::Global);
        index.apply_mutation(5, &IndexMutation::InsertEntity).unwrap();
        index
            .apply_mutation(
                5,
                &IndexMutation::Attribute {
                    name: "stock".into(),
                    old: None,
                    new: Some(AttributeValue::Integer(3)),
                },
            )
            .unwrap();
        let bytes = catalogdb_codec::encode(&index).unwrap();
        let decoded: EntityIndex = catalogdb_codec::decode(&bytes).unwrap();
        assert_eq!(decoded, index);
    }
}
