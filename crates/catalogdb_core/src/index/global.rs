//! The index over every entity of a collection.

use crate::error::CoreResult;
use crate::index::{
    AttributeIndex, HierarchyIndex, IndexLookup, IndexMaintainer, IndexMutation, PriceSuperIndex,
};
use crate::types::{IndexId, PrimaryKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Global index: entity ids, attributes, hierarchy and the price
/// super-index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEntityIndex {
    id: IndexId,
    entities: BTreeSet<PrimaryKey>,
    attributes: AttributeIndex,
    hierarchy: HierarchyIndex,
    prices: PriceSuperIndex,
}

impl GlobalEntityIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(id: IndexId) -> Self {
        Self {
            id,
            entities: BTreeSet::new(),
            attributes: AttributeIndex::new(),
            hierarchy: HierarchyIndex::new(),
            prices: PriceSuperIndex::new(),
        }
    }

    /// Storage id.
    #[must_use]
    pub fn id(&self) -> IndexId {
        self.id
    }

    /// Returns whether the entity is indexed.
    #[must_use]
    pub fn contains(&self, primary_key: PrimaryKey) -> bool {
        self.entities.contains(&primary_key)
    }

    /// Number of indexed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// The hierarchy of the collection.
    #[must_use]
    pub fn hierarchy(&self) -> &HierarchyIndex {
        &self.hierarchy
    }

    /// The price super-index.
    #[must_use]
    pub fn prices(&self) -> &PriceSuperIndex {
        &self.prices
    }

    /// `primary_key` and every descendant of it.
    #[must_use]
    pub fn list_subtree_including_self(&self, primary_key: PrimaryKey) -> Vec<PrimaryKey> {
        self.hierarchy.list_subtree_including_self(primary_key)
    }
}

impl IndexMaintainer for GlobalEntityIndex {
    fn apply_mutation(&mut self, primary_key: PrimaryKey, mutation: &IndexMutation) -> CoreResult<()> {
        match mutation {
            IndexMutation::InsertEntity => {
                self.entities.insert(primary_key);
                self.hierarchy.insert_root(primary_key);
            }
            IndexMutation::RemoveEntity => {
                self.entities.remove(&primary_key);
                self.attributes.purge(primary_key);
                self.hierarchy.remove(primary_key);
                self.prices.purge(primary_key);
            }
            IndexMutation::Attribute { name, old, new } => {
                self.attributes
                    .update(name, old.as_ref(), new.as_ref(), primary_key)?;
            }
            IndexMutation::Price { old, new } => {
                if let Some(old) = old {
                    self.prices.remove(primary_key, &old.key)?;
                }
                if let Some(new) = new {
                    self.prices.insert(primary_key, new.clone());
                }
            }
            IndexMutation::Parent { old, new } => {
                self.hierarchy.set_parent(primary_key, *old, *new)?;
            }
        }
        Ok(())
    }

    fn lookup(&self, query: &IndexLookup) -> Vec<PrimaryKey> {
        match query {
            IndexLookup::AllEntities => self.entities.iter().copied().collect(),
            IndexLookup::AttributeEquals { name, value } => self.attributes.equal_to(name, value),
            IndexLookup::AttributeBetween { name, from, to } => {
                self.attributes.between(name, from, to)
            }
            IndexLookup::PriceList {
                price_list,
                currency,
            } => self.prices.entities_in(price_list, currency),
            IndexLookup::Children { parent } => self.hierarchy.children(*parent),
        }
    }

    fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexedPrice;
    use crate::model::{Price, PriceKey, PriceValue};
    use rust_decimal::Decimal;

    fn create_index() -> GlobalEntityIndex {
        let mut index = GlobalEntityIndex::new(IndexId(1));
        for pk in 1..=3 {
            index.apply_mutation(pk, &IndexMutation::InsertEntity).unwrap();
        }
        index
    }

    fn indexed(price_id: i64) -> IndexedPrice {
        IndexedPrice::of(&Price {
            key: PriceKey::new(price_id, "basic", "EUR"),
            value: PriceValue::new(Decimal::TEN, Decimal::ZERO, Decimal::TEN),
            version: 1,
            dropped: false,
        })
        .unwrap()
    }

    #[test]
    fn remove_entity_purges_all_structures() {
        let mut index = create_index();
        index
            .apply_mutation(
                2,
                &IndexMutation::Attribute {
                    name: "code".into(),
                    old: None,
                    new: Some("a".into()),
                },
            )
            .unwrap();
        index
            .apply_mutation(
                2,
                &IndexMutation::Price {
                    old: None,
                    new: Some(indexed(1)),
                },
            )
            .unwrap();
        index
            .apply_mutation(
                2,
                &IndexMutation::Parent {
                    old: None,
                    new: Some(1),
                },
            )
            .unwrap();
        index.apply_mutation(2, &IndexMutation::RemoveEntity).unwrap();

        assert_eq!(index.lookup(&IndexLookup::AllEntities), vec![1, 3]);
        assert!(index
            .lookup(&IndexLookup::AttributeEquals {
                name: "code".into(),
                value: "a".into()
            })
            .is_empty());
        assert!(index.prices().is_empty());
        assert_eq!(index.list_subtree_including_self(1), vec![1]);
    }

    #[test]
    fn children_lookup_lists_roots() {
        let mut index = create_index();
        index
            .apply_mutation(
                3,
                &IndexMutation::Parent {
                    old: None,
                    new: Some(1),
                },
            )
            .unwrap();
        assert_eq!(
            index.lookup(&IndexLookup::Children { parent: None }),
            vec![1, 2]
        );
        assert_eq!(
            index.lookup(&IndexLookup::Children { parent: Some(1) }),
            vec![3]
        );
    }

    #[test]
    fn price_change_replaces_entry() {
        let mut index = create_index();
        let first = indexed(1);
        index
            .apply_mutation(
                1,
                &IndexMutation::Price {
                    old: None,
                    new: Some(first.clone()),
                },
            )
            .unwrap();
        index
            .apply_mutation(
                1,
                &IndexMutation::Price {
                    old: Some(first),
                    new: None,
                },
            )
            .unwrap();
        assert!(index
            .lookup(&IndexLookup::PriceList {
                price_list: "basic".into(),
                currency: "EUR".into()
            })
            .is_empty());
    }
}
