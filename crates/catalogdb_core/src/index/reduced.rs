//! Indexes over the entities referencing one entity.

use crate::error::{CoreError, CoreResult};
use crate::index::{
    AttributeIndex, GlobalEntityIndex, IndexLookup, IndexMaintainer, IndexMutation, IndexedPrice,
};
use crate::model::{PriceKey, ReferenceKey};
use crate::types::{IndexId, PrimaryKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reduced index of one reference bucket.
///
/// Prices are only held as `(entity, price key)` pairs; their content
/// lives in the global index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedEntityIndex {
    id: IndexId,
    reference: ReferenceKey,
    entities: BTreeSet<PrimaryKey>,
    attributes: AttributeIndex,
    price_refs: BTreeSet<(PrimaryKey, PriceKey)>,
}

impl ReducedEntityIndex {
    /// Creates an empty index for the `reference` bucket.
    #[must_use]
    pub fn new(id: IndexId, reference: ReferenceKey) -> Self {
        Self {
            id,
            reference,
            entities: BTreeSet::new(),
            attributes: AttributeIndex::new(),
            price_refs: BTreeSet::new(),
        }
    }

    /// Storage id.
    #[must_use]
    pub fn id(&self) -> IndexId {
        self.id
    }

    /// The referenced entity this index is bucketed by.
    #[must_use]
    pub fn reference(&self) -> &ReferenceKey {
        &self.reference
    }

    /// Returns whether the entity is indexed.
    #[must_use]
    pub fn contains(&self, primary_key: PrimaryKey) -> bool {
        self.entities.contains(&primary_key)
    }

    /// Resolves the bucket's prices against `global`.
    pub fn prices<'a>(
        &'a self,
        global: &'a GlobalEntityIndex,
    ) -> impl Iterator<Item = (PrimaryKey, &'a IndexedPrice)> + 'a {
        self.price_refs
            .iter()
            .filter_map(|(pk, key)| global.prices().get(*pk, key).map(|price| (*pk, price)))
    }
}

impl IndexMaintainer for ReducedEntityIndex {
    fn apply_mutation(&mut self, primary_key: PrimaryKey, mutation: &IndexMutation) -> CoreResult<()> {
        match mutation {
            IndexMutation::InsertEntity => {
                self.entities.insert(primary_key);
            }
            IndexMutation::RemoveEntity => {
                self.entities.remove(&primary_key);
                self.attributes.purge(primary_key);
                self.price_refs.retain(|(pk, _)| *pk != primary_key);
            }
            IndexMutation::Attribute { name, old, new } => {
                self.attributes
                    .update(name, old.as_ref(), new.as_ref(), primary_key)?;
            }
            IndexMutation::Price { old, new } => {
                if let Some(old) = old {
                    if !self.price_refs.remove(&(primary_key, old.key.clone())) {
                        return Err(CoreError::consistency(format!(
                            "{} of entity {primary_key} is not in {}",
                            old.key, self.reference
                        )));
                    }
                }
                if let Some(new) = new {
                    self.price_refs.insert((primary_key, new.key.clone()));
                }
            }
            IndexMutation::Parent { .. } => {}
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
            } => {
                let keys: BTreeSet<PrimaryKey> = self
                    .price_refs
                    .iter()
                    .filter(|(_, key)| key.price_list == *price_list && key.currency == *currency)
                    .map(|(pk, _)| *pk)
                    .collect();
                keys.into_iter().collect()
            }
            IndexLookup::Children { .. } => Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Price, PriceValue};
    use rust_decimal::Decimal;

    fn indexed(price_id: i64, list: &str) -> IndexedPrice {
        IndexedPrice::of(&Price {
            key: PriceKey::new(price_id, list, "EUR"),
            value: PriceValue::new(Decimal::ONE, Decimal::ZERO, Decimal::ONE),
            version: 1,
            dropped: false,
        })
        .unwrap()
    }

    #[test]
    fn prices_resolve_through_global() {
        let mut global = GlobalEntityIndex::new(IndexId(1));
        let mut reduced = ReducedEntityIndex::new(IndexId(2), ReferenceKey::new("brand", 1));
        let price = IndexMutation::Price {
            old: None,
            new: Some(indexed(1, "basic")),
        };
        for index in [&mut global as &mut dyn IndexMaintainer, &mut reduced] {
            index.apply_mutation(7, &IndexMutation::InsertEntity).unwrap();
            index.apply_mutation(7, &price).unwrap();
        }
        let resolved: Vec<_> = reduced.prices(&global).collect();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, 7);
        assert_eq!(
            reduced.lookup(&IndexLookup::PriceList {
                price_list: "basic".into(),
                currency: "EUR".into()
            }),
            vec![7]
        );
    }

    #[test]
    fn removing_last_entity_empties_index() {
        let mut reduced = ReducedEntityIndex::new(IndexId(2), ReferenceKey::new("brand", 1));
        reduced.apply_mutation(7, &IndexMutation::InsertEntity).unwrap();
        reduced
            .apply_mutation(
                7,
                &IndexMutation::Price {
                    old: None,
                    new: Some(indexed(1, "basic")),
                },
            )
            .unwrap();
        reduced.apply_mutation(7, &IndexMutation::RemoveEntity).unwrap();
        assert!(reduced.is_empty());
        assert!(reduced
            .lookup(&IndexLookup::PriceList {
                price_list: "basic".into(),
                currency: "EUR".into()
            })
            .is_empty());
    }
}
