//! Attribute value index.

use crate::error::{CoreError, CoreResult};
use crate::model::AttributeValue;
use crate::types::PrimaryKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ValueIndex(
    #[serde(with = "super::entries")] BTreeMap<AttributeValue, BTreeSet<PrimaryKey>>,
);

/// `attribute name → value → primary keys`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeIndex {
    attributes: BTreeMap<String, ValueIndex>,
}

impl AttributeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `primary_key` under `name = value`.
    pub fn insert(&mut self, name: &str, value: AttributeValue, primary_key: PrimaryKey) {
        self.attributes
            .entry(name.to_owned())
            .or_default()
            .0
            .entry(value)
            .or_default()
            .insert(primary_key);
    }

    /// Removes `primary_key` from `name = value`.
    ///
    /// # Errors
    ///
    /// `Consistency` if it was not indexed there.
    pub fn remove(&mut self, name: &str, value: &AttributeValue, primary_key: PrimaryKey) -> CoreResult<()> {
        let mut removed = false;
        if let Some(values) = self.attributes.get_mut(name) {
            if let Some(keys) = values.0.get_mut(value) {
                removed = keys.remove(&primary_key);
                if keys.is_empty() {
                    values.0.remove(value);
                }
            }
            if values.0.is_empty() {
                self.attributes.remove(name);
            }
        }
        if !removed {
            return Err(CoreError::consistency(format!(
                "attribute `{name}` = {value} of entity {primary_key} is not indexed"
            )));
        }
        Ok(())
    }

    /// Applies an old/new value change.
    ///
    /// # Errors
    ///
    /// `Consistency` if `old` was not indexed.
    pub fn update(
        &mut self,
        name: &str,
        old: Option<&AttributeValue>,
        new: Option<&AttributeValue>,
        primary_key: PrimaryKey,
    ) -> CoreResult<()> {
        if let Some(old) = old {
            self.remove(name, old, primary_key)?;
        }
        if let Some(new) = new {
            self.insert(name, new.clone(), primary_key);
        }
        Ok(())
    }

    /// Drops every value of `primary_key`.
    pub fn purge(&mut self, primary_key: PrimaryKey) {
        self.attributes.retain(|_, values| {
            values.0.retain(|_, keys| {
                keys.remove(&primary_key);
                !keys.is_empty()
            });
            !values.0.is_empty()
        });
    }

    /// Entities with `name = value`.
    #[must_use]
    pub fn equal_to(&self, name: &str, value: &AttributeValue) -> Vec<PrimaryKey> {
        self.attributes
            .get(name)
            .and_then(|values| values.0.get(value))
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Entities with `from <= name <= to`, in primary key order.
    #[must_use]
    pub fn between(&self, name: &str, from: &AttributeValue, to: &AttributeValue) -> Vec<PrimaryKey> {
        if from > to {
            return Vec::new();
        }
        let Some(values) = self.attributes.get(name) else {
            return Vec::new();
        };
        let keys: BTreeSet<PrimaryKey> = values
            .0
            .range(from.clone()..=to.clone())
            .flat_map(|(_, keys)| keys.iter().copied())
            .collect();
        keys.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_moves_entity() {
        let mut index = AttributeIndex::new();
        index.insert("color", "red".into(), 1);
        index
            .update("color", Some(&"red".into()), Some(&"blue".into()), 1)
            .unwrap();
        assert!(index.equal_to("color", &"red".into()).is_empty());
        assert_eq!(index.equal_to("color", &"blue".into()), vec![1]);
    }

    #[test]
    fn removing_unknown_value_is_inconsistent() {
        let mut index = AttributeIndex::new();
        index.insert("color", "red".into(), 1);
        let err = index.remove("color", &"red".into(), 2).unwrap_err();
        assert!(matches!(err, CoreError::Consistency { .. }));
    }

    #[test]
    fn between_is_inclusive() {
        let mut index = AttributeIndex::new();
        for (pk, stock) in [(1, 5_i64), (2, 10), (3, 15)] {
            index.insert("stock", stock.into(), pk);
        }
        assert_eq!(index.between("stock", &5_i64.into(), &10_i64.into()), vec![1, 2]);
        assert!(index.between("stock", &10_i64.into(), &5_i64.into()).is_empty());
    }

    #[test]
    fn purge_removes_everything() {
        let mut index = AttributeIndex::new();
        index.insert("color", "red".into(), 1);
        index.insert("size", 42_i64.into(), 1);
        index.insert("color", "red".into(), 2);
        index.purge(1);
        assert_eq!(index.equal_to("color", &"red".into()), vec![2]);
        assert!(index.equal_to("size", &42_i64.into()).is_empty());
    }
}
