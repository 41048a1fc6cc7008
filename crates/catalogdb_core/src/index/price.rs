//! The price super-index.

use crate::error::{CoreError, CoreResult};
use crate::model::{DateTimeRange, Price, PriceKey};
use crate::types::PrimaryKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The part of a price the index keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedPrice {
    /// Identity.
    pub key: PriceKey,
    /// Inner record grouping key.
    pub inner_record_id: Option<i64>,
    /// Amount without tax.
    pub price_without_tax: Decimal,
    /// Amount with tax.
    pub price_with_tax: Decimal,
    /// Validity interval.
    pub validity: Option<DateTimeRange>,
}

impl IndexedPrice {
    /// Indexed form of `price`, or `None` if it is dropped or not sellable.
    #[must_use]
    pub fn of(price: &Price) -> Option<Self> {
        price.is_sellable().then(|| Self {
            key: price.key.clone(),
            inner_record_id: price.value.inner_record_id,
            price_without_tax: price.value.price_without_tax,
            price_with_tax: price.value.price_with_tax,
            validity: price.value.validity,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PriceListIndex(
    #[serde(with = "super::entries")] BTreeMap<(PrimaryKey, i64), IndexedPrice>,
);

/// Sellable prices of every entity, by `(price list, currency)`.
///
/// Reduced indexes only store `(entity, price key)` pairs and resolve them
/// here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSuperIndex {
    #[serde(with = "super::entries")]
    lists: BTreeMap<(String, String), PriceListIndex>,
}

fn list_of(key: &PriceKey) -> (String, String) {
    (key.price_list.clone(), key.currency.clone())
}

impl PriceSuperIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `price` for `primary_key`, replacing an earlier version.
    pub fn insert(&mut self, primary_key: PrimaryKey, price: IndexedPrice) {
        self.lists
            .entry(list_of(&price.key))
            .or_default()
            .0
            .insert((primary_key, price.key.price_id), price);
    }

    /// Removes the price `key` of `primary_key`.
    ///
    /// # Errors
    ///
    /// `Consistency` if it was not indexed.
    pub fn remove(&mut self, primary_key: PrimaryKey, key: &PriceKey) -> CoreResult<IndexedPrice> {
        let list = list_of(key);
        let mut removed = None;
        if let Some(prices) = self.lists.get_mut(&list) {
            removed = prices.0.remove(&(primary_key, key.price_id));
            if prices.0.is_empty() {
                self.lists.remove(&list);
            }
        }
        removed.ok_or_else(|| {
            CoreError::consistency(format!("{key} of entity {primary_key} is not indexed"))
        })
    }

    /// Drops every price of `primary_key`.
    pub fn purge(&mut self, primary_key: PrimaryKey) {
        self.lists.retain(|_, prices| {
            prices.0.retain(|(pk, _), _| *pk != primary_key);
            !prices.0.is_empty()
        });
    }

    /// The indexed price `key` of `primary_key`.
    #[must_use]
    pub fn get(&self, primary_key: PrimaryKey, key: &PriceKey) -> Option<&IndexedPrice> {
        self.lists
            .get(&list_of(key))
            .and_then(|prices| prices.0.get(&(primary_key, key.price_id)))
    }

    /// Entities with a price in `price_list` and `currency`.
    #[must_use]
    pub fn entities_in(&self, price_list: &str, currency: &str) -> Vec<PrimaryKey> {
        let keys: BTreeSet<PrimaryKey> = self
            .lists
            .get(&(price_list.to_owned(), currency.to_owned()))
            .map(|prices| prices.0.keys().map(|(pk, _)| *pk).collect())
            .unwrap_or_default();
        keys.into_iter().collect()
    }

    /// Number of indexed prices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.values().map(|prices| prices.0.len()).sum()
    }

    /// Returns true if no price is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PriceValue;

    fn create_price(price_id: i64, list: &str, amount: i64) -> Price {
        Price {
            key: PriceKey::new(price_id, list, "EUR"),
            value: PriceValue::new(Decimal::from(amount), Decimal::ZERO, Decimal::from(amount)),
            version: 1,
            dropped: false,
        }
    }

    #[test]
    fn only_sellable_prices_are_indexed() {
        let mut price = create_price(1, "basic", 10);
        assert!(IndexedPrice::of(&price).is_some());
        price.value.sellable = false;
        assert!(IndexedPrice::of(&price).is_none());
        price.value.sellable = true;
        price.dropped = true;
        assert!(IndexedPrice::of(&price).is_none());
    }

    #[test]
    fn lists_are_separate() {
        let mut index = PriceSuperIndex::new();
        for (pk, list) in [(1, "basic"), (2, "vip"), (3, "basic")] {
            let price = IndexedPrice::of(&create_price(1, list, 10)).unwrap();
            index.insert(pk, price);
        }
        assert_eq!(index.entities_in("basic", "EUR"), vec![1, 3]);
        assert_eq!(index.entities_in("vip", "EUR"), vec![2]);
        assert!(index.entities_in("basic", "USD").is_empty());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn remove_and_purge() {
        let mut index = PriceSuperIndex::new();
        let key = PriceKey::new(1, "basic", "EUR");
        index.insert(1, IndexedPrice::of(&create_price(1, "basic", 10)).unwrap());
        index.insert(1, IndexedPrice::of(&create_price(2, "vip", 10)).unwrap());
        assert!(index.remove(1, &key).is_ok());
        assert!(index.remove(1, &key).is_err());
        index.purge(1);
        assert!(index.is_empty());
    }
}
