//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random catalog content
//! that maintains required invariants.

use catalogdb_core::{
    AttributeValue, EntityBuilder, EntityMutation, Price, PriceInnerRecordHandling, PriceKey,
    PriceValue, PrimaryKey,
};
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Price lists the generators draw from.
pub const PRICE_LISTS: [&str; 4] = ["basic", "vip", "b2b", "outlet"];

/// Currencies the generators draw from.
pub const CURRENCIES: [&str; 2] = ["EUR", "CZK"];

/// Strategy for generating price list names.
pub fn price_list_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(PRICE_LISTS.to_vec())
}

/// Strategy for generating a price list priority: distinct lists, most
/// preferred first.
pub fn priority_strategy() -> impl Strategy<Value = Vec<&'static str>> {
    (Just(PRICE_LISTS.to_vec()).prop_shuffle(), 1..=PRICE_LISTS.len()).prop_map(
        |(mut lists, len)| {
            lists.truncate(len);
            lists
        },
    )
}

/// Strategy for generating positive amounts with two decimal places.
pub fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1_i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy for generating tax rates in percent.
pub fn tax_rate_strategy() -> impl Strategy<Value = Decimal> {
    prop::sample::select(vec![0_i64, 10, 15, 21]).prop_map(|rate| Decimal::new(rate, 0))
}

/// Strategy for generating instants within 2020..2030.
pub fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    let from = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single();
    let to = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single();
    let (from, to) = match (from, to) {
        (Some(from), Some(to)) => (from.timestamp(), to.timestamp()),
        _ => (0, 1),
    };
    (from..to).prop_filter_map("timestamp out of range", |seconds| {
        Utc.timestamp_opt(seconds, 0).single()
    })
}

/// Strategy for generating price contents.
///
/// `tax_rate` fixes the rate; `None` draws one.
pub fn price_value_strategy(tax_rate: Option<Decimal>) -> impl Strategy<Value = PriceValue> {
    let tax_rate = match tax_rate {
        Some(rate) => Just(rate).boxed(),
        None => tax_rate_strategy().boxed(),
    };
    (
        amount_strategy(),
        tax_rate,
        prop::option::of(1_i64..4),
        prop::bool::weighted(0.9),
    )
        .prop_map(|(amount, tax_rate, inner_record, sellable)| {
            let with_tax = amount + amount * tax_rate / Decimal::ONE_HUNDRED;
            let value = PriceValue::new(amount, tax_rate, with_tax).sellable(sellable);
            match inner_record {
                Some(id) => value.inner_record(id),
                None => value,
            }
        })
}

/// Strategy for generating live prices with distinct keys.
pub fn prices_strategy(max: usize, tax_rate: Option<Decimal>) -> impl Strategy<Value = Vec<Price>> {
    prop::collection::vec(
        (
            price_list_strategy(),
            prop::sample::select(CURRENCIES.to_vec()),
            price_value_strategy(tax_rate),
        ),
        0..=max,
    )
    .prop_map(|drafts| {
        (1..)
            .zip(drafts)
            .map(|(price_id, (list, currency, value))| Price {
                key: PriceKey::new(price_id, list, currency),
                value,
                version: 1,
                dropped: false,
            })
            .collect()
    })
}

/// Strategy for generating inner record handling policies.
pub fn handling_strategy() -> impl Strategy<Value = PriceInnerRecordHandling> {
    prop_oneof![
        Just(PriceInnerRecordHandling::None),
        Just(PriceInnerRecordHandling::FirstOccurrence),
        Just(PriceInnerRecordHandling::Sum),
    ]
}

/// Strategy for generating attribute values of any type.
pub fn attribute_value_strategy() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        "[a-z]{1,12}".prop_map(AttributeValue::from),
        any::<i64>().prop_map(AttributeValue::from),
        amount_strategy().prop_map(AttributeValue::from),
        any::<bool>().prop_map(AttributeValue::from),
        instant_strategy().prop_map(AttributeValue::from),
    ]
}

/// An operation on the product collection.
#[derive(Debug, Clone)]
pub enum ProductOperation {
    /// Sets the product code, inserting the product if needed.
    Upsert {
        /// Product primary key.
        primary_key: PrimaryKey,
        /// New code.
        code: String,
    },
    /// Sets one price of the product, inserting the product if needed.
    SetPrice {
        /// Product primary key.
        primary_key: PrimaryKey,
        /// Target price list.
        price_list: &'static str,
        /// New amount.
        amount: Decimal,
    },
    /// Deletes the product.
    Delete {
        /// Product primary key.
        primary_key: PrimaryKey,
    },
}

impl ProductOperation {
    /// The product this operation targets.
    pub fn primary_key(&self) -> PrimaryKey {
        match self {
            Self::Upsert { primary_key, .. }
            | Self::SetPrice { primary_key, .. }
            | Self::Delete { primary_key } => *primary_key,
        }
    }

    /// The upsert mutation for this operation; `None` for deletes.
    pub fn to_mutation(&self) -> Option<EntityMutation> {
        let mut builder = EntityBuilder::with_primary_key(crate::PRODUCT, self.primary_key());
        match self {
            Self::Upsert { code, .. } => {
                builder.set_attribute("code", code.as_str());
            }
            Self::SetPrice {
                price_list, amount, ..
            } => {
                builder.set_price(
                    PriceKey::new(1, *price_list, "EUR"),
                    PriceValue::new(*amount, Decimal::ZERO, *amount),
                );
            }
            Self::Delete { .. } => return None,
        }
        Some(builder.to_mutation())
    }
}

/// Strategy for generating product operations over keys `1..=keys`.
pub fn product_operation_strategy(keys: PrimaryKey) -> impl Strategy<Value = ProductOperation> {
    prop_oneof![
        3 => (1..=keys, "[a-z]{1,8}")
            .prop_map(|(primary_key, code)| ProductOperation::Upsert { primary_key, code }),
        2 => (1..=keys, price_list_strategy(), amount_strategy()).prop_map(
            |(primary_key, price_list, amount)| ProductOperation::SetPrice {
                primary_key,
                price_list,
                amount,
            }
        ),
        1 => (1..=keys).prop_map(|primary_key| ProductOperation::Delete { primary_key }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    keys: PrimaryKey,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<ProductOperation>> {
    prop::collection::vec(product_operation_strategy(keys), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn priority_lists_are_distinct(priority in priority_strategy()) {
            let distinct: BTreeSet<_> = priority.iter().collect();
            prop_assert_eq!(distinct.len(), priority.len());
            prop_assert!(!priority.is_empty());
        }

        #[test]
        fn price_keys_are_distinct(prices in prices_strategy(8, None)) {
            let keys: BTreeSet<_> = prices.iter().map(|p| p.key.clone()).collect();
            prop_assert_eq!(keys.len(), prices.len());
        }

        #[test]
        fn fixed_tax_rate_is_kept(prices in prices_strategy(8, Some(Decimal::new(21, 0)))) {
            prop_assert!(prices.iter().all(|p| p.value.tax_rate == Decimal::new(21, 0)));
        }

        #[test]
        fn operations_stay_within_keys(ops in operation_sequence_strategy(5, 1, 20)) {
            prop_assert!(ops.iter().all(|op| (1..=5).contains(&op.primary_key())));
        }
    }
}
