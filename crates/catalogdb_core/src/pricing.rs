//! Selling price resolution.
//!
//! Given the prices of one entity, resolution picks the single price the
//! entity sells for:
//!
//! 1. keep prices that are live, sellable, in the requested currency,
//!    valid at the requested instant and in one of the requested price
//!    lists
//! 2. combine them according to the [`PriceInnerRecordHandling`]
//! 3. apply the caller's predicate to the result
//!
//! Price lists are given in priority order, most preferred first.

use crate::error::{CoreError, CoreResult};
use crate::model::{Price, PriceInnerRecordHandling, PriceKey, PriceValue};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// A filtered price with the priority of its price list.
struct Candidate<'a> {
    priority: usize,
    price: &'a Price,
}

/// Computes the selling price.
///
/// Without `at`, validity intervals are ignored.
///
/// # Errors
///
/// `Consistency` when `Sum` handling meets group winners with different
/// tax rates.
pub fn compute_selling_price<'a, I, P>(
    prices: I,
    handling: PriceInnerRecordHandling,
    currency: &str,
    at: Option<DateTime<Utc>>,
    price_lists: &[&str],
    predicate: P,
) -> CoreResult<Option<Price>>
where
    I: IntoIterator<Item = &'a Price>,
    P: Fn(&Price) -> bool,
{
    let candidates: Vec<Candidate<'a>> = prices
        .into_iter()
        .filter(|p| p.is_sellable() && p.key.currency == currency)
        .filter(|p| match (at, p.value.validity) {
            (Some(at), Some(validity)) => validity.contains(at),
            _ => true,
        })
        .filter_map(|price| {
            price_lists
                .iter()
                .position(|list| *list == price.key.price_list)
                .map(|priority| Candidate { priority, price })
        })
        .collect();

    let selected = match handling {
        PriceInnerRecordHandling::None => most_preferred(candidates.iter()).map(|c| c.price.clone()),
        PriceInnerRecordHandling::FirstOccurrence => group_winners(&candidates)
            .into_iter()
            .min_by(|a, b| {
                a.price
                    .value
                    .price_with_tax
                    .cmp(&b.price.value.price_with_tax)
                    .then_with(|| a.priority.cmp(&b.priority))
                    .then_with(|| a.price.key.cmp(&b.price.key))
            })
            .map(|c| c.price.clone()),
        PriceInnerRecordHandling::Sum => sum_of(&group_winners(&candidates), currency)?,
    };
    Ok(selected.filter(|price| predicate(price)))
}

fn most_preferred<'c, 'a: 'c>(
    candidates: impl Iterator<Item = &'c Candidate<'a>>,
) -> Option<&'c Candidate<'a>> {
    candidates.min_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.price.key.cmp(&b.price.key))
    })
}

/// One most-preferred price per inner record id; a missing id is group 0.
fn group_winners<'c, 'a>(candidates: &'c [Candidate<'a>]) -> Vec<&'c Candidate<'a>> {
    let mut groups: BTreeMap<i64, Vec<&'c Candidate<'a>>> = BTreeMap::new();
    for candidate in candidates {
        groups
            .entry(candidate.price.value.inner_record_id.unwrap_or(0))
            .or_default()
            .push(candidate);
    }
    groups
        .into_values()
        .filter_map(|group| most_preferred(group.into_iter()))
        .collect()
}

fn sum_of(winners: &[&Candidate<'_>], currency: &str) -> CoreResult<Option<Price>> {
    let Some(first) = most_preferred(winners.iter().copied()) else {
        return Ok(None);
    };
    let tax_rate = first.price.value.tax_rate;
    let mut without_tax = Decimal::ZERO;
    let mut with_tax = Decimal::ZERO;
    for winner in winners {
        if winner.price.value.tax_rate != tax_rate {
            return Err(CoreError::consistency(format!(
                "cannot sum prices with tax rates {} and {}",
                tax_rate, winner.price.value.tax_rate
            )));
        }
        without_tax += winner.price.value.price_without_tax;
        with_tax += winner.price.value.price_with_tax;
    }
    Ok(Some(Price {
        key: PriceKey::new(0, first.price.key.price_list.clone(), currency),
        value: PriceValue::new(without_tax, tax_rate, with_tax),
        version: 1,
        dropped: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn price(id: i64, list: &str, amount: i64, tax: i64) -> Price {
        let amount = Decimal::new(amount, 0);
        Price {
            key: PriceKey::new(id, list, "EUR"),
            value: PriceValue::new(amount, Decimal::new(tax, 0), amount),
            version: 1,
            dropped: false,
        }
    }

    fn inner(mut price: Price, inner_record_id: i64) -> Price {
        price.value.inner_record_id = Some(inner_record_id);
        price
    }

    fn resolve(
        prices: &[Price],
        handling: PriceInnerRecordHandling,
        lists: &[&str],
    ) -> CoreResult<Option<Price>> {
        compute_selling_price(prices, handling, "EUR", None, lists, |_| true)
    }

    #[test]
    fn priority_beats_amount() {
        let prices = [price(1, "basic", 100, 21), price(1, "vip", 90, 21)];
        let selling = resolve(&prices, PriceInnerRecordHandling::None, &["vip", "basic"])
            .unwrap()
            .unwrap();
        assert_eq!(selling.key.price_list, "vip");
        assert_eq!(selling.value.price_with_tax, Decimal::new(90, 0));

        let prices = [price(1, "basic", 80, 21), price(1, "vip", 90, 21)];
        let selling = resolve(&prices, PriceInnerRecordHandling::None, &["vip", "basic"])
            .unwrap()
            .unwrap();
        assert_eq!(selling.key.price_list, "vip");
    }

    #[test]
    fn sum_adds_group_winners() {
        let prices = [
            inner(price(1, "basic", 50, 21), 1),
            inner(price(2, "basic", 30, 21), 2),
        ];
        let selling = resolve(&prices, PriceInnerRecordHandling::Sum, &["basic"])
            .unwrap()
            .unwrap();
        assert_eq!(selling.value.price_with_tax, Decimal::new(80, 0));
        assert_eq!(selling.value.price_without_tax, Decimal::new(80, 0));
        assert_eq!(selling.value.tax_rate, Decimal::new(21, 0));
        assert_eq!(selling.value.validity, None);
    }

    #[test]
    fn sum_rejects_mixed_tax_rates() {
        let prices = [
            inner(price(1, "basic", 50, 21), 1),
            inner(price(2, "basic", 30, 10), 2),
        ];
        assert!(matches!(
            resolve(&prices, PriceInnerRecordHandling::Sum, &["basic"]),
            Err(CoreError::Consistency { .. })
        ));
    }

    #[test]
    fn first_occurrence_picks_cheapest_group() {
        let prices = [
            inner(price(1, "basic", 50, 21), 1),
            inner(price(1, "vip", 45, 21), 1),
            inner(price(2, "basic", 40, 21), 2),
            inner(price(2, "vip", 60, 21), 2),
        ];
        // per group winners by priority: group 1 -> vip 45, group 2 -> vip 60
        let selling = resolve(
            &prices,
            PriceInnerRecordHandling::FirstOccurrence,
            &["vip", "basic"],
        )
        .unwrap()
        .unwrap();
        assert_eq!(selling.value.price_with_tax, Decimal::new(45, 0));
    }

    #[test]
    fn missing_inner_record_is_group_zero() {
        let prices = [price(1, "basic", 50, 21), inner(price(2, "basic", 30, 21), 0)];
        // both land in group 0, so only the lower price id counts
        let selling = resolve(&prices, PriceInnerRecordHandling::Sum, &["basic"])
            .unwrap()
            .unwrap();
        assert_eq!(selling.value.price_with_tax, Decimal::new(50, 0));
    }

    #[test]
    fn filters_apply() {
        let mut dropped = price(1, "vip", 10, 21);
        dropped.dropped = true;
        let mut unsellable = price(2, "vip", 20, 21);
        unsellable.value.sellable = false;
        let mut other_currency = price(3, "vip", 30, 21);
        other_currency.key.currency = "USD".into();
        let unknown_list = price(4, "b2b", 40, 21);
        let prices = [dropped, unsellable, other_currency, unknown_list];
        assert_eq!(
            resolve(&prices, PriceInnerRecordHandling::None, &["vip"]).unwrap(),
            None
        );
    }

    #[test]
    fn validity_is_checked_at_instant() {
        let january = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        let mut sale = price(1, "sale", 70, 21);
        sale.value.validity = Some(crate::model::DateTimeRange::between(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap(),
        ));
        let prices = [sale, price(1, "basic", 100, 21)];
        let lists = ["sale", "basic"];
        let in_sale = compute_selling_price(
            &prices,
            PriceInnerRecordHandling::None,
            "EUR",
            Some(january),
            &lists,
            |_| true,
        )
        .unwrap()
        .unwrap();
        assert_eq!(in_sale.key.price_list, "sale");

        let march = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let after = compute_selling_price(
            &prices,
            PriceInnerRecordHandling::None,
            "EUR",
            Some(march),
            &lists,
            |_| true,
        )
        .unwrap()
        .unwrap();
        assert_eq!(after.key.price_list, "basic");
    }

    #[test]
    fn predicate_applies_last() {
        let prices = [price(1, "vip", 90, 21), price(1, "basic", 50, 21)];
        let selling = compute_selling_price(
            &prices,
            PriceInnerRecordHandling::None,
            "EUR",
            None,
            &["vip", "basic"],
            |p| p.value.price_with_tax < Decimal::new(60, 0),
        )
        .unwrap();
        // vip wins first, then fails the predicate; basic is not reconsidered
        assert_eq!(selling, None);
    }

    proptest! {
        #[test]
        fn none_handling_picks_first_listed(amounts in proptest::collection::vec(1i64..1000, 1..6)) {
            let lists: Vec<String> = (0..amounts.len()).map(|i| format!("list{i}")).collect();
            let prices: Vec<Price> = amounts
                .iter()
                .zip(&lists)
                .map(|(amount, list)| price(1, list, *amount, 21))
                .collect();
            let order: Vec<&str> = lists.iter().rev().map(String::as_str).collect();
            let selling = resolve(&prices, PriceInnerRecordHandling::None, &order).unwrap().unwrap();
            prop_assert_eq!(&selling.key.price_list, order[0]);
        }

        #[test]
        fn first_occurrence_is_minimal_among_winners(amounts in proptest::collection::vec(1i64..1000, 1..6)) {
            let prices: Vec<Price> = amounts
                .iter()
                .enumerate()
                .map(|(i, amount)| inner(price(i as i64, "basic", *amount, 21), i as i64))
                .collect();
            let selling = resolve(&prices, PriceInnerRecordHandling::FirstOccurrence, &["basic"])
                .unwrap()
                .unwrap();
            let min = amounts.iter().min().copied().unwrap();
            prop_assert_eq!(selling.value.price_with_tax, Decimal::new(min, 0));
        }
    }
}
