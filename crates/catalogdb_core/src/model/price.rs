//! Prices.

use crate::error::{CoreError, CoreResult};
use crate::model::entity::Droppable;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a price within an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriceKey {
    /// External price id.
    pub price_id: i64,
    /// Price list the price belongs to.
    pub price_list: String,
    /// ISO currency code.
    pub currency: String,
}

impl PriceKey {
    /// Creates a price key.
    pub fn new(price_id: i64, price_list: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            price_id,
            price_list: price_list.into(),
            currency: currency.into(),
        }
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "price {}/{}/{}", self.price_id, self.price_list, self.currency)
    }
}

/// Inclusive validity interval; an open end is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateTimeRange {
    /// First valid instant.
    pub from: Option<DateTime<Utc>>,
    /// Last valid instant.
    pub to: Option<DateTime<Utc>>,
}

impl DateTimeRange {
    /// Creates a closed interval.
    #[must_use]
    pub const fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Returns whether `at` lies within the interval.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| from <= at) && self.to.map_or(true, |to| at <= to)
    }
}

/// The mutable content of a price.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceValue {
    /// Optional grouping key for inner record handling.
    pub inner_record_id: Option<i64>,
    /// Amount without tax.
    pub price_without_tax: Decimal,
    /// Amount with tax.
    pub price_with_tax: Decimal,
    /// Tax rate in percent.
    pub tax_rate: Decimal,
    /// When the price applies; `None` means always.
    pub validity: Option<DateTimeRange>,
    /// Whether the price may be offered for sale.
    pub sellable: bool,
}

impl PriceValue {
    /// Creates a sellable price without validity or inner record.
    #[must_use]
    pub const fn new(price_without_tax: Decimal, tax_rate: Decimal, price_with_tax: Decimal) -> Self {
        Self {
            inner_record_id: None,
            price_without_tax,
            price_with_tax,
            tax_rate,
            validity: None,
            sellable: true,
        }
    }

    /// Sets the inner record id.
    #[must_use]
    pub const fn inner_record(mut self, id: i64) -> Self {
        self.inner_record_id = Some(id);
        self
    }

    /// Sets the validity interval.
    #[must_use]
    pub const fn valid(mut self, validity: DateTimeRange) -> Self {
        self.validity = Some(validity);
        self
    }

    /// Sets the sellable flag.
    #[must_use]
    pub const fn sellable(mut self, sellable: bool) -> Self {
        self.sellable = sellable;
        self
    }
}

/// A stored price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Identity.
    pub key: PriceKey,
    /// Content.
    pub value: PriceValue,
    /// Version, incremented on every accepted change.
    pub version: u64,
    /// Tombstone flag.
    pub dropped: bool,
}

impl Price {
    /// Returns whether price resolution may consider this price.
    #[must_use]
    pub fn is_sellable(&self) -> bool {
        !self.dropped && self.value.sellable
    }
}

impl Droppable for Price {
    fn version(&self) -> u64 {
        self.version
    }

    fn dropped(&self) -> bool {
        self.dropped
    }
}

/// How prices sharing an inner record id combine into a selling price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PriceInnerRecordHandling {
    /// Inner record ids are ignored.
    #[default]
    None,
    /// The cheapest per-inner-record winner sells.
    FirstOccurrence,
    /// Per-inner-record winners are summed into one virtual price.
    Sum,
}

impl PriceInnerRecordHandling {
    /// Decodes a persisted handling code.
    ///
    /// # Errors
    ///
    /// Unknown codes are an `InvalidConfiguration` error.
    pub fn from_code(code: u8) -> CoreResult<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::FirstOccurrence),
            2 => Ok(Self::Sum),
            other => Err(CoreError::invalid_configuration(format!(
                "unknown price inner record handling code {other}"
            ))),
        }
    }

    /// Persisted handling code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::FirstOccurrence => 1,
            Self::Sum => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn handling_codes() {
        for handling in [
            PriceInnerRecordHandling::None,
            PriceInnerRecordHandling::FirstOccurrence,
            PriceInnerRecordHandling::Sum,
        ] {
            assert_eq!(
                PriceInnerRecordHandling::from_code(handling.code()).unwrap(),
                handling
            );
        }
        assert!(matches!(
            PriceInnerRecordHandling::from_code(9),
            Err(CoreError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn validity_is_inclusive() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        let range = DateTimeRange::between(from, to);
        assert!(range.contains(from));
        assert!(range.contains(to));
        assert!(!range.contains(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()));
        let open = DateTimeRange {
            from: Some(from),
            to: None,
        };
        assert!(open.contains(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()));
    }
}
