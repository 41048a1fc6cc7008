//! Entity mutations.

use crate::model::price::{PriceInnerRecordHandling, PriceKey, PriceValue};
use crate::model::reference::ReferenceKey;
use crate::model::value::AttributeValue;
use crate::types::PrimaryKey;

/// A change to one unit of an entity.
///
/// `expected_version` is an optimistic token: when set, the mutation is
/// rejected unless the unit is currently at that version (0 for a unit
/// that never existed).
#[derive(Debug, Clone, PartialEq)]
pub enum LocalMutation {
    /// Sets an attribute.
    UpsertAttribute {
        /// Attribute name.
        name: String,
        /// New value.
        value: AttributeValue,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Drops an attribute.
    RemoveAttribute {
        /// Attribute name.
        name: String,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Sets an associated data value.
    UpsertAssociatedData {
        /// Associated data name.
        name: String,
        /// New value.
        value: AttributeValue,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Drops an associated data value.
    RemoveAssociatedData {
        /// Associated data name.
        name: String,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Sets a price.
    UpsertPrice {
        /// Price identity.
        key: PriceKey,
        /// New content.
        value: PriceValue,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Drops a price.
    RemovePrice {
        /// Price identity.
        key: PriceKey,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Changes how prices combine into a selling price.
    SetPriceInnerRecordHandling(PriceInnerRecordHandling),
    /// Adds (or restores) a reference.
    UpsertReference {
        /// Referenced entity.
        key: ReferenceKey,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Drops a reference.
    RemoveReference {
        /// Referenced entity.
        key: ReferenceKey,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Sets an attribute on a reference.
    UpsertReferenceAttribute {
        /// The reference.
        reference: ReferenceKey,
        /// Attribute name.
        name: String,
        /// New value.
        value: AttributeValue,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Drops an attribute of a reference.
    RemoveReferenceAttribute {
        /// The reference.
        reference: ReferenceKey,
        /// Attribute name.
        name: String,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Sets the group of a reference.
    SetReferenceGroup {
        /// The reference.
        reference: ReferenceKey,
        /// Group entity type.
        group_type: String,
        /// Group primary key.
        group_primary_key: PrimaryKey,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Drops the group of a reference.
    RemoveReferenceGroup {
        /// The reference.
        reference: ReferenceKey,
        /// Optimistic token.
        expected_version: Option<u64>,
    },
    /// Places the entity under a hierarchical parent.
    SetParent {
        /// Parent primary key.
        parent: PrimaryKey,
    },
    /// Makes the entity a hierarchy root.
    RemoveParent,
}

impl LocalMutation {
    /// Shorthand for an unconditional attribute upsert.
    pub fn upsert_attribute(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::UpsertAttribute {
            name: name.into(),
            value: value.into(),
            expected_version: None,
        }
    }

    /// Shorthand for an unconditional price upsert.
    #[must_use]
    pub fn upsert_price(key: PriceKey, value: PriceValue) -> Self {
        Self::UpsertPrice {
            key,
            value,
            expected_version: None,
        }
    }

    /// Shorthand for an unconditional reference upsert.
    pub fn upsert_reference(referenced_entity_type: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self::UpsertReference {
            key: ReferenceKey::new(referenced_entity_type, primary_key),
            expected_version: None,
        }
    }
}

/// Expectation about whether the target entity already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityExistence {
    /// Insert or update.
    #[default]
    MayExist,
    /// Update only.
    MustExist,
    /// Insert only.
    MustNotExist,
}

/// A change to a whole entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityMutation {
    /// Creates or updates an entity by applying local mutations in order.
    Upsert {
        /// Target collection.
        entity_type: String,
        /// Primary key; `None` asks for a generated one.
        primary_key: Option<PrimaryKey>,
        /// Existence expectation.
        existence: EntityExistence,
        /// Unit changes, applied in order.
        mutations: Vec<LocalMutation>,
    },
    /// Removes an entity with all its units.
    Remove {
        /// Target collection.
        entity_type: String,
        /// Entity to remove.
        primary_key: PrimaryKey,
    },
}

impl EntityMutation {
    /// Creates an upsert that may insert or update.
    pub fn upsert(
        entity_type: impl Into<String>,
        primary_key: Option<PrimaryKey>,
        mutations: Vec<LocalMutation>,
    ) -> Self {
        Self::Upsert {
            entity_type: entity_type.into(),
            primary_key,
            existence: EntityExistence::MayExist,
            mutations,
        }
    }

    /// Target entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        match self {
            Self::Upsert { entity_type, .. } | Self::Remove { entity_type, .. } => entity_type,
        }
    }

    /// Target primary key, if known.
    #[must_use]
    pub fn primary_key(&self) -> Option<PrimaryKey> {
        match self {
            Self::Upsert { primary_key, .. } => *primary_key,
            Self::Remove { primary_key, .. } => Some(*primary_key),
        }
    }
}
