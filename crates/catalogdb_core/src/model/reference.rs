//! References between entities.

use crate::model::entity::{AttributeRecord, Droppable};
use crate::types::PrimaryKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a reference: the referenced entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceKey {
    /// Type of the referenced entity.
    pub referenced_entity_type: String,
    /// Primary key of the referenced entity.
    pub primary_key: PrimaryKey,
}

impl ReferenceKey {
    /// Creates a reference key.
    pub fn new(referenced_entity_type: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            referenced_entity_type: referenced_entity_type.into(),
            primary_key,
        }
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.referenced_entity_type, self.primary_key)
    }
}

/// Grouping entity of a reference (e.g. the parameter group of a parameter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGroup {
    /// Type of the group entity.
    pub entity_type: String,
    /// Primary key of the group entity.
    pub primary_key: PrimaryKey,
    /// Version, incremented on every accepted change.
    pub version: u64,
    /// Tombstone flag.
    pub dropped: bool,
}

impl Droppable for ReferenceGroup {
    fn version(&self) -> u64 {
        self.version
    }

    fn dropped(&self) -> bool {
        self.dropped
    }
}

/// A reference from an entity to another entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Identity.
    pub key: ReferenceKey,
    /// Optional group.
    pub group: Option<ReferenceGroup>,
    /// Attributes of the reference itself.
    pub attributes: BTreeMap<String, AttributeRecord>,
    /// Version, incremented on every accepted change.
    pub version: u64,
    /// Tombstone flag.
    pub dropped: bool,
}

impl Reference {
    pub(crate) fn new(key: ReferenceKey) -> Self {
        Self {
            key,
            group: None,
            attributes: BTreeMap::new(),
            version: 1,
            dropped: false,
        }
    }

    /// Returns the live group, if any.
    #[must_use]
    pub fn group(&self) -> Option<&ReferenceGroup> {
        self.group.as_ref().filter(|g| !g.dropped)
    }

    /// Returns a live attribute of the reference.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&crate::model::AttributeValue> {
        self.attributes
            .get(name)
            .filter(|a| !a.dropped)
            .map(|a| &a.value)
    }
}

impl Droppable for Reference {
    fn version(&self) -> u64 {
        self.version
    }

    fn dropped(&self) -> bool {
        self.dropped
    }
}
