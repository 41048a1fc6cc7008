//! Immutable key tables.
//!
//! A key table maps every live record key of one store to the location of
//! its newest frame. Tables are never mutated after a flush produces them;
//! a snapshot holding an old table keeps reading the old frames, which is
//! what makes the append-only store safe for concurrent readers.

use crate::record::{FileLocation, KeyId, RecordKey, RecordType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Snapshot of record locations in one store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTable {
    version: u64,
    locations: BTreeMap<(RecordType, i64), FileLocation>,
    aliases: BTreeMap<String, i64>,
    last_alias: i64,
}

impl KeyTable {
    /// Creates an empty table at version zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of the store when this table was flushed.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Returns true if no record is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Resolves a key to its numeric id, following compressed aliases.
    #[must_use]
    pub fn resolve(&self, key: &RecordKey) -> Option<i64> {
        match &key.id {
            KeyId::Numeric(id) => Some(*id),
            KeyId::Named(name) => self.aliases.get(name).copied(),
        }
    }

    /// Location of the newest frame for `key`.
    #[must_use]
    pub fn location(&self, key: &RecordKey) -> Option<FileLocation> {
        let id = self.resolve(key)?;
        self.locations.get(&(key.record_type, id)).copied()
    }

    /// Returns whether `key` is live.
    #[must_use]
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.location(key).is_some()
    }

    /// Iterates `(type, id, location)` over all live records.
    pub fn entries(&self) -> impl Iterator<Item = (RecordType, i64, FileLocation)> + '_ {
        self.locations
            .iter()
            .map(|(&(record_type, id), &location)| (record_type, id, location))
    }

    /// Record types with at least one live record.
    #[must_use]
    pub fn record_types(&self) -> BTreeSet<RecordType> {
        self.locations.keys().map(|(t, _)| *t).collect()
    }

    /// The compressed key table: named key to numeric alias.
    #[must_use]
    pub fn compressed_keys(&self) -> &BTreeMap<String, i64> {
        &self.aliases
    }

    pub(crate) fn next_version(&self) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next
    }

    /// Aliases are negative so they never collide with numeric ids.
    pub(crate) fn resolve_or_alias(&mut self, key: &RecordKey) -> i64 {
        match &key.id {
            KeyId::Numeric(id) => *id,
            KeyId::Named(name) => {
                if let Some(alias) = self.aliases.get(name) {
                    return *alias;
                }
                self.last_alias -= 1;
                self.aliases.insert(name.clone(), self.last_alias);
                self.last_alias
            }
        }
    }

    pub(crate) fn set(&mut self, record_type: RecordType, id: i64, location: FileLocation) {
        self.locations.insert((record_type, id), location);
    }

    pub(crate) fn unset(&mut self, record_type: RecordType, id: i64) {
        self.locations.remove(&(record_type, id));
    }

    pub(crate) fn to_persisted(&self) -> PersistedKeyTable {
        PersistedKeyTable {
            version: self.version,
            entries: self
                .entries()
                .map(|(record_type, id, location)| (record_type.0, id, location))
                .collect(),
            aliases: self.aliases.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            last_alias: self.last_alias,
        }
    }

    pub(crate) fn from_persisted(persisted: PersistedKeyTable) -> Self {
        Self {
            version: persisted.version,
            locations: persisted
                .entries
                .into_iter()
                .map(|(record_type, id, location)| ((RecordType(record_type), id), location))
                .collect(),
            aliases: persisted.aliases.into_iter().collect(),
            last_alias: persisted.last_alias,
        }
    }
}

/// Flat serialized form; CBOR maps with tuple keys are avoided on disk.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PersistedKeyTable {
    version: u64,
    entries: Vec<(u8, i64, FileLocation)>,
    aliases: Vec<(String, i64)>,
    last_alias: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BODY: RecordType = RecordType(2);
    const DATA: RecordType = RecordType(4);

    #[test]
    fn named_keys_get_negative_aliases() {
        let mut table = KeyTable::new();
        let a = table.resolve_or_alias(&RecordKey::named(DATA, "1:gallery"));
        let b = table.resolve_or_alias(&RecordKey::named(DATA, "1:manual"));
        let again = table.resolve_or_alias(&RecordKey::named(DATA, "1:gallery"));
        assert_eq!(a, -1);
        assert_eq!(b, -2);
        assert_eq!(again, a);
        assert_eq!(table.compressed_keys().len(), 2);
    }

    #[test]
    fn location_lookup() {
        let mut table = KeyTable::new();
        let location = FileLocation {
            offset: 0,
            length: 40,
        };
        table.set(BODY, 7, location);
        assert_eq!(table.location(&RecordKey::numeric(BODY, 7)), Some(location));
        assert!(!table.contains(&RecordKey::numeric(DATA, 7)));
        table.unset(BODY, 7);
        assert!(table.is_empty());
    }

    #[test]
    fn persisted_form_roundtrip() {
        let mut table = KeyTable::new().next_version();
        let alias = table.resolve_or_alias(&RecordKey::named(DATA, "3:spec"));
        table.set(
            DATA,
            alias,
            FileLocation {
                offset: 12,
                length: 30,
            },
        );
        table.set(
            BODY,
            3,
            FileLocation {
                offset: 42,
                length: 25,
            },
        );
        let bytes = catalogdb_codec::encode(&table.to_persisted()).unwrap();
        let decoded =
            KeyTable::from_persisted(catalogdb_codec::decode::<PersistedKeyTable>(&bytes).unwrap());
        assert_eq!(decoded, table);
        assert_eq!(decoded.record_types().len(), 2);
    }

    proptest! {
        #[test]
        fn aliases_are_stable_and_distinct(names in proptest::collection::vec("[a-z]{1,4}", 1..24)) {
            let mut table = KeyTable::new();
            let mut seen = BTreeMap::new();
            for name in &names {
                let alias = table.resolve_or_alias(&RecordKey::named(DATA, name.as_str()));
                prop_assert!(alias < 0);
                prop_assert_eq!(*seen.entry(name.clone()).or_insert(alias), alias);
            }
            let distinct: BTreeSet<i64> = seen.values().copied().collect();
            prop_assert_eq!(distinct.len(), seen.len());
            prop_assert_eq!(table.compressed_keys().len(), seen.len());
        }
    }
}
