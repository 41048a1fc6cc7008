//! Records a transaction registered for one entity type.

use crate::collection::parts::Payload;
use catalogdb_storage::RecordKey;
use std::collections::BTreeMap;

/// Pending record writes of one entity type; `None` marks a removal.
///
/// Registering the same key again replaces the earlier registration.
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    records: BTreeMap<RecordKey, Option<Payload>>,
    registrations: usize,
}

impl PendingWrites {
    pub(crate) fn write(&mut self, key: RecordKey, payload: Payload) {
        self.registrations += 1;
        self.records.insert(key, Some(payload));
    }

    pub(crate) fn remove(&mut self, key: RecordKey) {
        self.registrations += 1;
        self.records.insert(key, None);
    }

    /// The latest registration for `key`.
    pub(crate) fn get(&self, key: &RecordKey) -> Option<Option<Payload>> {
        self.records.get(key).cloned()
    }

    /// Distinct records touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of `register_*` calls, including overwritten ones.
    #[must_use]
    pub fn registrations(&self) -> usize {
        self.registrations
    }

    pub(crate) fn into_records(self) -> impl Iterator<Item = (RecordKey, Option<Payload>)> {
        self.records.into_iter()
    }
}
