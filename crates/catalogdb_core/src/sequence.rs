//! Monotonic counters owned by a catalog.

use crate::types::CollectionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// What a sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    /// Transaction ids of the catalog.
    TransactionId,
    /// Collection file ids of the catalog.
    CollectionId,
    /// Generated primary keys of one collection.
    PrimaryKey(CollectionId),
    /// Entity index ids of one collection.
    IndexId(CollectionId),
}

/// One sequence per `(catalog, kind)`, handed to collections by reference.
#[derive(Debug, Default)]
pub struct SequenceRegistry {
    sequences: Mutex<HashMap<SequenceKind, Arc<AtomicI64>>>,
}

impl SequenceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: SequenceKind) -> Arc<AtomicI64> {
        Arc::clone(self.sequences.lock().entry(kind).or_default())
    }

    /// Returns the next value; the first value is 1.
    pub fn next(&self, kind: SequenceKind) -> i64 {
        self.counter(kind).fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the last value handed out (0 if none).
    pub fn current(&self, kind: SequenceKind) -> i64 {
        self.counter(kind).load(Ordering::SeqCst)
    }

    /// Raises the sequence so that `next` returns more than `value`.
    pub fn ensure_at_least(&self, kind: SequenceKind, value: i64) {
        self.counter(kind).fetch_max(value, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sequences_are_independent() {
        let registry = SequenceRegistry::new();
        let products = SequenceKind::PrimaryKey(CollectionId::new(1));
        let brands = SequenceKind::PrimaryKey(CollectionId::new(2));
        assert_eq!(registry.next(products), 1);
        assert_eq!(registry.next(products), 2);
        assert_eq!(registry.next(brands), 1);
        assert_eq!(registry.current(products), 2);
    }

    #[test]
    fn ensure_at_least_never_lowers() {
        let registry = SequenceRegistry::new();
        registry.ensure_at_least(SequenceKind::TransactionId, 10);
        registry.ensure_at_least(SequenceKind::TransactionId, 4);
        assert_eq!(registry.next(SequenceKind::TransactionId), 11);
    }

    #[test]
    fn concurrent_next_is_unique() {
        let registry = Arc::new(SequenceRegistry::new());
        let kind = SequenceKind::PrimaryKey(CollectionId::new(7));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || (0..100).map(|_| registry.next(kind)).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
        assert_eq!(all.last(), Some(&400));
    }
}
