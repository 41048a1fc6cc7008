//! Copy-on-write layers over immutable bases.
//!
//! Every mutable structure reachable from a [`crate::Catalog`] is an
//! immutable *base*. A transaction never mutates a base; it records its
//! changes in a private *delta*, reads through the delta, and at commit the
//! delta is merged into a brand new base:
//!
//! ```text
//!   base v1 ──read──▶ T1 delta ─┐
//!      │                        ├─ commit ─▶ base v2
//!      └──read──▶ T2 delta      │
//! ```
//!
//! Holders of `base v1` keep seeing `v1` for as long as they hold it.

use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::sync::Arc;

/// Immutable ordered map shared between snapshots.
///
/// Cloning is a reference-count bump.
pub struct VersionedMap<K, V> {
    entries: Arc<BTreeMap<K, V>>,
}

impl<K, V> Clone for VersionedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K: Ord, V> Default for VersionedMap<K, V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(BTreeMap::new()),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for VersionedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for VersionedMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: Arc::new(iter.into_iter().collect()),
        }
    }
}

impl<K: Ord + Clone, V: Clone> VersionedMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get(key)
    }

    /// Returns whether `key` is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, K, V> {
        self.entries.iter()
    }

    /// Iterates keys in order.
    pub fn keys(&self) -> btree_map::Keys<'_, K, V> {
        self.entries.keys()
    }

    /// Iterates values in key order.
    pub fn values(&self) -> btree_map::Values<'_, K, V> {
        self.entries.values()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns whether both maps share the same base.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Merges `delta` into a new base. `self` is left untouched.
    ///
    /// An empty delta yields a clone sharing the same base.
    #[must_use]
    pub fn commit(&self, delta: LayerDelta<K, V>) -> Self {
        if delta.is_empty() {
            return self.clone();
        }
        let mut entries = BTreeMap::clone(&self.entries);
        for (key, change) in delta.changes {
            match change {
                Some(value) => {
                    entries.insert(key, value);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Self {
            entries: Arc::new(entries),
        }
    }
}

/// Transaction-private changes over a [`VersionedMap`].
///
/// `None` marks a removal of the key.
#[derive(Debug, Clone)]
pub struct LayerDelta<K, V> {
    changes: BTreeMap<K, Option<V>>,
}

impl<K: Ord, V> Default for LayerDelta<K, V> {
    fn default() -> Self {
        Self {
            changes: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> LayerDelta<K, V> {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `key`: the delta first, then `base`.
    pub fn read<'a>(&'a self, base: &'a VersionedMap<K, V>, key: &K) -> Option<&'a V> {
        match self.changes.get(key) {
            Some(change) => change.as_ref(),
            None => base.get(key),
        }
    }

    /// Records a write of `key`.
    pub fn write(&mut self, key: K, value: V) {
        self.changes.insert(key, Some(value));
    }

    /// Records a removal of `key`.
    pub fn remove(&mut self, key: K) {
        self.changes.insert(key, None);
    }

    /// Returns a mutable slot for `key`, copying the base value into the
    /// delta on first access. `None` if the key is absent or removed.
    pub fn entry_mut(&mut self, base: &VersionedMap<K, V>, key: &K) -> Option<&mut V> {
        if !self.changes.contains_key(key) {
            let value = base.get(key)?.clone();
            self.changes.insert(key.clone(), Some(value));
        }
        self.changes.get_mut(key).and_then(Option::as_mut)
    }

    /// Iterates the keys this delta writes or removes.
    pub fn keys_touched(&self) -> btree_map::Keys<'_, K, Option<V>> {
        self.changes.keys()
    }

    /// Iterates the recorded changes.
    pub fn changes(&self) -> btree_map::Iter<'_, K, Option<V>> {
        self.changes.iter()
    }

    /// Iterates `base` merged with this delta.
    pub fn merged<'a>(
        &'a self,
        base: &'a VersionedMap<K, V>,
    ) -> impl Iterator<Item = (&'a K, &'a V)> + 'a {
        base.iter()
            .filter(|(k, _)| !self.changes.contains_key(*k))
            .chain(
                self.changes
                    .iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| (k, v))),
            )
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Drops the delta; the base is unaffected.
    pub fn discard(self) {}
}

/// Values carrying an optimistic version token.
pub trait Versioned {
    /// Current version of the value.
    fn version(&self) -> u64;
}

/// Single-value layer: an immutable base plus an optionally staged
/// replacement, updated by compare-and-set on the version token.
#[derive(Debug)]
pub struct VersionedCell<T> {
    base: Arc<T>,
    staged: Mutex<Option<Arc<T>>>,
}

impl<T: Versioned> VersionedCell<T> {
    /// Creates a cell over `base`.
    pub fn new(base: Arc<T>) -> Self {
        Self {
            base,
            staged: Mutex::new(None),
        }
    }

    /// Returns the staged value, or the base.
    pub fn get(&self) -> Arc<T> {
        self.staged
            .lock()
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.base))
    }

    /// The value the cell was created over.
    pub fn base(&self) -> &Arc<T> {
        &self.base
    }

    /// Stages `value` if the current value still has version `expected`.
    ///
    /// On failure returns the value that won instead.
    pub fn compare_and_set(&self, expected: u64, value: Arc<T>) -> Result<Arc<T>, Arc<T>> {
        let mut staged = self.staged.lock();
        let current = staged.clone().unwrap_or_else(|| Arc::clone(&self.base));
        if current.version() != expected {
            return Err(current);
        }
        *staged = Some(Arc::clone(&value));
        Ok(value)
    }

    /// Returns the staged value if one was set.
    pub fn staged(&self) -> Option<Arc<T>> {
        self.staged.lock().clone()
    }
}
