//! Parent/child placement of entities.

use crate::error::{CoreError, CoreResult};
use crate::types::PrimaryKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Hierarchy of a collection's entities.
///
/// Entities without a parent are roots. A parent need not exist yet; its
/// children are listed under it regardless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyIndex {
    parents: BTreeMap<PrimaryKey, PrimaryKey>,
    children: BTreeMap<PrimaryKey, BTreeSet<PrimaryKey>>,
    roots: BTreeSet<PrimaryKey>,
}

impl HierarchyIndex {
    /// Creates an empty hierarchy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new entity as a root.
    pub fn insert_root(&mut self, primary_key: PrimaryKey) {
        if !self.parents.contains_key(&primary_key) {
            self.roots.insert(primary_key);
        }
    }

    /// Moves `primary_key` under `new` (or to the roots).
    ///
    /// # Errors
    ///
    /// `Consistency` if `old` is not the recorded parent, `InvalidRequest`
    /// if the move would create a cycle.
    pub fn set_parent(
        &mut self,
        primary_key: PrimaryKey,
        old: Option<PrimaryKey>,
        new: Option<PrimaryKey>,
    ) -> CoreResult<()> {
        let recorded = self.parents.get(&primary_key).copied();
        if recorded != old {
            return Err(CoreError::consistency(format!(
                "entity {primary_key} is recorded under {recorded:?}, not {old:?}"
            )));
        }
        if let Some(parent) = new {
            if self.is_ancestor_or_self(primary_key, parent) {
                return Err(CoreError::invalid_request(format!(
                    "placing {primary_key} under {parent} would create a cycle"
                )));
            }
        }
        self.detach(primary_key);
        match new {
            Some(parent) => {
                self.parents.insert(primary_key, parent);
                self.children.entry(parent).or_default().insert(primary_key);
            }
            None => {
                self.roots.insert(primary_key);
            }
        }
        Ok(())
    }

    fn detach(&mut self, primary_key: PrimaryKey) {
        self.roots.remove(&primary_key);
        if let Some(parent) = self.parents.remove(&primary_key) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.remove(&primary_key);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }

    /// Removes the entity; its children stay under it.
    pub fn remove(&mut self, primary_key: PrimaryKey) {
        self.detach(primary_key);
    }

    fn is_ancestor_or_self(&self, ancestor: PrimaryKey, mut node: PrimaryKey) -> bool {
        let mut steps = 0;
        loop {
            if node == ancestor {
                return true;
            }
            match self.parents.get(&node) {
                Some(&parent) if steps <= self.parents.len() => {
                    node = parent;
                    steps += 1;
                }
                _ => return false,
            }
        }
    }

    /// Recorded parent of `primary_key`.
    #[must_use]
    pub fn parent(&self, primary_key: PrimaryKey) -> Option<PrimaryKey> {
        self.parents.get(&primary_key).copied()
    }

    /// Direct children, or the roots for `None`.
    #[must_use]
    pub fn children(&self, parent: Option<PrimaryKey>) -> Vec<PrimaryKey> {
        match parent {
            Some(parent) => self
                .children
                .get(&parent)
                .map(|c| c.iter().copied().collect())
                .unwrap_or_default(),
            None => self.roots.iter().copied().collect(),
        }
    }

    /// `primary_key` followed by all of its descendants, breadth first.
    #[must_use]
    pub fn list_subtree_including_self(&self, primary_key: PrimaryKey) -> Vec<PrimaryKey> {
        let mut listed = vec![primary_key];
        let mut next = 0;
        while next < listed.len() {
            if let Some(children) = self.children.get(&listed[next]) {
                listed.extend(children.iter().copied());
            }
            next += 1;
        }
        listed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_tree() -> HierarchyIndex {
        // 1 ─┬─ 2 ── 4
        //    └─ 3
        let mut index = HierarchyIndex::new();
        for pk in 1..=4 {
            index.insert_root(pk);
        }
        index.set_parent(2, None, Some(1)).unwrap();
        index.set_parent(3, None, Some(1)).unwrap();
        index.set_parent(4, None, Some(2)).unwrap();
        index
    }

    #[test]
    fn subtree_lists_descendants() {
        let index = create_tree();
        assert_eq!(index.list_subtree_including_self(1), vec![1, 2, 3, 4]);
        assert_eq!(index.list_subtree_including_self(2), vec![2, 4]);
        assert_eq!(index.list_subtree_including_self(9), vec![9]);
        assert_eq!(index.children(None), vec![1]);
    }

    #[test]
    fn moving_updates_both_sides() {
        let mut index = create_tree();
        index.set_parent(4, Some(2), Some(3)).unwrap();
        assert_eq!(index.children(Some(2)), Vec::<PrimaryKey>::new());
        assert_eq!(index.children(Some(3)), vec![4]);
        index.set_parent(4, Some(3), None).unwrap();
        assert_eq!(index.children(None), vec![1, 4]);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut index = create_tree();
        let err = index.set_parent(1, None, Some(4)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
    }

    #[test]
    fn stale_old_parent_is_inconsistent() {
        let mut index = create_tree();
        let err = index.set_parent(4, Some(3), None).unwrap_err();
        assert!(matches!(err, CoreError::Consistency { .. }));
    }
}
