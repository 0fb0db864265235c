//! Reverse index from navigation targets to the entities that reference them.
//!
//! Scalar navigations are never stored: a child's parent is whatever entity
//! its foreign key values resolve to. This index answers the inverse
//! question (which children point at a given key) and is keyed by the
//! target's [`EntityKey`], so children loaded before their parent resolve
//! as soon as the parent is attached.

use crate::entity::EntityKey;
use crate::types::EntityHandle;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A scalar navigation identified by the declaring type and property name.
pub type NavigationRef = (String, String);

/// Target key to referencing children, grouped by navigation.
#[derive(Debug, Clone, Default)]
pub struct NavigationIndex {
    by_target: HashMap<EntityKey, BTreeMap<NavigationRef, BTreeSet<EntityHandle>>>,
}

impl NavigationIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `child` references `target` through `child_type.navigation`.
    pub fn link(
        &mut self,
        child_type: &str,
        navigation: &str,
        target: EntityKey,
        child: EntityHandle,
    ) {
        self.by_target
            .entry(target)
            .or_default()
            .entry((child_type.to_string(), navigation.to_string()))
            .or_default()
            .insert(child);
    }

    /// Removes a reference recorded by [`link`](Self::link).
    pub fn unlink(
        &mut self,
        child_type: &str,
        navigation: &str,
        target: &EntityKey,
        child: EntityHandle,
    ) {
        let Some(groups) = self.by_target.get_mut(target) else {
            return;
        };
        let nav = (child_type.to_string(), navigation.to_string());
        if let Some(children) = groups.get_mut(&nav) {
            children.remove(&child);
            if children.is_empty() {
                groups.remove(&nav);
            }
        }
        if groups.is_empty() {
            self.by_target.remove(target);
        }
    }

    /// Children referencing `target` through `child_type.navigation`, in handle order.
    pub fn children(
        &self,
        target: &EntityKey,
        child_type: &str,
        navigation: &str,
    ) -> Vec<EntityHandle> {
        self.by_target
            .get(target)
            .and_then(|groups| groups.get(&(child_type.to_string(), navigation.to_string())))
            .map(|children| children.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Moves every reference to `old` over to `new`.
    ///
    /// Returns the moved groups so the caller can rewrite the children's
    /// foreign key values.
    pub fn rekey_target(
        &mut self,
        old: &EntityKey,
        new: &EntityKey,
    ) -> Vec<(NavigationRef, Vec<EntityHandle>)> {
        let Some(groups) = self.by_target.remove(old) else {
            return Vec::new();
        };
        let moved = groups
            .iter()
            .map(|(nav, children)| (nav.clone(), children.iter().copied().collect()))
            .collect();
        let target = self.by_target.entry(new.clone()).or_default();
        for (nav, children) in groups {
            target.entry(nav).or_default().extend(children);
        }
        moved
    }

    /// Number of distinct referenced targets.
    pub fn target_count(&self) -> usize {
        self.by_target.len()
    }

    /// Removes every reference.
    pub fn clear(&mut self) {
        self.by_target.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_and_list_children_in_handle_order() {
        let mut index = NavigationIndex::new();
        let customer = EntityKey::single("Customer", 1);
        index.link("Order", "Customer", customer.clone(), EntityHandle::new(7));
        index.link("Order", "Customer", customer.clone(), EntityHandle::new(3));

        assert_eq!(
            index.children(&customer, "Order", "Customer"),
            vec![EntityHandle::new(3), EntityHandle::new(7)]
        );
        assert!(index.children(&customer, "Invoice", "Customer").is_empty());
    }

    #[test]
    fn unlink_cleans_up_empty_targets() {
        let mut index = NavigationIndex::new();
        let customer = EntityKey::single("Customer", 1);
        index.link("Order", "Customer", customer.clone(), EntityHandle::new(1));
        index.unlink("Order", "Customer", &customer, EntityHandle::new(1));
        assert_eq!(index.target_count(), 0);
        index.unlink("Order", "Customer", &customer, EntityHandle::new(1));
    }

    #[test]
    fn rekey_target_moves_children() {
        let mut index = NavigationIndex::new();
        let temp = EntityKey::single("Customer", -1);
        let real = EntityKey::single("Customer", 42);
        index.link("Order", "Customer", temp.clone(), EntityHandle::new(2));

        let moved = index.rekey_target(&temp, &real);
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].1, vec![EntityHandle::new(2)]);
        assert!(index.children(&temp, "Order", "Customer").is_empty());
        assert_eq!(index.children(&real, "Order", "Customer"), vec![EntityHandle::new(2)]);
    }
}
