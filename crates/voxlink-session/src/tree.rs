//! Live channel hierarchy reconstructed from add/move/remove/reorder
//! notifications.
//!
//! Each tracked node guards its own children list, so writes under one parent
//! never contend with reads or writes under an unrelated parent.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::trace;
use voxlink_core::EntityId;

/// A notification the tracker could not apply as given.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TreeAnomaly {
    #[error("parent {parent} of {id} is not tracked")]
    UntrackedParent { id: EntityId, parent: EntityId },
    #[error("entity {0} is not tracked")]
    UntrackedEntity(EntityId),
    #[error("entity {0} is already tracked")]
    AlreadyTracked(EntityId),
    #[error("moving {id} under {parent} would make it its own ancestor")]
    WouldCycle { id: EntityId, parent: EntityId },
    #[error("the root cannot be added, moved, reordered or removed")]
    RootImmutable,
    #[error("preceding sibling {order_key} of {id} not found under {parent}; appended")]
    OrderKeyMissing {
        id: EntityId,
        parent: EntityId,
        order_key: EntityId,
    },
}

impl TreeAnomaly {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UntrackedParent { .. } => "untracked_parent",
            Self::UntrackedEntity(_) => "untracked_entity",
            Self::AlreadyTracked(_) => "already_tracked",
            Self::WouldCycle { .. } => "would_cycle",
            Self::RootImmutable => "root_immutable",
            Self::OrderKeyMissing { .. } => "order_key_missing",
        }
    }

    /// Whether the update still took effect despite the anomaly.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::OrderKeyMissing { .. })
    }
}

#[derive(Clone, Copy, Debug)]
struct Placement {
    parent: Option<EntityId>,
    order_key: EntityId,
}

#[derive(Debug)]
struct Node {
    placement: RwLock<Placement>,
    children: RwLock<Vec<EntityId>>,
}

impl Node {
    fn new(parent: Option<EntityId>, order_key: EntityId) -> Arc<Self> {
        Arc::new(Self {
            placement: RwLock::new(Placement { parent, order_key }),
            children: RwLock::new(Vec::new()),
        })
    }
}

/// Insert `id` right after its preceding sibling, at the front for key 0, or
/// at the end when the sibling is not present. Returns false in the last case.
fn insert_after(children: &mut Vec<EntityId>, id: EntityId, order_key: EntityId) -> bool {
    if order_key.is_none() {
        children.insert(0, id);
        return true;
    }
    match children.iter().position(|c| *c == order_key) {
        Some(pos) => {
            children.insert(pos + 1, id);
            true
        }
        None => {
            children.push(id);
            false
        }
    }
}

pub struct HierarchyTracker {
    nodes: DashMap<EntityId, Arc<Node>>,
}

impl Default for HierarchyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchyTracker {
    /// A tracker holding only the root.
    pub fn new() -> Self {
        let nodes = DashMap::new();
        nodes.insert(EntityId::NONE, Node::new(None, EntityId::NONE));
        Self { nodes }
    }

    fn node(&self, id: EntityId) -> Option<Arc<Node>> {
        self.nodes.get(&id).map(|n| Arc::clone(n.value()))
    }

    /// Start tracking `id` under `parent`, placed after sibling `order_key`.
    pub fn added(
        &self,
        id: EntityId,
        parent: EntityId,
        order_key: EntityId,
    ) -> Result<(), TreeAnomaly> {
        if id.is_none() {
            return Err(TreeAnomaly::RootImmutable);
        }
        let parent_node = self
            .node(parent)
            .ok_or(TreeAnomaly::UntrackedParent { id, parent })?;

        match self.nodes.entry(id) {
            Entry::Occupied(_) => return Err(TreeAnomaly::AlreadyTracked(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(Node::new(Some(parent), order_key));
            }
        }

        let placed = insert_after(&mut parent_node.children.write(), id, order_key);
        trace!(entity = %id, parent = %parent, order_key = %order_key, "channel added");
        placed
            .then_some(())
            .ok_or(TreeAnomaly::OrderKeyMissing { id, parent, order_key })
    }

    /// Reparent `id` under `parent`, placed after sibling `order_key`.
    pub fn moved(
        &self,
        id: EntityId,
        parent: EntityId,
        order_key: EntityId,
    ) -> Result<(), TreeAnomaly> {
        if id.is_none() {
            return Err(TreeAnomaly::RootImmutable);
        }
        let node = self.node(id).ok_or(TreeAnomaly::UntrackedEntity(id))?;
        let new_parent = self
            .node(parent)
            .ok_or(TreeAnomaly::UntrackedParent { id, parent })?;
        if self.is_ancestor_or_self(id, parent) {
            return Err(TreeAnomaly::WouldCycle { id, parent });
        }

        let old_parent = {
            let mut placement = node.placement.write();
            let old = placement.parent;
            *placement = Placement {
                parent: Some(parent),
                order_key,
            };
            old
        };
        if let Some(old) = old_parent.and_then(|p| self.node(p)) {
            old.children.write().retain(|c| *c != id);
        }

        let placed = insert_after(&mut new_parent.children.write(), id, order_key);
        trace!(entity = %id, parent = %parent, order_key = %order_key, "channel moved");
        placed
            .then_some(())
            .ok_or(TreeAnomaly::OrderKeyMissing { id, parent, order_key })
    }

    /// Re-place `id` among its siblings if its order key changed.
    pub fn order_changed(&self, id: EntityId, order_key: EntityId) -> Result<(), TreeAnomaly> {
        if id.is_none() {
            return Err(TreeAnomaly::RootImmutable);
        }
        let node = self.node(id).ok_or(TreeAnomaly::UntrackedEntity(id))?;
        let placement = *node.placement.read();
        if placement.order_key == order_key {
            return Ok(());
        }
        let parent = placement.parent.unwrap_or(EntityId::NONE);
        let parent_node = self
            .node(parent)
            .ok_or(TreeAnomaly::UntrackedParent { id, parent })?;

        let placed = {
            let mut children = parent_node.children.write();
            children.retain(|c| *c != id);
            let placed = insert_after(&mut children, id, order_key);
            node.placement.write().order_key = order_key;
            placed
        };
        trace!(entity = %id, order_key = %order_key, "channel reordered");
        placed
            .then_some(())
            .ok_or(TreeAnomaly::OrderKeyMissing { id, parent, order_key })
    }

    /// Stop tracking `id`. Its children list is cleared; descendant records
    /// stay until their own removal arrives.
    pub fn removed(&self, id: EntityId) -> Result<(), TreeAnomaly> {
        if id.is_none() {
            return Err(TreeAnomaly::RootImmutable);
        }
        let (_, node) = self
            .nodes
            .remove(&id)
            .ok_or(TreeAnomaly::UntrackedEntity(id))?;

        let parent = node.placement.read().parent;
        if let Some(parent_node) = parent.and_then(|p| self.node(p)) {
            parent_node.children.write().retain(|c| *c != id);
        }
        node.children.write().clear();
        trace!(entity = %id, "channel removed");
        Ok(())
    }

    /// Discard everything and reseed with just the root.
    pub fn reset(&self) {
        self.nodes.clear();
        self.nodes
            .insert(EntityId::NONE, Node::new(None, EntityId::NONE));
        trace!("hierarchy reset");
    }

    /// Point-in-time copy of the ordered children of `id`; empty if untracked.
    pub fn children_of(&self, id: EntityId) -> Vec<EntityId> {
        self.node(id)
            .map(|n| n.children.read().clone())
            .unwrap_or_default()
    }

    /// Parent of a tracked non-root entity.
    pub fn parent_of(&self, id: EntityId) -> Option<EntityId> {
        self.node(id).and_then(|n| n.placement.read().parent)
    }

    pub fn order_key_of(&self, id: EntityId) -> Option<EntityId> {
        if id.is_none() {
            return None;
        }
        self.node(id).map(|n| n.placement.read().order_key)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of tracked entities, excluding the root.
    pub fn len(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Depth-first `(id, depth)` pairs in sibling order, root excluded.
    /// Top-level channels have depth 0.
    pub fn walk(&self) -> Vec<(EntityId, usize)> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<(EntityId, usize)> = self
            .children_of(EntityId::NONE)
            .into_iter()
            .rev()
            .map(|id| (id, 0))
            .collect();
        while let Some((id, depth)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.push((id, depth));
            stack.extend(
                self.children_of(id)
                    .into_iter()
                    .rev()
                    .map(|child| (child, depth + 1)),
            );
        }
        out
    }

    fn is_ancestor_or_self(&self, candidate: EntityId, of: EntityId) -> bool {
        let mut cursor = Some(of);
        let mut steps = 0usize;
        let bound = self.nodes.len() + 1;
        while let Some(id) = cursor {
            if id == candidate {
                return true;
            }
            steps += 1;
            if steps > bound {
                return false;
            }
            cursor = self.node(id).and_then(|n| n.placement.read().parent);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> EntityId {
        EntityId(raw)
    }

    fn ids(raw: &[u64]) -> Vec<EntityId> {
        raw.iter().copied().map(EntityId).collect()
    }

    fn lobby_and_music() -> HierarchyTracker {
        let tree = HierarchyTracker::new();
        tree.added(id(5), id(0), id(0)).unwrap();
        tree.added(id(7), id(0), id(5)).unwrap();
        tree
    }

    #[test]
    fn reconstructs_order_from_preceding_sibling() {
        let tree = lobby_and_music();
        assert_eq!(tree.children_of(id(0)), ids(&[5, 7]));
        assert_eq!(tree.parent_of(id(7)), Some(id(0)));
        assert_eq!(tree.order_key_of(id(7)), Some(id(5)));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn zero_order_key_inserts_at_front() {
        let tree = lobby_and_music();
        tree.added(id(3), id(0), id(0)).unwrap();
        tree.added(id(6), id(0), id(5)).unwrap();
        assert_eq!(tree.children_of(id(0)), ids(&[3, 5, 6, 7]));
    }

    #[test]
    fn reparenting_moves_between_lists() {
        let tree = lobby_and_music();
        tree.moved(id(5), id(7), id(0)).unwrap();
        assert_eq!(tree.children_of(id(0)), ids(&[7]));
        assert_eq!(tree.children_of(id(7)), ids(&[5]));
        assert_eq!(tree.parent_of(id(5)), Some(id(7)));
    }

    #[test]
    fn move_into_own_subtree_is_rejected() {
        let tree = lobby_and_music();
        tree.moved(id(5), id(7), id(0)).unwrap();
        let err = tree.moved(id(7), id(5), id(0)).unwrap_err();
        assert_eq!(err, TreeAnomaly::WouldCycle { id: id(7), parent: id(5) });
        assert_eq!(tree.moved(id(7), id(7), id(0)).unwrap_err().kind(), "would_cycle");
        // Nothing changed.
        assert_eq!(tree.children_of(id(0)), ids(&[7]));
        assert_eq!(tree.children_of(id(7)), ids(&[5]));
    }

    #[test]
    fn untracked_parent_is_skipped() {
        let tree = lobby_and_music();
        let err = tree.added(id(9), id(42), id(0)).unwrap_err();
        assert_eq!(err, TreeAnomaly::UntrackedParent { id: id(9), parent: id(42) });
        assert!(!err.is_applied());
        assert!(!tree.contains(id(9)));
        assert_eq!(tree.children_of(id(0)), ids(&[5, 7]));
    }

    #[test]
    fn move_and_reorder_of_untracked_entity_are_skipped() {
        let tree = lobby_and_music();
        assert_eq!(
            tree.moved(id(9), id(0), id(0)).unwrap_err(),
            TreeAnomaly::UntrackedEntity(id(9))
        );
        assert_eq!(
            tree.order_changed(id(9), id(5)).unwrap_err(),
            TreeAnomaly::UntrackedEntity(id(9))
        );
        assert_eq!(tree.removed(id(9)).unwrap_err().kind(), "untracked_entity");
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn duplicate_add_keeps_first_placement() {
        let tree = lobby_and_music();
        let err = tree.added(id(5), id(7), id(0)).unwrap_err();
        assert_eq!(err, TreeAnomaly::AlreadyTracked(id(5)));
        assert_eq!(tree.children_of(id(0)), ids(&[5, 7]));
        assert!(tree.children_of(id(7)).is_empty());
    }

    #[test]
    fn missing_order_key_appends_and_reports() {
        let tree = lobby_and_music();
        let err = tree.added(id(8), id(0), id(99)).unwrap_err();
        assert!(err.is_applied());
        assert_eq!(err.kind(), "order_key_missing");
        assert_eq!(tree.children_of(id(0)), ids(&[5, 7, 8]));
    }

    #[test]
    fn root_is_immutable() {
        let tree = HierarchyTracker::new();
        assert_eq!(tree.added(id(0), id(0), id(0)), Err(TreeAnomaly::RootImmutable));
        assert_eq!(tree.removed(id(0)), Err(TreeAnomaly::RootImmutable));
        assert!(tree.contains(id(0)));
        assert_eq!(tree.parent_of(id(0)), None);
    }

    #[test]
    fn order_change_reinserts_within_parent() {
        let tree = lobby_and_music();
        tree.added(id(9), id(0), id(7)).unwrap();
        assert_eq!(tree.children_of(id(0)), ids(&[5, 7, 9]));

        tree.order_changed(id(9), id(0)).unwrap();
        assert_eq!(tree.children_of(id(0)), ids(&[9, 5, 7]));

        tree.order_changed(id(5), id(7)).unwrap();
        assert_eq!(tree.children_of(id(0)), ids(&[9, 7, 5]));
    }

    #[test]
    fn order_change_under_removed_parent_is_not_recorded() {
        let tree = lobby_and_music();
        tree.added(id(11), id(5), id(0)).unwrap();
        tree.removed(id(5)).unwrap();

        let err = tree.order_changed(id(11), id(3)).unwrap_err();
        assert_eq!(err, TreeAnomaly::UntrackedParent { id: id(11), parent: id(5) });
        assert_eq!(tree.order_key_of(id(11)), Some(id(0)));

        // Once under a live parent, a reorder repositions it.
        tree.moved(id(11), id(0), id(0)).unwrap();
        assert_eq!(tree.children_of(id(0)), ids(&[11, 7]));
        tree.order_changed(id(11), id(7)).unwrap();
        assert_eq!(tree.children_of(id(0)), ids(&[7, 11]));
        assert_eq!(tree.order_key_of(id(11)), Some(id(7)));
    }

    #[test]
    fn unchanged_order_key_is_a_no_op() {
        let tree = lobby_and_music();
        tree.order_changed(id(7), id(5)).unwrap();
        assert_eq!(tree.children_of(id(0)), ids(&[5, 7]));
    }

    #[test]
    fn removal_clears_children_without_cascading() {
        let tree = lobby_and_music();
        tree.added(id(11), id(5), id(0)).unwrap();
        tree.added(id(12), id(5), id(11)).unwrap();

        tree.removed(id(5)).unwrap();
        assert_eq!(tree.children_of(id(0)), ids(&[7]));
        assert!(tree.children_of(id(5)).is_empty());
        assert!(!tree.contains(id(5)));
        // Descendants wait for their own removal.
        assert!(tree.contains(id(11)));
        tree.removed(id(11)).unwrap();
        tree.removed(id(12)).unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn reset_keeps_only_root() {
        let tree = lobby_and_music();
        for n in 100..150 {
            tree.added(id(n), id(0), id(0)).unwrap();
        }
        tree.reset();
        assert!(tree.children_of(id(0)).is_empty());
        assert!(tree.is_empty());
        assert!(tree.contains(id(0)));
        assert!(!tree.contains(id(5)));
    }

    #[test]
    fn children_copy_is_detached_from_live_list() {
        let tree = lobby_and_music();
        let snapshot = tree.children_of(id(0));
        tree.removed(id(5)).unwrap();
        assert_eq!(snapshot, ids(&[5, 7]));
        assert_eq!(tree.children_of(id(0)), ids(&[7]));
    }

    #[test]
    fn walk_is_depth_first_in_sibling_order() {
        let tree = lobby_and_music();
        tree.added(id(11), id(5), id(0)).unwrap();
        tree.added(id(12), id(11), id(0)).unwrap();
        tree.added(id(13), id(5), id(11)).unwrap();
        assert_eq!(
            tree.walk(),
            vec![(id(5), 0), (id(11), 1), (id(12), 2), (id(13), 1), (id(7), 0)]
        );
    }

    #[test]
    fn unrelated_subtrees_update_concurrently() {
        let tree = HierarchyTracker::new();
        for parent in 1..=4u64 {
            tree.added(id(parent), id(0), id(0)).unwrap();
        }
        std::thread::scope(|s| {
            for parent in 1..=4u64 {
                let tree = &tree;
                s.spawn(move || {
                    let mut prev = id(0);
                    for n in 0..100u64 {
                        let child = id(parent * 1000 + n);
                        tree.added(child, id(parent), prev).unwrap();
                        prev = child;
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..100 {
                    let _ = tree.children_of(id(1));
                    let _ = tree.walk();
                }
            });
        });
        for parent in 1..=4u64 {
            let expected: Vec<_> = (0..100u64).map(|n| id(parent * 1000 + n)).collect();
            assert_eq!(tree.children_of(id(parent)), expected);
        }
        assert_eq!(tree.len(), 404);
    }
}
