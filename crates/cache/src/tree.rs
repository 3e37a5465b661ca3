//! The item map: an arena-based treap augmented with a SELF/LEFT/RIGHT
//! dirty index.
//!
//! # Why a treap, and why an arena
//!
//! An index-based arena of items, where each node stores its parent's
//! handle, gives rotations and parent-chain propagation a clear,
//! singly-owned home instead of a graph of heap pointers. We use
//! [`slotmap`] for the arena: its generational keys mean a `NodeKey`
//! captured before a node is erased can never silently alias a later,
//! unrelated node that happens to reuse the same slot — exactly the
//! hazard a hand-rolled `Vec<Option<Node>>` free list would otherwise need
//! careful generation-counter bookkeeping to avoid.
//!
//! Balance comes from treap semantics (each node gets a random priority;
//! the max-priority node floats to the root of its subtree) rather than
//! from an AVL/red-black rebalancing scheme, because the rotation-driven
//! rebalancing a treap already needs is the *same* mechanism needed to
//! keep the dirty aggregate correct after a structural change — we get
//! augmentation maintenance and balance from one mechanism instead of two.
//!
//! # Dirty aggregate maintenance
//!
//! Every node's `LEFT`/`RIGHT` bits are *not* a simple OR of everything
//! below — they distinguish the left child's subtree from the right
//! child's. Three update rules keep them correct, implemented here as:
//!
//! - [`ItemTree::insert`] sets ancestors' LEFT/RIGHT pre-emptively while
//!   descending, valid because no rotation has run yet.
//! - [`ItemTree::bubble_up`] (insertion) and [`ItemTree::erase`] recompute
//!   both nodes touched by every rotation, then call
//!   [`ItemTree::propagate_up`], which stops as soon as a recompute
//!   changes nothing.
//! - [`ItemTree::set_self_dirty`] starts propagation at the node's parent.

use crate::item::Item;
use icache_core::Key;
use rand::Rng;
use slotmap::SlotMap;
use std::cmp::Ordering;

slotmap::new_key_type! {
    /// A stable, generational handle to a node in the item tree.
    pub struct NodeKey;
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) item: Item,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) left: Option<NodeKey>,
    pub(crate) right: Option<NodeKey>,
    pub(crate) priority: u32,
    // Intrusive LRU linkage; see `crate::lru`. Present (non-dangling)
    // precisely when the item is not SELF-dirty.
    pub(crate) lru_prev: Option<NodeKey>,
    pub(crate) lru_next: Option<NodeKey>,
}

/// The item map, augmented with the dirty-subtree index.
pub struct ItemTree {
    pub(crate) nodes: SlotMap<NodeKey, Node>,
    pub(crate) root: Option<NodeKey>,
    // LRU head/tail, maintained by `crate::lru`.
    pub(crate) lru_head: Option<NodeKey>,
    pub(crate) lru_tail: Option<NodeKey>,
    pub(crate) lru_len: usize,
}

impl ItemTree {
    /// An empty item map.
    pub fn new() -> Self {
        ItemTree {
            nodes: SlotMap::with_key(),
            root: None,
            lru_head: None,
            lru_tail: None,
            lru_len: 0,
        }
    }

    /// Number of items currently in the map.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Is the map empty?
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Borrow an item by its arena handle.
    pub fn get(&self, key: NodeKey) -> &Item {
        &self.nodes[key].item
    }

    /// Mutably borrow an item by its arena handle.
    pub fn get_mut(&mut self, key: NodeKey) -> &mut Item {
        &mut self.nodes[key].item
    }

    /// Find the node holding `key`, if any, in O(log N) expected time.
    pub fn find(&self, key: Key) -> Option<NodeKey> {
        let mut cur = self.root;
        while let Some(c) = cur {
            match key.cmp(&self.nodes[c].item.key) {
                Ordering::Equal => return Some(c),
                Ordering::Less => cur = self.nodes[c].left,
                Ordering::Greater => cur = self.nodes[c].right,
            }
        }
        None
    }

    /// One descent returning `(found, predecessor, successor)` for `key`:
    /// the node at `key` if present, and the tightest surrounding nodes if
    /// absent, from a single tree descent so the next/prev variants cost
    /// one traversal rather than two.
    pub fn walk(&self, key: Key) -> (Option<NodeKey>, Option<NodeKey>, Option<NodeKey>) {
        let mut cur = self.root;
        let mut pred = None;
        let mut succ = None;
        while let Some(c) = cur {
            match key.cmp(&self.nodes[c].item.key) {
                Ordering::Equal => return (Some(c), pred, succ),
                Ordering::Less => {
                    succ = Some(c);
                    cur = self.nodes[c].left;
                }
                Ordering::Greater => {
                    pred = Some(c);
                    cur = self.nodes[c].right;
                }
            }
        }
        (None, pred, succ)
    }

    /// In-order successor of the item at `key`.
    pub fn successor(&self, key: NodeKey) -> Option<NodeKey> {
        if let Some(r) = self.nodes[key].right {
            return Some(self.min_in(r));
        }
        let mut cur = key;
        loop {
            let parent = self.nodes[cur].parent?;
            if self.nodes[parent].left == Some(cur) {
                return Some(parent);
            }
            cur = parent;
        }
    }

    /// In-order predecessor of the item at `key`.
    pub fn predecessor(&self, key: NodeKey) -> Option<NodeKey> {
        if let Some(l) = self.nodes[key].left {
            return Some(self.max_in(l));
        }
        let mut cur = key;
        loop {
            let parent = self.nodes[cur].parent?;
            if self.nodes[parent].right == Some(cur) {
                return Some(parent);
            }
            cur = parent;
        }
    }

    fn min_in(&self, mut cur: NodeKey) -> NodeKey {
        while let Some(l) = self.nodes[cur].left {
            cur = l;
        }
        cur
    }

    fn max_in(&self, mut cur: NodeKey) -> NodeKey {
        while let Some(r) = self.nodes[cur].right {
            cur = r;
        }
        cur
    }

    /// Insert `item` as a new node. Caller must have already confirmed no
    /// node exists at `item.key` (or intends to replace it via [`Self::erase`]
    /// first) — this always creates a new node.
    pub fn insert(&mut self, item: Item) -> NodeKey {
        let priority: u32 = rand::thread_rng().gen();
        let is_dirty = item.is_dirty();
        let new_key = self.nodes.insert(Node {
            item,
            parent: None,
            left: None,
            right: None,
            priority,
            lru_prev: None,
            lru_next: None,
        });

        let Some(root) = self.root else {
            self.root = Some(new_key);
            return new_key;
        };

        let key = self.nodes[new_key].item.key;
        let mut cur = root;
        loop {
            let go_left = key < self.nodes[cur].item.key;
            if is_dirty {
                // Pre-emptive propagation: valid because no rotation has
                // run yet on this path.
                if go_left {
                    self.nodes[cur].item.dirty.set_left(true);
                } else {
                    self.nodes[cur].item.dirty.set_right(true);
                }
            }
            let next = if go_left {
                self.nodes[cur].left
            } else {
                self.nodes[cur].right
            };
            match next {
                Some(n) => cur = n,
                None => {
                    if go_left {
                        self.nodes[cur].left = Some(new_key);
                    } else {
                        self.nodes[cur].right = Some(new_key);
                    }
                    self.nodes[new_key].parent = Some(cur);
                    break;
                }
            }
        }

        self.bubble_up(new_key);
        new_key
    }

    /// Remove the node at `key` from the tree, returning its item. Callers
    /// handling LRU membership must unlink it first — see `crate::lru`.
    pub fn erase(&mut self, key: NodeKey) -> Item {
        // Rotate the node down until it has at most one child, always
        // promoting the higher-priority child so the heap property is
        // preserved for the rest of the tree during the walk down.
        loop {
            let (left, right) = (self.nodes[key].left, self.nodes[key].right);
            match (left, right) {
                (Some(l), Some(r)) => {
                    if self.nodes[l].priority > self.nodes[r].priority {
                        self.rotate_right(key);
                    } else {
                        self.rotate_left(key);
                    }
                    // `key`'s children changed; so did the pivot that rose
                    // above it. Recompute both, key first (its children
                    // are now different), then its new parent.
                    self.recompute_self(key);
                    if let Some(p) = self.nodes[key].parent {
                        self.recompute_self(p);
                    }
                }
                _ => break,
            }
        }

        let parent = self.nodes[key].parent;
        let child = self.nodes[key].left.or(self.nodes[key].right);
        if let Some(c) = child {
            self.nodes[c].parent = parent;
        }
        match parent {
            Some(p) => {
                if self.nodes[p].left == Some(key) {
                    self.nodes[p].left = child;
                } else {
                    self.nodes[p].right = child;
                }
            }
            None => self.root = child,
        }

        self.propagate_up(parent);

        let node = self.nodes.remove(key).expect("node existed");
        node.item
    }

    /// Toggle the SELF bit for `key` and propagate the aggregate change
    /// starting at its parent.
    pub fn set_self_dirty(&mut self, key: NodeKey, value: bool) {
        self.nodes[key].item.dirty.set_self(value);
        let parent = self.nodes[key].parent;
        self.propagate_up(parent);
    }

    /// Smallest-key SELF-dirty item, or `None` if the map has no dirty
    /// items at all.
    pub fn first_dirty(&self) -> Option<NodeKey> {
        self.root.and_then(|r| self.first_dirty_in(r))
    }

    /// In-order-next SELF-dirty item after `key`.
    pub fn next_dirty(&self, key: NodeKey) -> Option<NodeKey> {
        if self.nodes[key].item.dirty.is_right() {
            return self
                .nodes[key]
                .right
                .and_then(|r| self.first_dirty_in(r));
        }
        let mut cur = key;
        loop {
            let parent = self.nodes[cur].parent?;
            if self.nodes[parent].right == Some(cur) {
                cur = parent;
                continue;
            }
            // `cur` is the left child of `parent`.
            if self.nodes[parent].item.dirty.is_self() {
                return Some(parent);
            }
            if self.nodes[parent].item.dirty.is_right() {
                return self
                    .nodes[parent]
                    .right
                    .and_then(|r| self.first_dirty_in(r));
            }
            cur = parent;
        }
    }

    fn first_dirty_in(&self, mut cur: NodeKey) -> Option<NodeKey> {
        loop {
            let dirty = self.nodes[cur].item.dirty;
            if dirty.is_left() {
                cur = self.nodes[cur].left.expect("LEFT bit implies left child");
            } else if dirty.is_self() {
                return Some(cur);
            } else if dirty.is_right() {
                cur = self.nodes[cur].right.expect("RIGHT bit implies right child");
            } else {
                return None;
            }
        }
    }

    fn subtree_any_dirty(&self, key: NodeKey) -> bool {
        self.nodes[key].item.dirty.any()
    }

    /// Recompute `key`'s LEFT/RIGHT bits from its current children.
    /// Returns whether anything changed (used to cut propagation short).
    fn recompute_self(&mut self, key: NodeKey) -> bool {
        let left_any = self.nodes[key]
            .left
            .map(|l| self.subtree_any_dirty(l))
            .unwrap_or(false);
        let right_any = self.nodes[key]
            .right
            .map(|r| self.subtree_any_dirty(r))
            .unwrap_or(false);
        let node = &mut self.nodes[key];
        let changed = node.item.dirty.is_left() != left_any || node.item.dirty.is_right() != right_any;
        node.item.dirty.set_left(left_any);
        node.item.dirty.set_right(right_any);
        changed
    }

    /// Walk upward from `start`, recomputing aggregates, stopping as soon
    /// as a recompute makes no change (or the root is passed).
    fn propagate_up(&mut self, start: Option<NodeKey>) {
        let mut cur = start;
        while let Some(key) = cur {
            if !self.recompute_self(key) {
                break;
            }
            cur = self.nodes[key].parent;
        }
    }

    /// Rotate node `node` up past its parent repeatedly while the treap's
    /// max-heap property (`parent.priority >= child.priority`) is
    /// violated, recomputing aggregates after every rotation.
    fn bubble_up(&mut self, mut node: NodeKey) {
        loop {
            let Some(parent) = self.nodes[node].parent else {
                break;
            };
            if self.nodes[node].priority <= self.nodes[parent].priority {
                break;
            }
            let is_left_child = self.nodes[parent].left == Some(node);
            let new_root = if is_left_child {
                self.rotate_right(parent)
            } else {
                self.rotate_left(parent)
            };
            debug_assert_eq!(new_root, node);
            // Old pivot (`parent`) first: its children changed. Then the
            // new pivot (`node`), whose children now include `parent`.
            self.recompute_self(parent);
            self.recompute_self(node);
            self.propagate_up(self.nodes[node].parent);
        }
    }

    /// Left-rotate around `pivot`; `pivot`'s right child becomes the new
    /// subtree root. Returns that new root's handle. Pure pointer surgery —
    /// callers are responsible for recomputing dirty aggregates afterward.
    fn rotate_left(&mut self, pivot: NodeKey) -> NodeKey {
        let new_root = self.nodes[pivot].right.expect("rotate_left needs right child");
        let moved = self.nodes[new_root].left;
        self.nodes[pivot].right = moved;
        if let Some(c) = moved {
            self.nodes[c].parent = Some(pivot);
        }
        self.nodes[new_root].left = Some(pivot);
        let grandparent = self.nodes[pivot].parent;
        self.nodes[new_root].parent = grandparent;
        self.nodes[pivot].parent = Some(new_root);
        self.reparent(grandparent, pivot, new_root);
        new_root
    }

    /// Mirror of [`Self::rotate_left`].
    fn rotate_right(&mut self, pivot: NodeKey) -> NodeKey {
        let new_root = self.nodes[pivot].left.expect("rotate_right needs left child");
        let moved = self.nodes[new_root].right;
        self.nodes[pivot].left = moved;
        if let Some(c) = moved {
            self.nodes[c].parent = Some(pivot);
        }
        self.nodes[new_root].right = Some(pivot);
        let grandparent = self.nodes[pivot].parent;
        self.nodes[new_root].parent = grandparent;
        self.nodes[pivot].parent = Some(new_root);
        self.reparent(grandparent, pivot, new_root);
        new_root
    }

    fn reparent(&mut self, grandparent: Option<NodeKey>, old_child: NodeKey, new_child: NodeKey) {
        match grandparent {
            Some(gp) => {
                if self.nodes[gp].left == Some(old_child) {
                    self.nodes[gp].left = Some(new_child);
                } else {
                    self.nodes[gp].right = Some(new_child);
                }
            }
            None => self.root = Some(new_child),
        }
    }
}

impl Default for ItemTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: u64) -> Key {
        Key::from(v)
    }

    fn insert_plain(tree: &mut ItemTree, v: u64) -> NodeKey {
        tree.insert(Item::new(key(v), Some(vec![v as u8])))
    }

    fn insert_dirty(tree: &mut ItemTree, v: u64) -> NodeKey {
        let mut item = Item::new(key(v), Some(vec![v as u8]));
        item.dirty.set_self(true);
        let k = tree.insert(item);
        k
    }

    #[test]
    fn find_after_insert() {
        let mut tree = ItemTree::new();
        let values = [10u64, 5, 20, 1, 7, 15, 30];
        for v in values {
            insert_plain(&mut tree, v);
        }
        for v in values {
            let k = tree.find(key(v)).expect("present");
            assert_eq!(tree.get(k).key, key(v));
        }
        assert!(tree.find(key(999)).is_none());
    }

    #[test]
    fn in_order_traversal_is_sorted() {
        let mut tree = ItemTree::new();
        let mut values: Vec<u64> = vec![50, 30, 70, 10, 40, 60, 80, 20];
        for v in values.clone() {
            insert_plain(&mut tree, v);
        }
        values.sort();

        // Walk via predecessor/successor from the minimum.
        let mut cur = tree.find(key(values[0])).unwrap();
        let mut seen = vec![tree.get(cur).key.value() as u64];
        while let Some(next) = tree.successor(cur) {
            seen.push(tree.get(next).key.value() as u64);
            cur = next;
        }
        assert_eq!(seen, values);
    }

    #[test]
    fn walk_finds_predecessor_and_successor_when_absent() {
        let mut tree = ItemTree::new();
        for v in [10u64, 20, 30, 40] {
            insert_plain(&mut tree, v);
        }
        let (found, pred, succ) = tree.walk(key(25));
        assert!(found.is_none());
        assert_eq!(tree.get(pred.unwrap()).key, key(20));
        assert_eq!(tree.get(succ.unwrap()).key, key(30));
    }

    #[test]
    fn erase_preserves_remaining_order() {
        let mut tree = ItemTree::new();
        let values = [10u64, 5, 20, 1, 7, 15, 30, 25];
        let mut keys = Vec::new();
        for v in values {
            keys.push((v, insert_plain(&mut tree, v)));
        }
        // Erase a couple of internal nodes.
        for (v, k) in &keys {
            if *v == 10 || *v == 20 {
                tree.erase(*k);
            }
        }
        let mut remaining: Vec<u64> = values.iter().copied().filter(|v| *v != 10 && *v != 20).collect();
        remaining.sort();

        let mut cur = tree.find(key(remaining[0])).unwrap();
        let mut seen = vec![tree.get(cur).key.value() as u64];
        while let Some(next) = tree.successor(cur) {
            seen.push(tree.get(next).key.value() as u64);
            cur = next;
        }
        assert_eq!(seen, remaining);
        assert_eq!(tree.len(), values.len() - 2);
    }

    #[test]
    fn dirty_aggregate_stays_consistent_after_inserts_and_erases() {
        let mut tree = ItemTree::new();
        let dirty_values = [5u64, 15, 25];
        let clean_values = [10u64, 20, 30, 1, 40];
        for v in dirty_values {
            insert_dirty(&mut tree, v);
        }
        for v in clean_values {
            insert_plain(&mut tree, v);
        }
        assert_dirty_aggregate_consistent(&tree, tree.root);

        // Erase one dirty and one clean node, re-check.
        let k = tree.find(key(15)).unwrap();
        tree.set_self_dirty(k, false);
        assert_dirty_aggregate_consistent(&tree, tree.root);
        let k2 = tree.find(key(10)).unwrap();
        tree.erase(k2);
        assert_dirty_aggregate_consistent(&tree, tree.root);
    }

    #[test]
    fn first_dirty_and_next_dirty_yield_ascending_order() {
        let mut tree = ItemTree::new();
        let all = [50u64, 30, 70, 10, 40, 60, 80, 20, 90, 5, 15, 35, 45];
        let dirty: Vec<u64> = vec![10, 20, 45, 60, 90];
        for v in &all {
            if dirty.contains(v) {
                insert_dirty(&mut tree, *v);
            } else {
                insert_plain(&mut tree, *v);
            }
        }
        let mut expected = dirty.clone();
        expected.sort();

        let mut seen = Vec::new();
        let mut cur = tree.first_dirty();
        while let Some(k) = cur {
            seen.push(tree.get(k).key.value() as u64);
            cur = tree.next_dirty(k);
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn first_dirty_is_none_when_nothing_dirty() {
        let mut tree = ItemTree::new();
        for v in [1u64, 2, 3] {
            insert_plain(&mut tree, v);
        }
        assert!(tree.first_dirty().is_none());
    }

    /// Recursively checks that every node's LEFT/RIGHT bit equals the
    /// disjunction of SELF bits in the respective subtree.
    fn assert_dirty_aggregate_consistent(tree: &ItemTree, node: Option<NodeKey>) -> bool {
        let Some(n) = node else { return false };
        let left_any = assert_dirty_aggregate_consistent(tree, tree.nodes[n].left);
        let right_any = assert_dirty_aggregate_consistent(tree, tree.nodes[n].right);
        let dirty = tree.nodes[n].item.dirty;
        assert_eq!(dirty.is_left(), left_any, "LEFT mismatch at a node");
        assert_eq!(dirty.is_right(), right_any, "RIGHT mismatch at a node");
        dirty.is_self() || left_any || right_any
    }

    #[test]
    fn bulk_insert_and_erase_preserves_bst_and_dirty_invariants() {
        let mut tree = ItemTree::new();
        let mut present = Vec::new();
        for v in 0..200u64 {
            let make_dirty = v % 7 == 0;
            let k = if make_dirty {
                insert_dirty(&mut tree, v)
            } else {
                insert_plain(&mut tree, v)
            };
            present.push((v, k));
            if v % 11 == 0 && v > 0 {
                let (rv, rk) = present.remove(present.len() / 2);
                tree.erase(rk);
                let _ = rv;
            }
            assert_dirty_aggregate_consistent(&tree, tree.root);
        }
        // Final in-order scan matches the sorted set of remaining keys.
        let mut expected: Vec<u64> = present.iter().map(|(v, _)| *v).collect();
        expected.sort();
        if let Some(first) = expected.first() {
            let mut cur = tree.find(key(*first)).unwrap();
            let mut seen = vec![tree.get(cur).key.value() as u64];
            while let Some(next) = tree.successor(cur) {
                seen.push(tree.get(next).key.value() as u64);
                cur = next;
            }
            assert_eq!(seen, expected);
        }
    }
}
