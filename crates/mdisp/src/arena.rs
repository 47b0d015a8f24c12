// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Index-addressed doubly linked list over flat storage.
//!
//! Nodes live in a flat arena and are addressed by small integer handles
//! instead of per-node heap allocations. Handle [`EDGE`] is a distinguished
//! sentinel representing the list boundary: the list is circular through it,
//! so `next(EDGE)` is the first real node and `prev(EDGE)` the last. Freed
//! handles go onto a LIFO free list and are reused by later insertions.
//!
//! [`ArenaList::pack`] compacts the arena, renumbering handles contiguously
//! and releasing slack storage. It invalidates every previously issued
//! handle; callers must not retain handles across a pack.

/// Handle to a node in an [`ArenaList`].
pub type Node = usize;

/// The sentinel handle marking the list boundary.
pub const EDGE: Node = 0;

/// Doubly linked list with arena-backed nodes and integer handles.
#[derive(Debug, Clone)]
pub struct ArenaList<T> {
    values: Vec<Option<T>>,
    next: Vec<Node>,
    prev: Vec<Node>,
    free: Vec<Node>,
}

impl<T> ArenaList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        ArenaList {
            // Slot 0 is the edge sentinel and never holds a value.
            values: vec![None],
            next: vec![EDGE],
            prev: vec![EDGE],
            free: Vec::new(),
        }
    }

    /// Number of live nodes (the sentinel does not count).
    pub fn len(&self) -> usize {
        self.values.len() - 1 - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The handle following `node` in list order.
    pub fn next(&self, node: Node) -> Node {
        self.next[node]
    }

    /// The handle preceding `node` in list order.
    pub fn prev(&self, node: Node) -> Node {
        self.prev[node]
    }

    /// Borrow the value stored at `node`, if the handle is live.
    pub fn get(&self, node: Node) -> Option<&T> {
        self.values.get(node).and_then(Option::as_ref)
    }

    /// Mutably borrow the value stored at `node`, if the handle is live.
    pub fn get_mut(&mut self, node: Node) -> Option<&mut T> {
        self.values.get_mut(node).and_then(Option::as_mut)
    }

    fn claim_slot(&mut self, value: T) -> Node {
        if let Some(node) = self.free.pop() {
            self.values[node] = Some(value);
            return node;
        }
        self.values.push(Some(value));
        self.next.push(EDGE);
        self.prev.push(EDGE);
        self.values.len() - 1
    }

    fn release_slot(&mut self, node: Node) -> T {
        let value = self.values[node].take().expect("released a dead handle");
        self.free.push(node);
        value
    }

    /// Insert `value` after the node `predecessor` (use [`EDGE`] to insert
    /// at the front). Amortized O(1). Returns the new node's handle.
    pub fn insert_after(&mut self, value: T, predecessor: Node) -> Node {
        let node = self.claim_slot(value);
        self.next[node] = self.next[predecessor];
        self.prev[node] = predecessor;
        self.prev[self.next[node]] = node;
        self.next[predecessor] = node;
        node
    }

    /// Insert `value` before the node `successor` (use [`EDGE`] to insert
    /// at the back). Amortized O(1). Returns the new node's handle.
    pub fn insert_before(&mut self, value: T, successor: Node) -> Node {
        let node = self.claim_slot(value);
        self.prev[node] = self.prev[successor];
        self.next[node] = successor;
        self.next[self.prev[node]] = node;
        self.prev[successor] = node;
        node
    }

    /// Unlink `node` and return its value. The handle becomes reusable.
    pub fn remove(&mut self, node: Node) -> T {
        debug_assert_ne!(node, EDGE, "cannot remove the edge sentinel");
        self.next[self.prev[node]] = self.next[node];
        self.prev[self.next[node]] = self.prev[node];
        self.release_slot(node)
    }

    /// Remove the node after `node` and return its value.
    pub fn remove_after(&mut self, node: Node) -> T {
        let victim = self.next[node];
        self.remove(victim)
    }

    /// Remove the node before `node` and return its value.
    pub fn remove_before(&mut self, node: Node) -> T {
        let victim = self.prev[node];
        self.remove(victim)
    }

    /// Iterate live nodes in list order as `(handle, &value)` pairs.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            at: self.next[EDGE],
        }
    }

    /// Compact the arena: drop free slots, renumber the surviving nodes
    /// contiguously in list order, and release slack storage.
    ///
    /// O(n) time and space. Invalidates all previously issued handles.
    pub fn pack(&mut self) {
        let mut packed = ArenaList::new();
        let mut at = self.next[EDGE];
        while at != EDGE {
            let value = self.values[at].take().expect("live node without value");
            packed.insert_before(value, EDGE);
            at = self.next[at];
        }
        *self = packed;
    }
}

impl<T> Default for ArenaList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over `(handle, &value)` in list order.
pub struct Iter<'a, T> {
    list: &'a ArenaList<T>,
    at: Node,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Node, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.at == EDGE {
            return None;
        }
        let node = self.at;
        self.at = self.list.next[node];
        Some((node, self.list.values[node].as_ref().expect("dead node in chain")))
    }
}
