//! Node registry: bidirectional `NodeRef` ↔ `NodeId` side-table.
//!
//! Ids start at 1 and are never reused. Dropping a node releases its id and
//! the ids of its whole subtree; if the node is inserted again later it gets
//! a fresh id, so replay sees a remove followed by an add.
//!
//! Nodes that serialization skipped on purpose (ignored elements, comments,
//! blank `<head>` text) are remembered separately so that next-sibling
//! resolution can step over them instead of waiting for an id that will
//! never come.

use rewind_core::{Document, NodeId, NodeRef};
use rustc_hash::{FxHashMap, FxHashSet};

/// Result of looking a node up in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Known(NodeId),
    Ignored,
    Unknown,
}

pub struct NodeRegistry {
    node_to_id: FxHashMap<NodeRef, NodeId>,
    id_to_node: FxHashMap<NodeId, NodeRef>,
    ignored: FxHashSet<NodeRef>,
    next_id: u32,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            node_to_id: FxHashMap::default(),
            id_to_node: FxHashMap::default(),
            ignored: FxHashSet::default(),
            next_id: 1,
        }
    }

    /// Return the node's id, allocating the next one if it has none.
    pub fn assign(&mut self, node: NodeRef) -> NodeId {
        if let Some(&id) = self.node_to_id.get(&node) {
            return id;
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.ignored.remove(&node);
        self.node_to_id.insert(node, id);
        self.id_to_node.insert(id, node);
        id
    }

    #[inline]
    pub fn id_of(&self, node: NodeRef) -> Option<NodeId> {
        self.node_to_id.get(&node).copied()
    }

    #[inline]
    pub fn node_of(&self, id: NodeId) -> Option<NodeRef> {
        self.id_to_node.get(&id).copied()
    }

    #[inline]
    pub fn has(&self, node: NodeRef) -> bool {
        self.node_to_id.contains_key(&node)
    }

    pub fn lookup(&self, node: NodeRef) -> Lookup {
        match self.node_to_id.get(&node) {
            Some(&id) => Lookup::Known(id),
            None if self.ignored.contains(&node) => Lookup::Ignored,
            None => Lookup::Unknown,
        }
    }

    /// Remember that serialization skipped `node` on purpose.
    pub fn mark_ignored(&mut self, node: NodeRef) {
        if !self.node_to_id.contains_key(&node) {
            self.ignored.insert(node);
        }
    }

    #[inline]
    pub fn is_ignored(&self, node: NodeRef) -> bool {
        self.ignored.contains(&node)
    }

    /// Release `node` and every descendant.
    pub fn drop(&mut self, doc: &Document, node: NodeRef) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if let Some(id) = self.node_to_id.remove(&n) {
                self.id_to_node.remove(&id);
            }
            self.ignored.remove(&n);
            stack.extend_from_slice(doc.children(n));
        }
    }

    /// Release every association (end of a recording session).
    pub fn clear(&mut self) {
        self.node_to_id.clear();
        self.id_to_node.clear();
        self.ignored.clear();
    }

    pub fn len(&self) -> usize {
        self.node_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_to_id.is_empty()
    }
}
