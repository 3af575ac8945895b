//! Deferred add queue: a doubly-linked list over an index arena.
//!
//! Nodes whose parent or next sibling has no id yet wait here. Entries are
//! placed next to their relatives so that a tail-to-head scan meets
//! resolvable nodes early.
//!
//! ```text
//!  head ─▸ [parent] ⇄ [prev sibling] ⇄ [node] ⇄ [next sibling] ◂─ tail
//! ```

use rewind_core::{Document, NodeRef};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy)]
struct Entry {
    node: NodeRef,
    prev: Option<usize>,
    next: Option<usize>,
    live: bool,
}

#[derive(Debug, Default)]
pub(crate) struct DeferredQueue {
    entries: Vec<Entry>,
    slots: FxHashMap<NodeRef, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl DeferredQueue {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn contains(&self, node: NodeRef) -> bool {
        self.slots.contains_key(&node)
    }

    pub(crate) fn tail(&self) -> Option<usize> {
        self.tail
    }

    pub(crate) fn prev(&self, slot: usize) -> Option<usize> {
        self.entries.get(slot).and_then(|e| e.prev)
    }

    pub(crate) fn node(&self, slot: usize) -> Option<NodeRef> {
        self.entries.get(slot).filter(|e| e.live).map(|e| e.node)
    }

    /// Queue `node` after its previous sibling, else before its next
    /// sibling, else after its parent, else at the head.
    pub(crate) fn push(&mut self, doc: &Document, node: NodeRef) {
        if self.contains(node) {
            return;
        }
        let slot = self.entries.len();
        self.entries.push(Entry {
            node,
            prev: None,
            next: None,
            live: true,
        });
        self.slots.insert(node, slot);
        self.len += 1;

        let slot_of = |n: Option<NodeRef>| n.and_then(|n| self.slots.get(&n).copied());
        let prev = slot_of(doc.previous_sibling(node));
        let next = slot_of(doc.next_sibling(node));
        let parent = slot_of(doc.parent(node));
        match (prev, next, parent) {
            (Some(prev), _, _) => self.link_after(prev, slot),
            (None, Some(next), _) => self.link_before(next, slot),
            (None, None, Some(parent)) => self.link_after(parent, slot),
            (None, None, None) => self.link_front(slot),
        }
    }

    /// Unlink the entry at `slot`, returning its node.
    pub(crate) fn remove(&mut self, slot: usize) -> Option<NodeRef> {
        let entry = *self.entries.get(slot).filter(|e| e.live)?;
        match entry.prev {
            Some(p) => self.entries[p].next = entry.next,
            None => self.head = entry.next,
        }
        match entry.next {
            Some(n) => self.entries[n].prev = entry.prev,
            None => self.tail = entry.prev,
        }
        let e = &mut self.entries[slot];
        e.live = false;
        e.prev = None;
        e.next = None;
        self.slots.remove(&entry.node);
        self.len -= 1;
        Some(entry.node)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.slots.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Nodes from head to tail.
    #[cfg(test)]
    pub(crate) fn nodes(&self) -> Vec<NodeRef> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            out.push(self.entries[slot].node);
            cursor = self.entries[slot].next;
        }
        out
    }

    fn link_after(&mut self, anchor: usize, slot: usize) {
        let next = self.entries[anchor].next;
        self.entries[slot].prev = Some(anchor);
        self.entries[slot].next = next;
        self.entries[anchor].next = Some(slot);
        match next {
            Some(n) => self.entries[n].prev = Some(slot),
            None => self.tail = Some(slot),
        }
    }

    fn link_before(&mut self, anchor: usize, slot: usize) {
        let prev = self.entries[anchor].prev;
        self.entries[slot].next = Some(anchor);
        self.entries[slot].prev = prev;
        self.entries[anchor].prev = Some(slot);
        match prev {
            Some(p) => self.entries[p].next = Some(slot),
            None => self.head = Some(slot),
        }
    }

    fn link_front(&mut self, slot: usize) {
        self.entries[slot].next = self.head;
        match self.head {
            Some(h) => self.entries[h].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> (Document, NodeRef, [NodeRef; 3]) {
        let mut doc = Document::with_skeleton("https://example.com/");
        let body = doc.body().unwrap();
        let ul = doc.append_element(body, "ul", &[]).unwrap();
        let items = [
            doc.append_element(ul, "li", &[]).unwrap(),
            doc.append_element(ul, "li", &[]).unwrap(),
            doc.append_element(ul, "li", &[]).unwrap(),
        ];
        (doc, ul, items)
    }

    #[test]
    fn test_siblings_are_kept_in_document_order() {
        let (doc, ul, [a, b, c]) = list();
        let mut queue = DeferredQueue::default();
        queue.push(&doc, b);
        queue.push(&doc, ul);
        queue.push(&doc, c);
        queue.push(&doc, a);
        assert_eq!(queue.nodes(), vec![ul, a, b, c]);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_child_goes_after_parent() {
        let (doc, ul, [a, _, _]) = list();
        let mut queue = DeferredQueue::default();
        queue.push(&doc, ul);
        queue.push(&doc, a);
        assert_eq!(queue.nodes(), vec![ul, a]);
    }

    #[test]
    fn test_remove_relinks_neighbours() {
        let (doc, _, [a, b, c]) = list();
        let mut queue = DeferredQueue::default();
        for n in [a, b, c] {
            queue.push(&doc, n);
        }
        let tail = queue.tail().unwrap();
        let middle = queue.prev(tail).unwrap();
        assert_eq!(queue.remove(middle), Some(b));
        assert_eq!(queue.remove(middle), None);
        assert_eq!(queue.nodes(), vec![a, c]);
        assert!(!queue.contains(b));

        queue.push(&doc, b);
        assert_eq!(queue.nodes(), vec![a, b, c]);
    }

    #[test]
    fn test_duplicate_push_is_ignored() {
        let (doc, _, [a, _, _]) = list();
        let mut queue = DeferredQueue::default();
        queue.push(&doc, a);
        queue.push(&doc, a);
        assert_eq!(queue.len(), 1);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.tail(), None);
    }
}
