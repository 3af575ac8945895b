//! Mutation tracker.
//!
//! Turns batches of raw host notifications into incremental change-sets
//! that reference the ids handed out by the [`NodeRegistry`].
//!
//! ```text
//!  RawMutation batch
//!        │ classify   (drop ignored / hidden targets)
//!        ▼
//!  ┌───────────────────────────── Cycle ─────────────────────────────┐
//!  │ texts · attributes · removes · added · moved · dropped · drops  │
//!  └─────────────────────────────────────────────────────────────────┘
//!        │ resolve    (registry drops, serialize adds, deferred queue)
//!        ▼
//!  MutationData { adds, removes, texts, attributes }   (or nothing)
//! ```
//!
//! An add can only be emitted once its parent has an id and its next
//! sibling either has one or does not exist. Nodes that are not ready wait
//! in a deferred queue; if a full pass over the queue makes no progress,
//! the remaining entries are dropped.

use crate::deferred::DeferredQueue;
use crate::privacy::PrivacyCache;
use crate::registry::{Lookup, NodeRegistry};
use crate::serialize::{serialize_attribute, serialize_node_with_id, serialize_text_value, SerializeContext};
use indexmap::{IndexMap, IndexSet};
use rewind_core::{
    AddedNodeMutation, AttributeMutation, Document, MutationData, NodeId, NodeRef, Privacy,
    RawMutation, RemovedNodeMutation, TextMutation,
};
use rustc_hash::{FxHashSet, FxHasher};
use std::hash::BuildHasherDefault;

type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;
type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

// ───────────────────────────────────────────────────────────────────
// Tracker
// ───────────────────────────────────────────────────────────────────

/// Stateful front of the tracker. Per-cycle state is discarded after every
/// emission.
pub struct MutationTracker {
    default_privacy: Privacy,
    frozen: bool,
    buffered: Vec<RawMutation>,
}

impl MutationTracker {
    pub fn new(default_privacy: Privacy) -> Self {
        Self {
            default_privacy,
            frozen: false,
            buffered: Vec::new(),
        }
    }

    /// Process one observation cycle. While frozen the batch is buffered.
    pub fn process(
        &mut self,
        doc: &Document,
        registry: &mut NodeRegistry,
        batch: Vec<RawMutation>,
    ) -> Option<MutationData> {
        if self.frozen {
            self.buffered.extend(batch);
            return None;
        }
        self.run_cycle(doc, registry, batch)
    }

    /// Drain the document's notification queue and process it.
    pub fn flush(&mut self, doc: &mut Document, registry: &mut NodeRegistry) -> Option<MutationData> {
        let batch = doc.take_mutations();
        self.process(doc, registry, batch)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Resume and process everything buffered while frozen as one cycle.
    pub fn unfreeze(&mut self, doc: &Document, registry: &mut NodeRegistry) -> Option<MutationData> {
        self.frozen = false;
        let batch = std::mem::take(&mut self.buffered);
        self.run_cycle(doc, registry, batch)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn run_cycle(
        &mut self,
        doc: &Document,
        registry: &mut NodeRegistry,
        batch: Vec<RawMutation>,
    ) -> Option<MutationData> {
        if batch.is_empty() {
            return None;
        }
        let mut cycle = Cycle::new(self.default_privacy);
        for mutation in &batch {
            cycle.accumulate(doc, registry, mutation);
        }
        cycle.emit(doc, registry)
    }
}

// ───────────────────────────────────────────────────────────────────
// Cycle
// ───────────────────────────────────────────────────────────────────

struct Cycle {
    privacy: PrivacyCache,
    texts: FxIndexMap<NodeRef, String>,
    attributes: FxIndexMap<NodeRef, FxIndexMap<String, Option<String>>>,
    removes: Vec<RemovedNodeMutation>,
    removed: FxHashSet<NodeRef>,
    registry_drops: Vec<NodeRef>,
    added: FxIndexSet<NodeRef>,
    moved: FxIndexSet<NodeRef>,
    /// (moved node, new parent) pairs, keyed by ids at notification time
    moved_to: FxHashSet<(NodeId, NodeId)>,
    dropped: FxHashSet<NodeRef>,
}

/// Output of the resolve phase.
#[derive(Default)]
struct Resolution {
    adds: Vec<AddedNodeMutation>,
    serialized_ids: FxHashSet<NodeId>,
    deferred: DeferredQueue,
}

impl Cycle {
    fn new(default_privacy: Privacy) -> Self {
        Self {
            privacy: PrivacyCache::new(default_privacy),
            texts: FxIndexMap::default(),
            attributes: FxIndexMap::default(),
            removes: Vec::new(),
            removed: FxHashSet::default(),
            registry_drops: Vec::new(),
            added: FxIndexSet::default(),
            moved: FxIndexSet::default(),
            moved_to: FxHashSet::default(),
            dropped: FxHashSet::default(),
        }
    }

    fn is_blocked(&mut self, doc: &Document, registry: &NodeRegistry, node: NodeRef) -> bool {
        registry.is_ignored(node) || self.privacy.level(doc, node).is_hidden()
    }

    // ---------------------------------------------------------------
    // Accumulate
    // ---------------------------------------------------------------

    fn accumulate(&mut self, doc: &Document, registry: &NodeRegistry, mutation: &RawMutation) {
        let target = mutation.target();
        if self.is_blocked(doc, registry, target) {
            return;
        }
        match mutation {
            RawMutation::Attribute { name, old_value, .. } => {
                self.record_attribute(doc, target, name, old_value.as_deref())
            }
            RawMutation::Text { old_value, .. } => self.record_text(doc, target, old_value),
            RawMutation::ChildList { added, removed, .. } => {
                for &node in added {
                    self.gen_adds(doc, registry, node, target);
                }
                for &node in removed {
                    self.gen_remove(doc, registry, node, target);
                }
            }
        }
    }

    fn record_attribute(&mut self, doc: &Document, target: NodeRef, name: &str, old_value: Option<&str>) {
        let Some(el) = doc.element(target) else {
            return;
        };
        let current = el.attribute(name);
        if current == old_value {
            return;
        }
        let value = match current {
            None => None,
            Some(raw) => {
                let privacy = self.privacy.level(doc, target);
                match serialize_attribute(doc.base_url(), el, name, raw, privacy) {
                    Some(value) => Some(value),
                    None => return,
                }
            }
        };
        self.attributes
            .entry(target)
            .or_default()
            .insert(name.to_string(), value);
    }

    fn record_text(&mut self, doc: &Document, target: NodeRef, old_value: &str) {
        match doc.text(target) {
            Some(current) if current != old_value => {}
            _ => return,
        }
        let privacy = self.privacy.level(doc, target);
        if let Some(value) = serialize_text_value(doc, target, privacy) {
            self.texts.insert(target, value);
        }
    }

    /// Sort `node` and its subtree into added or moved.
    fn gen_adds(&mut self, doc: &Document, registry: &NodeRegistry, node: NodeRef, target: NodeRef) {
        let mut stack = vec![(node, Some(target))];
        while let Some((n, parent)) = stack.pop() {
            match registry.lookup(n) {
                Lookup::Known(id) => {
                    self.moved.insert(n);
                    if let Some(parent_id) = parent.and_then(|p| registry.id_of(p)) {
                        self.moved_to.insert((id, parent_id));
                    }
                }
                Lookup::Ignored | Lookup::Unknown => {
                    self.added.insert(n);
                    self.dropped.remove(&n);
                }
            }
            if !self.privacy.level(doc, n).is_hidden() {
                stack.extend(doc.children(n).iter().rev().map(|&c| (c, None)));
            }
        }
    }

    fn gen_remove(&mut self, doc: &Document, registry: &NodeRegistry, node: NodeRef, target: NodeRef) {
        if registry.is_ignored(node) {
            return;
        }
        let node_id = registry.id_of(node);
        let parent_id = registry.id_of(target);

        if self.added.contains(&node) {
            remove_subtree(&mut self.added, doc, node);
            self.dropped.insert(node);
        } else if self.added.contains(&target) && node_id.is_none() {
            // child of a node added this cycle: the add already covers it
        } else if is_ancestor_removed(doc, registry, target) {
            // the removed ancestor already covers it
        } else if self.moved.contains(&node)
            && node_id
                .zip(parent_id)
                .is_some_and(|pair| self.moved_to.contains(&pair))
        {
            remove_subtree(&mut self.moved, doc, node);
        } else if let (Some(parent_id), Some(id)) = (parent_id, node_id) {
            self.removes.push(RemovedNodeMutation { parent_id, id });
            self.removed.insert(node);
        }
        self.registry_drops.push(node);
    }

    // ---------------------------------------------------------------
    // Resolve & emit
    // ---------------------------------------------------------------

    fn emit(mut self, doc: &Document, registry: &mut NodeRegistry) -> Option<MutationData> {
        for node in std::mem::take(&mut self.registry_drops) {
            registry.drop(doc, node);
        }

        let mut out = Resolution::default();

        let moved: Vec<NodeRef> = self.moved.iter().copied().collect();
        for node in moved {
            let parent_moved = doc.parent(node).is_some_and(|p| self.moved.contains(&p));
            if self.is_parent_removed(doc, node) && !parent_moved {
                continue;
            }
            self.push_add(doc, registry, node, &mut out);
        }

        let added: Vec<NodeRef> = self.added.iter().copied().collect();
        for node in added {
            if !has_ancestor_in(doc, node, |a| self.dropped.contains(&a))
                && !self.is_parent_removed(doc, node)
            {
                self.push_add(doc, registry, node, &mut out);
            } else if has_ancestor_in(doc, node, |a| self.moved.contains(&a)) {
                self.push_add(doc, registry, node, &mut out);
            } else {
                self.dropped.insert(node);
            }
        }

        self.resolve_deferred(doc, registry, &mut out);

        let serialized_ids = &out.serialized_ids;
        let fresh = |node: NodeRef| {
            registry
                .id_of(node)
                .filter(|id| !serialized_ids.contains(id))
        };
        let texts: Vec<TextMutation> = self
            .texts
            .into_iter()
            .filter_map(|(node, value)| Some(TextMutation { id: fresh(node)?, value }))
            .collect();
        let attributes: Vec<AttributeMutation> = self
            .attributes
            .into_iter()
            .filter(|(_, changes)| !changes.is_empty())
            .filter_map(|(node, changes)| {
                Some(AttributeMutation {
                    id: fresh(node)?,
                    attributes: changes.into_iter().collect(),
                })
            })
            .collect();

        let data = MutationData {
            adds: out.adds,
            removes: self.removes,
            texts,
            attributes,
        };
        (!data.is_empty()).then_some(data)
    }

    /// Serialize `node` now if its position can be expressed, else defer.
    fn push_add(&mut self, doc: &Document, registry: &mut NodeRegistry, node: NodeRef, out: &mut Resolution) {
        let Some(parent) = doc.parent(node) else {
            return;
        };
        if registry
            .id_of(node)
            .is_some_and(|id| out.serialized_ids.contains(&id))
        {
            return;
        }
        if has_ancestor_in(doc, node, |a| self.added.contains(&a)) {
            return;
        }
        let (Some(parent_id), Some(next)) = (registry.id_of(parent), next_id(doc, registry, node)) else {
            out.deferred.push(doc, node);
            return;
        };
        let parent_privacy = self.privacy.level(doc, parent);
        if parent_privacy.is_hidden() {
            return;
        }
        let mut ctx = SerializeContext::mutation(registry, &mut out.serialized_ids);
        if let Some(serialized) = serialize_node_with_id(doc, node, parent_privacy, &mut ctx) {
            out.adds.push(AddedNodeMutation {
                parent_id,
                next_id: next,
                node: serialized,
            });
        }
    }

    fn resolve_deferred(&mut self, doc: &Document, registry: &mut NodeRegistry, out: &mut Resolution) {
        let mut candidate: Option<usize> = None;
        while !out.deferred.is_empty() {
            let Some(slot) = pick_ready(doc, registry, &out.deferred, candidate) else {
                log::debug!(
                    "Dropping {} added nodes with no resolvable position",
                    out.deferred.len()
                );
                out.deferred.clear();
                break;
            };
            candidate = out.deferred.prev(slot);
            if let Some(node) = out.deferred.remove(slot) {
                self.push_add(doc, registry, node, out);
            }
        }
    }

    fn is_parent_removed(&self, doc: &Document, node: NodeRef) -> bool {
        !self.removed.is_empty() && has_ancestor_in(doc, node, |a| self.removed.contains(&a))
    }
}

// ───────────────────────────────────────────────────────────────────
// Helpers
// ───────────────────────────────────────────────────────────────────

/// Id of the first non-ignored next sibling. `None` while that sibling has
/// no id yet; `Some(None)` when there is no such sibling.
fn next_id(doc: &Document, registry: &NodeRegistry, node: NodeRef) -> Option<Option<NodeId>> {
    let mut sibling = doc.next_sibling(node);
    while let Some(s) = sibling {
        match registry.lookup(s) {
            Lookup::Known(id) => return Some(Some(id)),
            Lookup::Ignored => sibling = doc.next_sibling(s),
            Lookup::Unknown => return None,
        }
    }
    Some(None)
}

fn is_resolvable(doc: &Document, registry: &NodeRegistry, node: NodeRef) -> bool {
    doc.parent(node).is_some_and(|p| registry.has(p)) && next_id(doc, registry, node).is_some()
}

/// The last candidate if it became resolvable, else the first resolvable
/// entry scanning from the tail.
fn pick_ready(
    doc: &Document,
    registry: &NodeRegistry,
    queue: &DeferredQueue,
    candidate: Option<usize>,
) -> Option<usize> {
    let ready = |slot: usize| queue.node(slot).is_some_and(|n| is_resolvable(doc, registry, n));
    if let Some(slot) = candidate.filter(|&slot| ready(slot)) {
        return Some(slot);
    }
    let mut cursor = queue.tail();
    while let Some(slot) = cursor {
        if ready(slot) {
            return Some(slot);
        }
        cursor = queue.prev(slot);
    }
    None
}

fn has_ancestor_in(doc: &Document, node: NodeRef, mut pred: impl FnMut(NodeRef) -> bool) -> bool {
    let mut current = doc.parent(node);
    while let Some(n) = current {
        if pred(n) {
            return true;
        }
        current = doc.parent(n);
    }
    false
}

/// Whether `target` is no longer reachable from the document through
/// tracked nodes.
fn is_ancestor_removed(doc: &Document, registry: &NodeRegistry, target: NodeRef) -> bool {
    let mut current = target;
    loop {
        if !registry.has(current) {
            return true;
        }
        match doc.parent(current) {
            Some(parent) if parent == doc.root() => return false,
            Some(parent) => current = parent,
            None => return current != doc.root(),
        }
    }
}

fn remove_subtree(set: &mut FxIndexSet<NodeRef>, doc: &Document, node: NodeRef) {
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        set.shift_remove(&n);
        stack.extend_from_slice(doc.children(n));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::serialize_document;
    use rewind_core::{PrivacyLevel, PRIVACY_ATTR_NAME};

    struct Harness {
        doc: Document,
        registry: NodeRegistry,
        tracker: MutationTracker,
        body: NodeRef,
    }

    impl Harness {
        fn new() -> Self {
            let mut doc = Document::with_skeleton("https://example.com/");
            let body = doc.body().unwrap();
            let mut registry = NodeRegistry::new();
            serialize_document(&doc, &mut registry, Privacy::ALLOW).unwrap();
            doc.observe();
            Self {
                doc,
                registry,
                tracker: MutationTracker::new(Privacy::ALLOW),
                body,
            }
        }

        fn flush(&mut self) -> Option<MutationData> {
            self.tracker.flush(&mut self.doc, &mut self.registry)
        }

        fn id(&self, node: NodeRef) -> NodeId {
            self.registry.id_of(node).unwrap()
        }
    }

    #[test]
    fn test_empty_batch_emits_nothing() {
        let mut h = Harness::new();
        assert_eq!(h.flush(), None);
    }

    #[test]
    fn test_append_emits_single_add() {
        let mut h = Harness::new();
        let p = h.doc.create_element("p");
        h.doc.append_child(h.body, p).unwrap();
        let data = h.flush().unwrap();
        assert_eq!(data.adds.len(), 1);
        assert_eq!(data.adds[0].parent_id, h.id(h.body));
        assert_eq!(data.adds[0].next_id, None);
        assert!(data.removes.is_empty());
    }

    #[test]
    fn test_subtree_is_serialized_once() {
        let mut h = Harness::new();
        let div = h.doc.create_element("div");
        h.doc.append_child(h.body, div).unwrap();
        let span = h.doc.append_element(div, "span", &[]).unwrap();
        h.doc.append_text(span, "hi").unwrap();
        let data = h.flush().unwrap();
        assert_eq!(data.adds.len(), 1);
        assert_eq!(data.adds[0].node.ids().len(), 3);
    }

    #[test]
    fn test_add_then_remove_cancels_out() {
        let mut h = Harness::new();
        let div = h.doc.create_element("div");
        h.doc.append_child(h.body, div).unwrap();
        h.doc.remove(div).unwrap();
        assert_eq!(h.flush(), None);
        assert!(!h.registry.has(div));
    }

    #[test]
    fn test_remove_known_node() {
        let mut h = Harness::new();
        let div = h.doc.append_element(h.body, "div", &[]).unwrap();
        h.flush();
        let div_id = h.id(div);
        h.doc.remove(div).unwrap();
        let data = h.flush().unwrap();
        assert_eq!(
            data.removes,
            vec![RemovedNodeMutation {
                parent_id: h.id(h.body),
                id: div_id
            }]
        );
        assert!(!h.registry.has(div));
    }

    #[test]
    fn test_descendant_of_removed_node_is_not_reported() {
        let mut h = Harness::new();
        let div = h.doc.append_element(h.body, "div", &[]).unwrap();
        let span = h.doc.append_element(div, "span", &[]).unwrap();
        h.flush();
        h.doc.remove(div).unwrap();
        h.doc.remove(span).unwrap();
        let data = h.flush().unwrap();
        assert_eq!(data.removes.len(), 1);
        assert!(!h.registry.has(span));
    }

    #[test]
    fn test_move_is_remove_plus_add_with_new_id() {
        let mut h = Harness::new();
        let a = h.doc.append_element(h.body, "section", &[]).unwrap();
        let b = h.doc.append_element(h.body, "section", &[]).unwrap();
        let item = h.doc.append_element(a, "p", &[]).unwrap();
        h.flush();
        let old_id = h.id(item);

        h.doc.append_child(b, item).unwrap();
        let data = h.flush().unwrap();
        assert_eq!(data.removes, vec![RemovedNodeMutation { parent_id: h.id(a), id: old_id }]);
        assert_eq!(data.adds.len(), 1);
        assert_eq!(data.adds[0].parent_id, h.id(b));
        assert_ne!(data.adds[0].node.id, old_id);
        assert_eq!(h.id(item), data.adds[0].node.id);
    }

    #[test]
    fn test_moved_in_and_out_leaves_only_the_first_remove() {
        let mut h = Harness::new();
        let a = h.doc.append_element(h.body, "div", &[]).unwrap();
        let b = h.doc.append_element(h.body, "div", &[]).unwrap();
        let item = h.doc.append_element(a, "p", &[]).unwrap();
        h.flush();
        let item_id = h.id(item);

        h.doc.append_child(b, item).unwrap();
        h.doc.remove(item).unwrap();
        let data = h.flush().unwrap();
        assert!(data.adds.is_empty());
        assert_eq!(data.removes, vec![RemovedNodeMutation { parent_id: h.id(a), id: item_id }]);
    }

    #[test]
    fn test_add_before_unserialized_sibling_is_deferred() {
        let mut h = Harness::new();
        let first = h.doc.append_element(h.body, "li", &[]).unwrap();
        let second = h.doc.append_element(h.body, "li", &[]).unwrap();
        let data = h.flush().unwrap();
        assert_eq!(data.adds.len(), 2);
        let first_add = data.adds.iter().find(|a| a.node.id == h.id(first)).unwrap();
        assert_eq!(first_add.next_id, Some(h.id(second)));
        let second_pos = data.adds.iter().position(|a| a.node.id == h.id(second)).unwrap();
        let first_pos = data.adds.iter().position(|a| a.node.id == h.id(first)).unwrap();
        assert!(second_pos < first_pos);
    }

    #[test]
    fn test_next_sibling_skips_ignored_nodes() {
        let mut h = Harness::new();
        let script = h.doc.append_element(h.body, "script", &[]).unwrap();
        h.flush();
        assert!(h.registry.is_ignored(script));
        let p = h.doc.create_element("p");
        h.doc.insert_before(h.body, p, Some(script)).unwrap();
        let data = h.flush().unwrap();
        assert_eq!(data.adds.len(), 1);
        assert_eq!(data.adds[0].next_id, None);
    }

    #[test]
    fn test_attribute_changes_merge_last_write_wins() {
        let mut h = Harness::new();
        let div = h.doc.append_element(h.body, "div", &[("class", "a")]).unwrap();
        h.flush();
        h.doc.set_attribute(div, "class", "b").unwrap();
        h.doc.set_attribute(div, "class", "c").unwrap();
        h.doc.set_attribute(div, "title", "t").unwrap();
        h.doc.remove_attribute(div, "title").unwrap();
        let data = h.flush().unwrap();
        assert_eq!(data.attributes.len(), 1);
        let changes = &data.attributes[0].attributes;
        assert_eq!(changes["class"], Some("c".to_string()));
        assert_eq!(changes["title"], None);
    }

    #[test]
    fn test_attribute_reset_to_old_value_is_skipped() {
        let mut h = Harness::new();
        let div = h.doc.append_element(h.body, "div", &[("class", "a")]).unwrap();
        h.flush();
        h.doc.set_attribute(div, "class", "a").unwrap();
        assert_eq!(h.flush(), None);
    }

    #[test]
    fn test_text_change_is_masked() {
        let mut h = Harness::new();
        let p = h.doc.append_element(h.body, "p", &[(PRIVACY_ATTR_NAME, "mask")]).unwrap();
        let text = h.doc.append_text(p, "old").unwrap();
        h.flush();
        h.doc.set_text(text, "new value").unwrap();
        let data = h.flush().unwrap();
        assert_eq!(data.texts, vec![TextMutation { id: h.id(text), value: "xxx xxxxx".into() }]);
    }

    #[test]
    fn test_changes_inside_hidden_subtree_are_dropped() {
        let mut h = Harness::new();
        let hidden = h.doc.append_element(h.body, "div", &[(PRIVACY_ATTR_NAME, "hidden")]).unwrap();
        h.flush();
        h.doc.append_element(hidden, "p", &[]).unwrap();
        h.doc.set_attribute(hidden, "class", "x").unwrap();
        assert_eq!(h.flush(), None);
    }

    #[test]
    fn test_text_of_fresh_node_is_not_reported_twice() {
        let mut h = Harness::new();
        let p = h.doc.create_element("p");
        let text = h.doc.create_text("a");
        h.doc.append_child(p, text).unwrap();
        h.doc.append_child(h.body, p).unwrap();
        h.doc.set_text(text, "b").unwrap();
        let data = h.flush().unwrap();
        assert_eq!(data.adds.len(), 1);
        assert!(data.texts.is_empty());
    }

    #[test]
    fn test_freeze_buffers_until_unfreeze() {
        let mut h = Harness::new();
        h.tracker.freeze();
        h.doc.append_element(h.body, "div", &[]).unwrap();
        assert_eq!(h.flush(), None);
        assert!(h.tracker.is_frozen());
        let data = h.tracker.unfreeze(&h.doc, &mut h.registry).unwrap();
        assert_eq!(data.adds.len(), 1);
    }

    #[test]
    fn test_unresolvable_adds_are_dropped() {
        let mut doc = Document::with_skeleton("https://example.com/");
        doc.observe();
        let body = doc.body().unwrap();
        let mut registry = NodeRegistry::new();
        let mut tracker = MutationTracker::new(Privacy::new(PrivacyLevel::Allow));
        // nothing was ever snapshotted, so body has no id
        doc.append_element(body, "div", &[]).unwrap();
        assert_eq!(tracker.flush(&mut doc, &mut registry), None);
        assert!(registry.is_empty());
    }
}
