//! Arena-backed host document.
//!
//! Stands in for the live page the recorder observes. Nodes live in a single
//! `Vec` and are addressed by compact `NodeRef` indices; nothing is ever freed,
//! detached nodes simply lose their parent link.
//!
//! ```text
//!  Document ──▸ nodes: [ Node | Node | Node | … ]
//!      │                  ▲
//!      │  observe()       │ NodeRef(u32)
//!      ▼                  │
//!  queue: [ RawMutation … ] ──take_mutations()──▸ MutationTracker
//! ```
//!
//! Tree operations follow DOM semantics: re-inserting a node that already has
//! a parent detaches it first, and only changes on connected targets are
//! reported to the observer. Property setters (`value`, `checked`, bounding
//! boxes, stylesheets) never produce notifications.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ───────────────────────────────────────────────────────────────────
// Handles & errors
// ───────────────────────────────────────────────────────────────────

/// Index of a node inside its owning [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(u32);

impl NodeRef {
    /// Raw arena index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeRef),
    #[error("Node {0:?} cannot have children")]
    NotAContainer(NodeRef),
    #[error("Inserting {child:?} under {parent:?} would create a cycle")]
    HierarchyCycle { parent: NodeRef, child: NodeRef },
    #[error("{child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeRef, child: NodeRef },
    #[error("Node {0:?} is not an element")]
    NotAnElement(NodeRef),
    #[error("Node {0:?} holds no character data")]
    NotCharacterData(NodeRef),
    #[error("The document node cannot be moved")]
    DocumentRoot,
}

// ───────────────────────────────────────────────────────────────────
// Node data
// ───────────────────────────────────────────────────────────────────

/// Measured layout box of an element.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// CSSOM view of a `<style>` or `<link rel="stylesheet">` element.
///
/// For a `<link>`, `rules` is the fetched sheet. For a `<style>`, the
/// sheet's rule list is the element's text followed by `rules`, which only
/// holds what [`Document::insert_rule`] added.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StyleSheet {
    pub href: Option<String>,
    pub rules: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElementData {
    /// Lower-case tag name
    pub tag_name: String,
    /// Attributes in insertion order
    pub attributes: Vec<(String, String)>,
    /// Live `value` property of form controls
    pub value: Option<String>,
    pub checked: bool,
    pub selected: bool,
    pub bounding_box: Rect,
    /// Reachable stylesheet, `None` when cross-origin or not a style element
    pub stylesheet: Option<StyleSheet>,
}

impl ElementData {
    pub fn new(tag_name: &str) -> Self {
        Self {
            tag_name: tag_name.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|(n, _)| n == name)
    }

    /// Whitespace-separated tokens of the `class` attribute.
    pub fn class_list(&self) -> impl Iterator<Item = &str> {
        self.attribute("class").unwrap_or("").split_whitespace()
    }

    /// Attribute value lower-cased, empty string when absent.
    pub fn lower_attribute(&self, name: &str) -> String {
        self.attribute(name)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeData {
    Document,
    DocumentType {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element(ElementData),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub data: NodeData,
    parent: Option<NodeRef>,
    children: Vec<NodeRef>,
}

/// Raw structural notification, as delivered by the host observer.
#[derive(Clone, Debug, PartialEq)]
pub enum RawMutation {
    ChildList {
        target: NodeRef,
        added: Vec<NodeRef>,
        removed: Vec<NodeRef>,
    },
    Attribute {
        target: NodeRef,
        name: String,
        old_value: Option<String>,
    },
    Text {
        target: NodeRef,
        old_value: String,
    },
}

impl RawMutation {
    pub fn target(&self) -> NodeRef {
        match self {
            Self::ChildList { target, .. }
            | Self::Attribute { target, .. }
            | Self::Text { target, .. } => *target,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Document
// ───────────────────────────────────────────────────────────────────

pub struct Document {
    nodes: Vec<Node>,
    root: NodeRef,
    base_url: String,
    observing: bool,
    queue: Vec<RawMutation>,
}

impl Document {
    /// Create an empty document (just the document node).
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeRef(0),
            base_url: base_url.into(),
            observing: false,
            queue: Vec::new(),
        };
        doc.root = doc.alloc(NodeData::Document);
        doc
    }

    /// Create a document with `<!DOCTYPE html><html><head></head><body></body></html>`.
    pub fn with_skeleton(base_url: impl Into<String>) -> Self {
        let mut doc = Self::new(base_url);
        let root = doc.root;
        let doctype = doc.create_doctype("html", "", "");
        let html = doc.create_element("html");
        let head = doc.create_element("head");
        let body = doc.create_element("body");
        // Fresh nodes under the root: none of these can fail.
        for (parent, child) in [(root, doctype), (root, html), (html, head), (html, body)] {
            doc.nodes[parent.index()].children.push(child);
            doc.nodes[child.index()].parent = Some(parent);
        }
        doc
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = base_url.into();
    }

    /// The `<html>` element, if any.
    pub fn document_element(&self) -> Option<NodeRef> {
        self.children(self.root)
            .iter()
            .copied()
            .find(|&n| self.element(n).is_some())
    }

    pub fn head(&self) -> Option<NodeRef> {
        self.child_by_tag(self.document_element()?, "head")
    }

    pub fn body(&self) -> Option<NodeRef> {
        self.child_by_tag(self.document_element()?, "body")
    }

    fn child_by_tag(&self, parent: NodeRef, tag: &str) -> Option<NodeRef> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&n| self.tag_name(n) == Some(tag))
    }

    // ---------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------

    fn alloc(&mut self, data: NodeData) -> NodeRef {
        let node = NodeRef(self.nodes.len() as u32);
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        node
    }

    pub fn create_element(&mut self, tag_name: &str) -> NodeRef {
        self.alloc(NodeData::Element(ElementData::new(tag_name)))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeRef {
        self.alloc(NodeData::Text(text.into()))
    }

    pub fn create_cdata(&mut self, text: impl Into<String>) -> NodeRef {
        self.alloc(NodeData::CData(text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeRef {
        self.alloc(NodeData::Comment(text.into()))
    }

    pub fn create_doctype(&mut self, name: &str, public_id: &str, system_id: &str) -> NodeRef {
        self.alloc(NodeData::DocumentType {
            name: name.to_string(),
            public_id: public_id.to_string(),
            system_id: system_id.to_string(),
        })
    }

    /// Create an element with attributes and append it to `parent`.
    pub fn append_element(
        &mut self,
        parent: NodeRef,
        tag_name: &str,
        attributes: &[(&str, &str)],
    ) -> Result<NodeRef, DomError> {
        let node = self.create_element(tag_name);
        if let NodeData::Element(el) = &mut self.nodes[node.index()].data {
            el.attributes = attributes
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect();
        }
        self.append_child(parent, node)?;
        Ok(node)
    }

    /// Create a text node and append it to `parent`.
    pub fn append_text(&mut self, parent: NodeRef, text: &str) -> Result<NodeRef, DomError> {
        let node = self.create_text(text);
        self.append_child(parent, node)?;
        Ok(node)
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub fn node(&self, node: NodeRef) -> Option<&Node> {
        self.nodes.get(node.index())
    }

    pub fn data(&self, node: NodeRef) -> Option<&NodeData> {
        self.node(node).map(|n| &n.data)
    }

    pub fn element(&self, node: NodeRef) -> Option<&ElementData> {
        match self.data(node)? {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, node: NodeRef) -> Result<&mut ElementData, DomError> {
        match self.nodes.get_mut(node.index()).map(|n| &mut n.data) {
            Some(NodeData::Element(el)) => Ok(el),
            Some(_) => Err(DomError::NotAnElement(node)),
            None => Err(DomError::NodeNotFound(node)),
        }
    }

    pub fn tag_name(&self, node: NodeRef) -> Option<&str> {
        self.element(node).map(|el| el.tag_name.as_str())
    }

    pub fn attribute(&self, node: NodeRef, name: &str) -> Option<&str> {
        self.element(node)?.attribute(name)
    }

    /// Character data of text, CDATA and comment nodes.
    pub fn text(&self, node: NodeRef) -> Option<&str> {
        match self.data(node)? {
            NodeData::Text(t) | NodeData::CData(t) | NodeData::Comment(t) => Some(t),
            _ => None,
        }
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.node(node)?.parent
    }

    /// Parent if it is an element.
    pub fn parent_element(&self, node: NodeRef) -> Option<NodeRef> {
        self.parent(node).filter(|&p| self.element(p).is_some())
    }

    pub fn children(&self, node: NodeRef) -> &[NodeRef] {
        self.node(node).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    fn position(&self, parent: NodeRef, child: NodeRef) -> Option<usize> {
        self.children(parent).iter().position(|&c| c == child)
    }

    pub fn next_sibling(&self, node: NodeRef) -> Option<NodeRef> {
        let parent = self.parent(node)?;
        let idx = self.position(parent, node)?;
        self.children(parent).get(idx + 1).copied()
    }

    pub fn previous_sibling(&self, node: NodeRef) -> Option<NodeRef> {
        let parent = self.parent(node)?;
        let idx = self.position(parent, node)?;
        idx.checked_sub(1).and_then(|i| self.children(parent).get(i).copied())
    }

    /// Whether `node` is attached (transitively) to the document node.
    pub fn is_connected(&self, node: NodeRef) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == self.root {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// Inclusive containment: `node` is `ancestor` or one of its descendants.
    pub fn contains(&self, ancestor: NodeRef, node: NodeRef) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// `node` and all of its descendants in document order.
    pub fn descendants(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).iter().rev());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn check(&self, node: NodeRef) -> Result<(), DomError> {
        if node.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(DomError::NodeNotFound(node))
        }
    }

    // ---------------------------------------------------------------
    // Tree mutations
    // ---------------------------------------------------------------

    pub fn append_child(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference` (or at the end), detaching it from
    /// its current parent first.
    pub fn insert_before(
        &mut self,
        parent: NodeRef,
        child: NodeRef,
        reference: Option<NodeRef>,
    ) -> Result<(), DomError> {
        self.check(parent)?;
        self.check(child)?;
        if child == self.root {
            return Err(DomError::DocumentRoot);
        }
        if !matches!(
            self.nodes[parent.index()].data,
            NodeData::Document | NodeData::Element(_)
        ) {
            return Err(DomError::NotAContainer(parent));
        }
        if self.contains(child, parent) {
            return Err(DomError::HierarchyCycle { parent, child });
        }
        let mut reference = reference;
        if let Some(r) = reference {
            if self.parent(r) != Some(parent) {
                return Err(DomError::NotAChild { parent, child: r });
            }
            if r == child {
                reference = self.next_sibling(child);
            }
        }

        self.remove(child)?;

        let index = match reference {
            Some(r) => self
                .position(parent, r)
                .ok_or(DomError::NotAChild { parent, child: r })?,
            None => self.nodes[parent.index()].children.len(),
        };
        self.nodes[parent.index()].children.insert(index, child);
        self.nodes[child.index()].parent = Some(parent);

        self.notify(RawMutation::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), DomError> {
        self.check(parent)?;
        self.check(child)?;
        if self.parent(child) != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.remove(child)
    }

    /// Detach `node` from its parent. No-op for parentless nodes.
    pub fn remove(&mut self, node: NodeRef) -> Result<(), DomError> {
        self.check(node)?;
        let Some(parent) = self.parent(node) else {
            return Ok(());
        };
        self.nodes[parent.index()].children.retain(|&c| c != node);
        self.nodes[node.index()].parent = None;
        self.notify(RawMutation::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![node],
        });
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        node: NodeRef,
        name: &str,
        value: impl Into<String>,
    ) -> Result<(), DomError> {
        let value = value.into();
        let el = self.element_mut(node)?;
        let old_value = match el.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => Some(std::mem::replace(v, value)),
            None => {
                el.attributes.push((name.to_string(), value));
                None
            }
        };
        self.notify(RawMutation::Attribute {
            target: node,
            name: name.to_string(),
            old_value,
        });
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeRef, name: &str) -> Result<(), DomError> {
        let el = self.element_mut(node)?;
        let Some(idx) = el.attributes.iter().position(|(n, _)| n == name) else {
            return Ok(());
        };
        let (_, old) = el.attributes.remove(idx);
        self.notify(RawMutation::Attribute {
            target: node,
            name: name.to_string(),
            old_value: Some(old),
        });
        Ok(())
    }

    /// Replace the character data of a text, CDATA or comment node.
    pub fn set_text(&mut self, node: NodeRef, text: impl Into<String>) -> Result<(), DomError> {
        self.check(node)?;
        let old_value = match &mut self.nodes[node.index()].data {
            NodeData::Text(t) | NodeData::CData(t) | NodeData::Comment(t) => {
                std::mem::replace(t, text.into())
            }
            _ => return Err(DomError::NotCharacterData(node)),
        };
        self.notify(RawMutation::Text {
            target: node,
            old_value,
        });
        Ok(())
    }

    // ---------------------------------------------------------------
    // Properties (no notifications)
    // ---------------------------------------------------------------

    pub fn set_value(&mut self, node: NodeRef, value: impl Into<String>) -> Result<(), DomError> {
        self.element_mut(node)?.value = Some(value.into());
        Ok(())
    }

    pub fn set_checked(&mut self, node: NodeRef, checked: bool) -> Result<(), DomError> {
        self.element_mut(node)?.checked = checked;
        Ok(())
    }

    pub fn set_selected(&mut self, node: NodeRef, selected: bool) -> Result<(), DomError> {
        self.element_mut(node)?.selected = selected;
        Ok(())
    }

    pub fn set_bounding_box(&mut self, node: NodeRef, rect: Rect) -> Result<(), DomError> {
        self.element_mut(node)?.bounding_box = rect;
        Ok(())
    }

    pub fn set_stylesheet(
        &mut self,
        node: NodeRef,
        sheet: Option<StyleSheet>,
    ) -> Result<(), DomError> {
        self.element_mut(node)?.stylesheet = sheet;
        Ok(())
    }

    /// Append a rule through the CSSOM (`sheet.insertRule`).
    pub fn insert_rule(&mut self, node: NodeRef, rule: impl Into<String>) -> Result<(), DomError> {
        self.element_mut(node)?
            .stylesheet
            .get_or_insert_with(StyleSheet::default)
            .rules
            .push(rule.into());
        Ok(())
    }

    // ---------------------------------------------------------------
    // Observation
    // ---------------------------------------------------------------

    /// Start queueing notifications for the connected tree.
    pub fn observe(&mut self) {
        self.observing = true;
    }

    /// Stop queueing notifications and discard undelivered ones.
    pub fn disconnect(&mut self) {
        self.observing = false;
        self.queue.clear();
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Hand over the notifications accumulated since the last call.
    pub fn take_mutations(&mut self) -> Vec<RawMutation> {
        std::mem::take(&mut self.queue)
    }

    pub fn pending_mutations(&self) -> usize {
        self.queue.len()
    }

    fn notify(&mut self, mutation: RawMutation) {
        if self.observing && self.is_connected(mutation.target()) {
            self.queue.push(mutation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skeleton_structure() {
        let doc = Document::with_skeleton("https://example.com/");
        let html = doc.document_element().unwrap();
        assert_eq!(doc.tag_name(html), Some("html"));
        assert_eq!(doc.tag_name(doc.head().unwrap()), Some("head"));
        assert_eq!(doc.tag_name(doc.body().unwrap()), Some("body"));
        assert!(doc.is_connected(doc.body().unwrap()));
    }

    #[test]
    fn test_insert_before_orders_children() {
        let mut doc = Document::with_skeleton("https://example.com/");
        let body = doc.body().unwrap();
        let a = doc.append_element(body, "a", &[]).unwrap();
        let b = doc.create_element("b");
        doc.insert_before(body, b, Some(a)).unwrap();
        assert_eq!(doc.children(body), &[b, a]);
        assert_eq!(doc.next_sibling(b), Some(a));
        assert_eq!(doc.previous_sibling(a), Some(b));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut doc = Document::with_skeleton("https://example.com/");
        let body = doc.body().unwrap();
        let div = doc.append_element(body, "div", &[]).unwrap();
        let err = doc.append_child(div, body).unwrap_err();
        assert_eq!(err, DomError::HierarchyCycle { parent: div, child: body });
    }

    #[test]
    fn test_text_node_is_not_a_container() {
        let mut doc = Document::new("https://example.com/");
        let text = doc.create_text("hi");
        let el = doc.create_element("span");
        assert_eq!(doc.append_child(text, el), Err(DomError::NotAContainer(text)));
    }

    #[test]
    fn test_notifications_only_when_observing_and_connected() {
        let mut doc = Document::with_skeleton("https://example.com/");
        let body = doc.body().unwrap();
        doc.append_element(body, "div", &[]).unwrap();
        assert_eq!(doc.pending_mutations(), 0);

        doc.observe();
        let detached = doc.create_element("section");
        doc.set_attribute(detached, "id", "x").unwrap();
        assert_eq!(doc.pending_mutations(), 0);

        doc.append_child(body, detached).unwrap();
        doc.set_attribute(detached, "id", "y").unwrap();
        let batch = doc.take_mutations();
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch[1],
            RawMutation::Attribute {
                target: detached,
                name: "id".into(),
                old_value: Some("x".into()),
            }
        );
    }

    #[test]
    fn test_move_reports_remove_then_add() {
        let mut doc = Document::with_skeleton("https://example.com/");
        let body = doc.body().unwrap();
        let a = doc.append_element(body, "div", &[]).unwrap();
        let b = doc.append_element(body, "div", &[]).unwrap();
        let child = doc.append_element(a, "span", &[]).unwrap();
        doc.observe();

        doc.append_child(b, child).unwrap();
        let batch = doc.take_mutations();
        assert_eq!(
            batch,
            vec![
                RawMutation::ChildList { target: a, added: vec![], removed: vec![child] },
                RawMutation::ChildList { target: b, added: vec![child], removed: vec![] },
            ]
        );
    }

    #[test]
    fn test_insert_rule_does_not_touch_text() {
        let mut doc = Document::with_skeleton("https://example.com/");
        let head = doc.head().unwrap();
        let style = doc.append_element(head, "style", &[]).unwrap();
        doc.observe();
        doc.insert_rule(style, "p { color: red; }").unwrap();
        assert!(doc.children(style).is_empty());
        assert_eq!(doc.pending_mutations(), 0);
        let sheet = doc.element(style).unwrap().stylesheet.as_ref().unwrap();
        assert_eq!(sheet.rules.len(), 1);
    }

    #[test]
    fn test_set_text_reports_old_value() {
        let mut doc = Document::with_skeleton("https://example.com/");
        let body = doc.body().unwrap();
        let text = doc.append_text(body, "before").unwrap();
        doc.observe();
        doc.set_text(text, "after").unwrap();
        assert_eq!(doc.text(text), Some("after"));
        assert_eq!(
            doc.take_mutations(),
            vec![RawMutation::Text { target: text, old_value: "before".into() }]
        );
    }

    #[test]
    fn test_descendants_document_order() {
        let mut doc = Document::new("https://example.com/");
        let root = doc.root();
        let a = doc.append_element(root, "a", &[]).unwrap();
        let b = doc.append_element(a, "b", &[]).unwrap();
        let c = doc.append_element(a, "c", &[]).unwrap();
        let d = doc.append_element(b, "d", &[]).unwrap();
        assert_eq!(doc.descendants(a), vec![a, b, d, c]);
    }
}
