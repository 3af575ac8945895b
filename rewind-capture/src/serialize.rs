//! Snapshot serializer.
//!
//! Walks a live subtree once and produces the privacy-filtered
//! [`SerializedNodeWithId`] graph a replay player rebuilds the page from.
//!
//! ```text
//!   live node ──self_level──▸ Privacy ──┬─ Ignore / deny-list / comment ─▸ None
//!                                       ├─ Hidden ─▸ empty placeholder element
//!                                       └─ otherwise ─▸ filtered attrs + children
//! ```
//!
//! Every produced node is assigned an id in the [`NodeRegistry`]; every
//! skipped node is marked ignored there.

use crate::privacy::{
    censor_text, self_level, should_ignore_element, should_mask_node, CENSORED_IMG_MARK,
    CENSORED_STRING_MARK,
};
use crate::registry::NodeRegistry;
use crate::url_rewrite::{absolute_url, absolutize_css, absolutize_srcset};
use rand::seq::SliceRandom;
use rewind_core::privacy::reconcile;
use rewind_core::{
    AttributeValue, Attributes, Document, ElementData, NodeData, NodeId, NodeRef, Privacy,
    PrivacyLevel, SerializedNode, SerializedNodeWithId, StyleSheet, PRIVACY_ATTR_NAME,
};
use rustc_hash::FxHashSet;

/// Attributes kept verbatim under `Mask`: test hooks used by automation.
pub const STABLE_ATTRIBUTES: &[&str] = &[
    PRIVACY_ATTR_NAME,
    "data-testid",
    "data-test",
    "data-qa",
    "data-cy",
    "data-test-id",
    "data-qa-id",
    "data-testing",
];

/// Attribute carrying the inlined rules of a stylesheet.
pub const CSS_TEXT_ATTR: &str = "_cssText";

// ---------------------------------------------------------------
// Context
// ---------------------------------------------------------------

/// Mutable state threaded through one serialization pass.
pub struct SerializeContext<'a> {
    registry: &'a mut NodeRegistry,
    serialized_ids: Option<&'a mut FxHashSet<NodeId>>,
}

impl<'a> SerializeContext<'a> {
    /// Full-snapshot mode.
    pub fn snapshot(registry: &'a mut NodeRegistry) -> Self {
        Self {
            registry,
            serialized_ids: None,
        }
    }

    /// Mutation mode: every produced id is also recorded in `serialized_ids`.
    pub fn mutation(registry: &'a mut NodeRegistry, serialized_ids: &'a mut FxHashSet<NodeId>) -> Self {
        Self {
            registry,
            serialized_ids: Some(serialized_ids),
        }
    }

    fn assign(&mut self, node: NodeRef) -> NodeId {
        let id = self.registry.assign(node);
        if let Some(ids) = self.serialized_ids.as_deref_mut() {
            ids.insert(id);
        }
        id
    }
}

// ---------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------

/// Serialize the whole document starting at the document node.
pub fn serialize_document(
    doc: &Document,
    registry: &mut NodeRegistry,
    default_privacy: Privacy,
) -> Option<SerializedNodeWithId> {
    let mut ctx = SerializeContext::snapshot(registry);
    serialize_node_with_id(doc, doc.root(), default_privacy, &mut ctx)
}

/// Serialize `node` and its subtree. `parent_privacy` is the effective
/// privacy of the node's parent. Returns `None` when the node is skipped.
pub fn serialize_node_with_id(
    doc: &Document,
    node: NodeRef,
    parent_privacy: Privacy,
    ctx: &mut SerializeContext<'_>,
) -> Option<SerializedNodeWithId> {
    let privacy = reconcile(parent_privacy, self_level(doc, node));
    let serialized = if privacy.level() == PrivacyLevel::Ignore {
        None
    } else {
        serialize_node(doc, node, privacy, ctx)
    };
    if serialized.is_none() {
        ctx.registry.mark_ignored(node);
    }
    serialized
}

fn serialize_node(
    doc: &Document,
    node: NodeRef,
    privacy: Privacy,
    ctx: &mut SerializeContext<'_>,
) -> Option<SerializedNodeWithId> {
    let serialized = match doc.data(node)? {
        NodeData::Document => {
            let id = ctx.assign(node);
            let child_nodes = serialize_children(doc, node, privacy, ctx);
            SerializedNodeWithId {
                id,
                node: SerializedNode::Document { child_nodes },
            }
        }
        NodeData::DocumentType {
            name,
            public_id,
            system_id,
        } => SerializedNodeWithId {
            id: ctx.assign(node),
            node: SerializedNode::DocumentType {
                name: name.clone(),
                public_id: public_id.clone(),
                system_id: system_id.clone(),
            },
        },
        NodeData::Element(el) => return serialize_element(doc, node, el, privacy, ctx),
        NodeData::Text(text) => return serialize_text(doc, node, text, privacy, ctx),
        NodeData::CData(_) => SerializedNodeWithId {
            id: ctx.assign(node),
            node: SerializedNode::CData,
        },
        NodeData::Comment(_) => return None,
    };
    Some(serialized)
}

fn serialize_children(
    doc: &Document,
    node: NodeRef,
    privacy: Privacy,
    ctx: &mut SerializeContext<'_>,
) -> Vec<SerializedNodeWithId> {
    doc.children(node)
        .iter()
        .filter_map(|&child| serialize_node_with_id(doc, child, privacy, ctx))
        .collect()
}

// ---------------------------------------------------------------
// Elements
// ---------------------------------------------------------------

fn serialize_element(
    doc: &Document,
    node: NodeRef,
    el: &ElementData,
    privacy: Privacy,
    ctx: &mut SerializeContext<'_>,
) -> Option<SerializedNodeWithId> {
    if should_ignore_element(el) {
        return None;
    }
    let id = ctx.assign(node);

    if privacy.is_hidden() {
        return Some(SerializedNodeWithId {
            id,
            node: SerializedNode::Element {
                tag_name: el.tag_name.clone(),
                attributes: hidden_attributes(el),
                child_nodes: Vec::new(),
            },
        });
    }

    let attributes = element_attributes(doc, node, el, privacy);
    let mut child_nodes = if el.tag_name == "style" && attributes.contains_key(CSS_TEXT_ATTR) {
        Vec::new()
    } else {
        serialize_children(doc, node, privacy, ctx)
    };
    if privacy.level() == PrivacyLevel::Mask && matches!(el.tag_name.as_str(), "select" | "optgroup") {
        child_nodes.shuffle(&mut rand::thread_rng());
    }

    Some(SerializedNodeWithId {
        id,
        node: SerializedNode::Element {
            tag_name: el.tag_name.clone(),
            attributes,
            child_nodes,
        },
    })
}

/// Placeholder attributes: keeps the box size, never the content.
fn hidden_attributes(el: &ElementData) -> Attributes {
    let mut attributes = Attributes::new();
    for name in ["id", "class"] {
        if let Some(value) = el.attribute(name) {
            attributes.insert(name.to_string(), value.into());
        }
    }
    let rect = el.bounding_box;
    attributes.insert("rr_width".into(), format!("{}px", rect.width).into());
    attributes.insert("rr_height".into(), format!("{}px", rect.height).into());
    attributes.insert(PRIVACY_ATTR_NAME.into(), PrivacyLevel::Hidden.as_str().into());
    attributes
}

fn element_attributes(doc: &Document, node: NodeRef, el: &ElementData, privacy: Privacy) -> Attributes {
    let base = doc.base_url();
    let form_control = is_form_control(&el.tag_name);
    let mut attributes = Attributes::new();

    for (name, value) in &el.attributes {
        if form_control && matches!(name.as_str(), "value" | "checked" | "selected") {
            continue;
        }
        if let Some(value) = serialize_attribute(base, el, name, value, privacy) {
            attributes.insert(name.clone(), AttributeValue::Text(value));
        }
    }

    if form_control {
        if let Some(value) = form_value(el, privacy) {
            attributes.insert("value".into(), value.into());
        }
        if privacy.level() == PrivacyLevel::Allow {
            if el.tag_name == "option" && el.selected {
                attributes.insert("selected".into(), true.into());
            }
            if is_checkable(el) {
                attributes.insert("checked".into(), el.checked.into());
            }
        }
    }

    if let Some(sheet) = &el.stylesheet {
        let sheet_base = sheet.href.as_deref().unwrap_or(base);
        let inline = match el.tag_name.as_str() {
            "link" => el.lower_attribute("rel").contains("stylesheet"),
            "style" => !sheet.rules.is_empty(),
            _ => false,
        };
        if inline {
            let css = absolutize_css(&sheet_css(doc, node, el, sheet), sheet_base);
            attributes.insert(CSS_TEXT_ATTR.into(), css.into());
        }
    }

    attributes
}

/// Every rule readable from the sheet: a `<style>` element's own text,
/// then the rules inserted through the CSSOM.
fn sheet_css(doc: &Document, node: NodeRef, el: &ElementData, sheet: &StyleSheet) -> String {
    let mut css = String::new();
    if el.tag_name == "style" {
        for &child in doc.children(node) {
            if let Some(NodeData::Text(text)) = doc.data(child) {
                css.push_str(text);
            }
        }
    }
    for rule in &sheet.rules {
        css.push_str(rule);
    }
    css
}

/// Transform one attribute value for capture. `None` drops the attribute.
///
/// Also used for attribute mutations, so form state attributes are handled
/// here too.
pub fn serialize_attribute(
    base: &str,
    el: &ElementData,
    name: &str,
    value: &str,
    privacy: Privacy,
) -> Option<String> {
    if privacy.is_hidden() {
        return None;
    }
    if is_form_control(&el.tag_name) {
        match name {
            "value" => return form_value(el, privacy),
            "checked" | "selected" => {
                return (privacy.level() == PrivacyLevel::Allow).then(|| value.to_string())
            }
            _ => {}
        }
    }

    if privacy.level() == PrivacyLevel::Mask && !STABLE_ATTRIBUTES.contains(&name) {
        if matches!(name, "title" | "alt" | "placeholder" | "aria-label" | "name") {
            return Some(CENSORED_STRING_MARK.to_string());
        }
        if el.tag_name == "img" && (name == "src" || name == "srcset") {
            let rect = el.bounding_box;
            if rect.width > 0.0 && rect.height > 0.0 {
                return Some(censored_image_for_size(rect.width, rect.height));
            }
            return Some(CENSORED_IMG_MARK.to_string());
        }
        if el.tag_name == "a" && name == "href" {
            return Some(CENSORED_STRING_MARK.to_string());
        }
        if name.starts_with("data-") {
            return Some(CENSORED_STRING_MARK.to_string());
        }
    }

    let value = match name {
        "src" | "href" | "xlink:href" | "background" => absolute_url(value, base),
        "srcset" => absolutize_srcset(value, base),
        "style" => absolutize_css(value, base),
        _ => value.to_string(),
    };
    Some(value)
}

/// Value of a form control as it may be recorded at `privacy`.
///
/// Only `Allow` reveals the value; otherwise a non-empty value is replaced
/// by [`CENSORED_STRING_MARK`] and option values are omitted.
pub fn form_value(el: &ElementData, privacy: Privacy) -> Option<String> {
    let value = el.value.as_deref().or_else(|| el.attribute("value"));
    if privacy.level() == PrivacyLevel::Allow {
        return value.map(str::to_string);
    }
    match value {
        Some(v) if !v.is_empty() && el.tag_name != "option" => Some(CENSORED_STRING_MARK.to_string()),
        _ => None,
    }
}

/// `<input type="radio|checkbox">`
pub fn is_checkable(el: &ElementData) -> bool {
    el.tag_name == "input" && matches!(el.lower_attribute("type").as_str(), "radio" | "checkbox")
}

fn is_form_control(tag_name: &str) -> bool {
    matches!(tag_name, "input" | "textarea" | "select" | "option")
}

/// Silver SVG box with the measured size of a masked image.
pub fn censored_image_for_size(width: f64, height: f64) -> String {
    format!(
        "data:image/svg+xml;charset=utf-8,<svg%20width='{width}'%20height='{height}'%20style='background-color:silver'%20xmlns='http://www.w3.org/2000/svg'></svg>"
    )
}

// ---------------------------------------------------------------
// Text
// ---------------------------------------------------------------

fn serialize_text(
    doc: &Document,
    node: NodeRef,
    text: &str,
    privacy: Privacy,
    ctx: &mut SerializeContext<'_>,
) -> Option<SerializedNodeWithId> {
    let parent_tag = doc.parent(node).and_then(|p| doc.tag_name(p));
    let blank = text.trim().is_empty();
    if blank && parent_tag == Some("head") {
        return None;
    }

    let text_content = match parent_tag {
        Some("script") => CENSORED_STRING_MARK.to_string(),
        Some("style") => absolutize_css(text, doc.base_url()),
        _ if privacy.is_hidden() => CENSORED_STRING_MARK.to_string(),
        _ if should_mask_node(doc, node, privacy) => match parent_tag {
            Some("select" | "datalist" | "optgroup") if blank => return None,
            Some("option") => CENSORED_STRING_MARK.to_string(),
            _ => censor_text(text),
        },
        _ => text.to_string(),
    };

    Some(SerializedNodeWithId {
        id: ctx.assign(node),
        node: SerializedNode::Text { text_content },
    })
}

/// Text value as recorded for a character-data change at `privacy`.
pub fn serialize_text_value(doc: &Document, node: NodeRef, privacy: Privacy) -> Option<String> {
    let text = doc.text(node)?;
    let parent_tag = doc.parent(node).and_then(|p| doc.tag_name(p));
    let value = match parent_tag {
        Some("script") => CENSORED_STRING_MARK.to_string(),
        Some("style") => absolutize_css(text, doc.base_url()),
        _ if privacy.is_hidden() => CENSORED_STRING_MARK.to_string(),
        Some("option") if should_mask_node(doc, node, privacy) => CENSORED_STRING_MARK.to_string(),
        _ if should_mask_node(doc, node, privacy) => censor_text(text),
        _ => text.to_string(),
    };
    Some(value)
}
