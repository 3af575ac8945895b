//! Privacy classifier.
//!
//! Resolves the effective [`Privacy`] of any node from markup hints and its
//! ancestors. Everything here is total: malformed tokens count as "not set",
//! unknown handles resolve to the default.
//!
//! ```text
//!  root ─ default ──reconcile──▸ html ──reconcile──▸ … ──reconcile──▸ node
//!                    (own)                 (own)                 (own)
//! ```

use rewind_core::privacy::reconcile;
use rewind_core::{
    Document, ElementData, NodeData, NodeRef, Privacy, PrivacyLevel, PRIVACY_ATTR_NAME,
    PRIVACY_CLASS_PREFIX,
};
use rustc_hash::FxHashMap;

/// Replacement for masked values.
pub const CENSORED_STRING_MARK: &str = "***";

/// 1×1 transparent GIF standing in for masked images of unknown size.
pub const CENSORED_IMG_MARK: &str =
    "data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

/// Filler glyph used by [`censor_text`].
pub const TEXT_MASKING_CHAR: char = 'x';

// ---------------------------------------------------------------
// Self level
// ---------------------------------------------------------------

/// The node's own explicit privacy, if its markup declares one.
pub fn self_level(doc: &Document, node: NodeRef) -> Option<Privacy> {
    let el = doc.element(node)?;

    if el.tag_name == "base" {
        return Some(Privacy::ALLOW);
    }

    let declared = declared_privacy(el);
    if declared.is_some_and(|p| p.level() == PrivacyLevel::Hidden) {
        return declared;
    }

    if el.tag_name == "input" {
        let input_type = el.lower_attribute("type");
        if matches!(input_type.as_str(), "password" | "email" | "tel" | "hidden") {
            return Some(Privacy::MASK);
        }
        let autocomplete = el.lower_attribute("autocomplete");
        if autocomplete.starts_with("cc-") || autocomplete.ends_with("-password") {
            return Some(Privacy::MASK);
        }
    }

    if declared.is_some() {
        return declared;
    }

    if should_ignore_element(el) {
        return Some(Privacy::IGNORE);
    }
    None
}

/// Privacy declared through the privacy attribute, then the class list.
fn declared_privacy(el: &ElementData) -> Option<Privacy> {
    if let Some(privacy) = el.attribute(PRIVACY_ATTR_NAME).and_then(Privacy::parse_token) {
        return Some(privacy);
    }
    el.class_list()
        .filter_map(|class| class.strip_prefix(PRIVACY_CLASS_PREFIX))
        .filter_map(Privacy::parse_token)
        .max_by_key(|p| (p.is_sealed(), p.level()))
}

// ---------------------------------------------------------------
// Effective level
// ---------------------------------------------------------------

/// Effective privacy of `node`, walking every ancestor.
pub fn effective_level(doc: &Document, node: NodeRef, default: Privacy) -> Privacy {
    let mut chain = Vec::new();
    let mut current = Some(node);
    while let Some(n) = current {
        chain.push(n);
        current = doc.parent(n);
    }
    chain
        .iter()
        .rev()
        .fold(default, |inherited, &n| reconcile(inherited, self_level(doc, n)))
}

/// Memoised effective levels, valid for one observation cycle.
pub struct PrivacyCache {
    default: Privacy,
    levels: FxHashMap<NodeRef, Privacy>,
}

impl PrivacyCache {
    pub fn new(default: Privacy) -> Self {
        Self {
            default,
            levels: FxHashMap::default(),
        }
    }

    /// Like [`effective_level`] but stops at the first cached ancestor.
    pub fn level(&mut self, doc: &Document, node: NodeRef) -> Privacy {
        let mut chain = Vec::new();
        let mut inherited = self.default;
        let mut current = Some(node);
        while let Some(n) = current {
            if let Some(&cached) = self.levels.get(&n) {
                inherited = cached;
                break;
            }
            chain.push(n);
            current = doc.parent(n);
        }
        for &n in chain.iter().rev() {
            inherited = reconcile(inherited, self_level(doc, n));
            self.levels.insert(n, inherited);
        }
        inherited
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}

// ---------------------------------------------------------------
// Helpers shared by serializer and tracker
// ---------------------------------------------------------------

/// Non-content elements that are never captured.
pub fn should_ignore_element(el: &ElementData) -> bool {
    match el.tag_name.as_str() {
        "script" => true,
        "link" => {
            let rel = el.lower_attribute("rel");
            let preloads_script = (rel.contains("preload") || rel.contains("prefetch"))
                && el.lower_attribute("as") == "script";
            preloads_script || rel == "shortcut icon" || rel == "icon"
        }
        "meta" => {
            let name = el.lower_attribute("name");
            let rel = el.lower_attribute("rel");
            let property = el.lower_attribute("property");
            let favicon = name == "msapplication-tileimage"
                || name == "msapplication-tilecolor"
                || name == "application-name"
                || matches!(rel.as_str(), "icon" | "apple-touch-icon" | "shortcut icon");
            let description = name == "keywords" || name == "description";
            let social = ["og:", "twitter:", "fb:"].iter().any(|p| property.starts_with(p))
                || ["og:", "twitter:"].iter().any(|p| name.starts_with(p))
                || name == "pinterest";
            let robots = matches!(name.as_str(), "robots" | "googlebot" | "bingbot");
            let authorship = matches!(
                name.as_str(),
                "author" | "generator" | "framework" | "publisher" | "progid"
            ) || property.starts_with("article:")
                || property.starts_with("product:");
            let verification = matches!(
                name.as_str(),
                "google-site-verification"
                    | "yandex-verification"
                    | "csrf-token"
                    | "p:domain_verify"
                    | "verify-v1"
                    | "verification"
                    | "shopify-checkout-api-token"
            );
            favicon
                || description
                || social
                || robots
                || el.has_attribute("http-equiv")
                || authorship
                || verification
        }
        _ => false,
    }
}

pub fn is_form_element(doc: &Document, node: NodeRef) -> bool {
    matches!(
        doc.tag_name(node),
        Some("input" | "output" | "textarea" | "select" | "option" | "datalist" | "optgroup")
    )
}

/// Whether `node`'s content must be masked at the given privacy.
pub fn should_mask_node(doc: &Document, node: NodeRef, privacy: Privacy) -> bool {
    use rewind_core::PrivacyLevel::*;
    match privacy.level() {
        Mask | Hidden | Ignore => true,
        MaskFormsOnly => match doc.data(node) {
            Some(NodeData::Text(_)) => doc
                .parent(node)
                .is_some_and(|parent| is_form_element(doc, parent)),
            _ => is_form_element(doc, node),
        },
        Allow => false,
    }
}

/// Replace every non-whitespace char with [`TEXT_MASKING_CHAR`].
pub fn censor_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_whitespace() { c } else { TEXT_MASKING_CHAR })
        .collect()
}
