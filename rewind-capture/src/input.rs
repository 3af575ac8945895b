//! Input state extraction with per-node deduplication.

use crate::privacy::{effective_level, should_mask_node};
use crate::registry::NodeRegistry;
use crate::serialize::{form_value, is_checkable};
use rewind_core::{Document, InputData, InputState, NodeId, NodeRef, Privacy};
use rustc_hash::FxHashMap;

/// Remembers the last state recorded for each control, along with the id
/// the control had when it was recorded.
#[derive(Default)]
pub struct InputTracker {
    last: FxHashMap<NodeRef, (NodeId, InputState)>,
}

impl InputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of `node` worth recording, or `None` when it must not be
    /// recorded or did not change since last time.
    pub fn capture(
        &mut self,
        doc: &Document,
        registry: &NodeRegistry,
        node: NodeRef,
        default_privacy: Privacy,
    ) -> Option<InputData> {
        let id = registry.id_of(node)?;
        let el = doc.element(node)?;
        if !matches!(el.tag_name.as_str(), "input" | "textarea" | "select") {
            return None;
        }
        let privacy = effective_level(doc, node, default_privacy);
        if privacy.is_hidden() {
            return None;
        }

        let state = if is_checkable(el) {
            if should_mask_node(doc, node, privacy) {
                return None;
            }
            InputState::Checked {
                is_checked: el.checked,
            }
        } else {
            InputState::Text {
                text: form_value(el, privacy)?,
            }
        };

        if self
            .last
            .get(&node)
            .is_some_and(|(last_id, last_state)| *last_id == id && *last_state == state)
        {
            return None;
        }
        self.last.insert(node, (id, state.clone()));
        Some(InputData { id, state })
    }

    /// Drop the state of controls that left the registry or were
    /// re-registered under a new id.
    pub fn prune(&mut self, registry: &NodeRegistry) {
        self.last
            .retain(|&node, (id, _)| registry.id_of(node) == Some(*id));
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}
