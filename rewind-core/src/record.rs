//! Replay records and serialized node graph.
//!
//! Everything here is plain data: immutable once built and serialized with
//! serde into the JSON shape a replay player consumes.
//!
//! ```text
//! Record { timestamp, type, data }
//!   ├─ meta               { href, width, height }
//!   ├─ full_snapshot      { node: SerializedNodeWithId, initialOffset }
//!   ├─ incremental_change { adds, removes, texts, attributes }
//!   ├─ pointer_move       { positions: [{ x, y, id, timeOffset }] }
//!   ├─ mouse_interaction  { type, id, x, y }
//!   ├─ input              { id, text | isChecked }
//!   ├─ scroll             { id, x, y }
//!   ├─ viewport_resize    { width, height }
//!   ├─ focus              { has_focus }
//!   ├─ view_end
//!   └─ custom             { tag, payload }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ───────────────────────────────────────────────────────────────────
// Serialized nodes
// ───────────────────────────────────────────────────────────────────

/// Stable identifier of a captured node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Flag(bool),
    Text(String),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Flag(_) => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SerializedNode {
    Document {
        child_nodes: Vec<SerializedNodeWithId>,
    },
    DocumentType {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        tag_name: String,
        attributes: Attributes,
        child_nodes: Vec<SerializedNodeWithId>,
    },
    Text {
        text_content: String,
    },
    #[serde(rename = "cdata")]
    CData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNodeWithId {
    pub id: NodeId,
    #[serde(flatten)]
    pub node: SerializedNode,
}

impl SerializedNodeWithId {
    pub fn children(&self) -> &[SerializedNodeWithId] {
        match &self.node {
            SerializedNode::Document { child_nodes } | SerializedNode::Element { child_nodes, .. } => {
                child_nodes
            }
            _ => &[],
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match &self.node {
            SerializedNode::Element { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    pub fn tag_name(&self) -> Option<&str> {
        match &self.node {
            SerializedNode::Element { tag_name, .. } => Some(tag_name),
            _ => None,
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        match &self.node {
            SerializedNode::Text { text_content } => Some(text_content),
            _ => None,
        }
    }

    /// Ids of this node and all serialized descendants, pre-order.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(n) = stack.pop() {
            out.push(n.id);
            stack.extend(n.children().iter().rev());
        }
        out
    }
}

// ───────────────────────────────────────────────────────────────────
// Record payloads
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    pub href: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollOffset {
    pub top: f64,
    pub left: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSnapshotData {
    pub node: SerializedNodeWithId,
    pub initial_offset: ScrollOffset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedNodeMutation {
    pub parent_id: NodeId,
    pub next_id: Option<NodeId>,
    pub node: SerializedNodeWithId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedNodeMutation {
    pub parent_id: NodeId,
    pub id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMutation {
    pub id: NodeId,
    pub value: String,
}

/// Attribute updates for one node; `None` means the attribute was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMutation {
    pub id: NodeId,
    pub attributes: BTreeMap<String, Option<String>>,
}

/// One incremental change-set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationData {
    pub adds: Vec<AddedNodeMutation>,
    pub removes: Vec<RemovedNodeMutation>,
    pub texts: Vec<TextMutation>,
    pub attributes: Vec<AttributeMutation>,
}

impl MutationData {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.removes.is_empty()
            && self.texts.is_empty()
            && self.attributes.is_empty()
    }
}

/// A pointer sample; `time_offset` is relative to the record timestamp (≤ 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MousePosition {
    pub x: f64,
    pub y: f64,
    pub id: NodeId,
    pub time_offset: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerMoveData {
    pub positions: Vec<MousePosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseInteractionKind {
    MouseUp,
    MouseDown,
    Click,
    ContextMenu,
    DblClick,
    Focus,
    Blur,
    TouchStart,
    TouchEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseInteractionData {
    #[serde(rename = "type")]
    pub kind: MouseInteractionKind,
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputState {
    Text {
        text: String,
    },
    Checked {
        #[serde(rename = "isChecked")]
        is_checked: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputData {
    pub id: NodeId,
    #[serde(flatten)]
    pub state: InputState,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollData {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportResizeData {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusData {
    pub has_focus: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomData {
    pub tag: String,
    pub payload: Value,
}

// ───────────────────────────────────────────────────────────────────
// Records
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RecordData {
    Meta(MetaData),
    FullSnapshot(FullSnapshotData),
    IncrementalChange(MutationData),
    PointerMove(PointerMoveData),
    MouseInteraction(MouseInteractionData),
    Input(InputData),
    Scroll(ScrollData),
    ViewportResize(ViewportResizeData),
    Focus(FocusData),
    ViewEnd,
    Custom(CustomData),
}

/// Discriminant of [`RecordData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Meta,
    FullSnapshot,
    IncrementalChange,
    PointerMove,
    MouseInteraction,
    Input,
    Scroll,
    ViewportResize,
    Focus,
    ViewEnd,
    Custom,
}

/// A timestamped replay record (milliseconds since the epoch).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub timestamp: u64,
    #[serde(flatten)]
    pub data: RecordData,
}

impl Record {
    pub fn new(timestamp: u64, data: RecordData) -> Self {
        Self { timestamp, data }
    }

    pub fn meta(timestamp: u64, href: impl Into<String>, width: u32, height: u32) -> Self {
        Self::new(
            timestamp,
            RecordData::Meta(MetaData {
                href: href.into(),
                width,
                height,
            }),
        )
    }

    pub fn full_snapshot(timestamp: u64, node: SerializedNodeWithId, offset: ScrollOffset) -> Self {
        Self::new(
            timestamp,
            RecordData::FullSnapshot(FullSnapshotData {
                node,
                initial_offset: offset,
            }),
        )
    }

    pub fn incremental(timestamp: u64, data: MutationData) -> Self {
        Self::new(timestamp, RecordData::IncrementalChange(data))
    }

    pub fn focus(timestamp: u64, has_focus: bool) -> Self {
        Self::new(timestamp, RecordData::Focus(FocusData { has_focus }))
    }

    /// Single-sample pointer move at `timestamp`.
    pub fn pointer_move(timestamp: u64, id: NodeId, x: f64, y: f64) -> Self {
        Self::new(
            timestamp,
            RecordData::PointerMove(PointerMoveData {
                positions: vec![MousePosition {
                    x,
                    y,
                    id,
                    time_offset: 0,
                }],
            }),
        )
    }

    pub fn custom(timestamp: u64, tag: impl Into<String>, payload: Value) -> Self {
        Self::new(
            timestamp,
            RecordData::Custom(CustomData {
                tag: tag.into(),
                payload,
            }),
        )
    }

    pub fn kind(&self) -> RecordKind {
        match &self.data {
            RecordData::Meta(_) => RecordKind::Meta,
            RecordData::FullSnapshot(_) => RecordKind::FullSnapshot,
            RecordData::IncrementalChange(_) => RecordKind::IncrementalChange,
            RecordData::PointerMove(_) => RecordKind::PointerMove,
            RecordData::MouseInteraction(_) => RecordKind::MouseInteraction,
            RecordData::Input(_) => RecordKind::Input,
            RecordData::Scroll(_) => RecordKind::Scroll,
            RecordData::ViewportResize(_) => RecordKind::ViewportResize,
            RecordData::Focus(_) => RecordKind::Focus,
            RecordData::ViewEnd => RecordKind::ViewEnd,
            RecordData::Custom(_) => RecordKind::Custom,
        }
    }

    /// Earliest and latest instants covered by this record.
    ///
    /// Pointer moves reach back to their first sample.
    pub fn time_range(&self) -> (u64, u64) {
        match &self.data {
            RecordData::PointerMove(data) => {
                let earliest = data
                    .positions
                    .iter()
                    .map(|p| p.time_offset)
                    .min()
                    .unwrap_or(0)
                    .min(0);
                let start = self.timestamp.saturating_sub(earliest.unsigned_abs());
                (start, self.timestamp)
            }
            _ => (self.timestamp, self.timestamp),
        }
    }
}
