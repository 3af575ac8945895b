//! # rewind-core: Shared vocabulary for session replay capture
//!
//! ```text
//! ┌──────────────┐  RawMutation   ┌────────────────┐   Record    ┌───────────────┐
//! │ dom::Document│ ─────────────► │ rewind-capture │ ──────────► │ rewind-stream │
//! │ (host tree)  │                │ (snapshot/diff)│             │ (segments)    │
//! └──────────────┘                └────────────────┘             └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`dom`]: arena-backed host document with an observer queue
//! - [`privacy`]: privacy levels, markup tokens and the inheritance rule
//! - [`record`]: replay records and the serialized node graph

pub mod dom;
pub mod privacy;
pub mod record;

pub use dom::{Document, DomError, ElementData, NodeData, NodeRef, RawMutation, Rect, StyleSheet};
pub use privacy::{Privacy, PrivacyLevel, PRIVACY_ATTR_NAME, PRIVACY_CLASS_PREFIX};
pub use record::{
    AddedNodeMutation, AttributeMutation, AttributeValue, Attributes, CustomData, FocusData,
    FullSnapshotData, InputData, InputState, MetaData, MouseInteractionData, MouseInteractionKind,
    MousePosition, MutationData, NodeId, PointerMoveData, Record, RecordData, RecordKind,
    RemovedNodeMutation, ScrollData, ScrollOffset, SerializedNode, SerializedNodeWithId,
    TextMutation, ViewportResizeData,
};
