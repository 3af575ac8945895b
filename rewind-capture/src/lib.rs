//! # rewind-capture: Snapshot and mutation capture
//!
//! ```text
//!              ┌──────────────┐
//!  Document ──►│  serialize   │──► SerializedNodeWithId (full snapshot)
//!      │       └──────┬───────┘
//!      │              │ ids            ┌──────────────┐
//!      │       ┌──────▼───────┐        │   privacy    │
//!      │       │   registry   │◄───────┤ (classifier) │
//!      │       └──────▲───────┘        └──────────────┘
//!      │              │
//!      └─ RawMutation ┴──► mutation ──► MutationData (incremental)
//! ```
//!
//! ## Modules
//!
//! - [`registry`]: `NodeRef` ↔ `NodeId` side-table
//! - [`privacy`]: effective privacy resolution and masking helpers
//! - [`url_rewrite`]: URL absolution for attributes and CSS
//! - [`serialize`]: privacy-filtered snapshot serializer
//! - [`mutation`]: incremental change-set tracker
//! - [`input`]: form input extraction and deduplication

mod deferred;
pub mod input;
pub mod mutation;
pub mod privacy;
pub mod registry;
pub mod serialize;
pub mod url_rewrite;

pub use input::InputTracker;
pub use mutation::MutationTracker;
pub use privacy::{effective_level, self_level, PrivacyCache};
pub use registry::{Lookup, NodeRegistry};
pub use serialize::{serialize_document, serialize_node_with_id, SerializeContext};
