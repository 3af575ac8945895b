//! # rewind-stream: Segment assembly and streaming compression
//!
//! Turns the record stream of a [`CaptureSession`] into compressed replay
//! segments handed to a [`Transport`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   Record    ┌───────────────────┐  Write/Flush  ┌──────────────┐
//! │ CaptureSession │ ──────────► │ SegmentCollection │ ────────────► │ worker task  │
//! │ (host driven)  │             │  └ Segment        │               │ (LZ4 frames) │
//! └────────────────┘             └─────────┬─────────┘ ◄──────────── └──────────────┘
//!                                          │            Wrote/Flushed
//!                                          ▼
//!                                   ┌────────────┐
//!                                   │ Transport  │
//!                                   └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: worker requests/responses and the response router
//! - [`worker`]: the compression task and `decompress`
//! - [`segment`]: one segment's streamed JSON document
//! - [`collection`]: segment lifecycle and rotation
//! - [`transport`]: transport and monitoring contracts
//! - [`config`]: recorder configuration
//! - [`session`]: the capture session

pub mod collection;
pub mod config;
pub mod protocol;
pub mod segment;
pub mod session;
pub mod transport;
pub mod worker;

// Re-exports for convenience
pub use collection::SegmentCollection;
pub use config::RecorderConfig;
pub use protocol::{
    ProtocolError, ResponseRouter, RouteOutcome, Routing, SegmentId, WorkerRequest,
    WorkerResponse,
};
pub use segment::{
    CreationReason, FlushReason, IdRef, Segment, SegmentContext, SegmentMetadata,
};
pub use session::CaptureSession;
pub use transport::{
    flatten_metadata, ChannelTransport, LogMonitor, Monitor, ReplayPayload, Transport,
};
pub use worker::{decompress, spawn_worker, CompressionError, CompressionWorker, WorkerHandle};
