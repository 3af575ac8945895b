//! Message protocol between the capture side and the compression worker.
//!
//! ```text
//!  capture ── Write{id, data}* ── Flush{id, data} ──►  worker
//!  capture ◄── Wrote{id, …}*  ─── Flushed{id, …}  ───  worker
//!                               └─ Errored{id, …}
//! ```
//!
//! Requests for one segment are strictly ordered (writes, then one flush)
//! and segments are handled one after the other, so responses arrive in
//! ascending id order. The [`ResponseRouter`] relies on that: a response
//! for a later segment means every earlier listener has lost its answer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Monotonically increasing segment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request posted to the compression worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRequest {
    /// Append bytes to the segment's stream
    Write { id: SegmentId, data: String },
    /// Append final bytes and close the stream
    Flush { id: SegmentId, data: String },
}

impl WorkerRequest {
    pub fn id(&self) -> SegmentId {
        match self {
            Self::Write { id, .. } | Self::Flush { id, .. } => *id,
        }
    }
}

/// Response sent back by the compression worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerResponse {
    /// Running compressed size of the stream after a write
    Wrote {
        id: SegmentId,
        compressed_bytes_count: usize,
        additional_bytes_count: usize,
    },
    /// Complete compressed segment
    Flushed {
        id: SegmentId,
        result: Vec<u8>,
        raw_bytes_count: usize,
        additional_bytes_count: usize,
    },
    /// The worker could not process a request for this segment
    Errored { id: SegmentId, message: String },
}

impl WorkerResponse {
    pub fn id(&self) -> SegmentId {
        match self {
            Self::Wrote { id, .. } | Self::Flushed { id, .. } | Self::Errored { id, .. } => *id,
        }
    }

    /// Terminal responses end a listener's life.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Wrote { .. })
    }
}

// ───────────────────────────────────────────────────────────────────
// Routing
// ───────────────────────────────────────────────────────────────────

/// What a routed response means for its listener.
#[derive(Debug)]
pub enum RouteOutcome<L> {
    Wrote {
        id: SegmentId,
        compressed_bytes_count: usize,
        additional_bytes_count: usize,
    },
    Flushed {
        id: SegmentId,
        listener: L,
        result: Vec<u8>,
        raw_bytes_count: usize,
        additional_bytes_count: usize,
    },
    Errored {
        id: SegmentId,
        listener: L,
        message: String,
    },
    /// Nobody waits for this id any more
    Unrouted(WorkerResponse),
}

/// Result of routing one response.
#[derive(Debug)]
pub struct Routing<L> {
    /// Listeners whose terminal response will never come, ascending
    pub lost: Vec<(SegmentId, L)>,
    pub outcome: RouteOutcome<L>,
}

/// One listener per segment id, each carrying caller state `L`.
#[derive(Debug)]
pub struct ResponseRouter<L> {
    listeners: BTreeMap<SegmentId, L>,
}

impl<L> Default for ResponseRouter<L> {
    fn default() -> Self {
        Self {
            listeners: BTreeMap::new(),
        }
    }
}

impl<L> ResponseRouter<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: SegmentId, listener: L) {
        self.listeners.insert(id, listener);
    }

    pub fn listener_mut(&mut self, id: SegmentId) -> Option<&mut L> {
        self.listeners.get_mut(&id)
    }

    pub fn is_listening(&self, id: SegmentId) -> bool {
        self.listeners.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Dispatch `response`, tearing down every listener older than it.
    pub fn route(&mut self, response: WorkerResponse) -> Routing<L> {
        let id = response.id();
        let mut lost = Vec::new();
        while let Some(entry) = self.listeners.first_entry() {
            if *entry.key() >= id {
                break;
            }
            lost.push(entry.remove_entry());
        }

        let outcome = match response {
            WorkerResponse::Wrote {
                id,
                compressed_bytes_count,
                additional_bytes_count,
            } if self.listeners.contains_key(&id) => RouteOutcome::Wrote {
                id,
                compressed_bytes_count,
                additional_bytes_count,
            },
            WorkerResponse::Flushed {
                id,
                result,
                raw_bytes_count,
                additional_bytes_count,
            } => match self.listeners.remove(&id) {
                Some(listener) => RouteOutcome::Flushed {
                    id,
                    listener,
                    result,
                    raw_bytes_count,
                    additional_bytes_count,
                },
                None => RouteOutcome::Unrouted(WorkerResponse::Flushed {
                    id,
                    result,
                    raw_bytes_count,
                    additional_bytes_count,
                }),
            },
            WorkerResponse::Errored { id, message } => match self.listeners.remove(&id) {
                Some(listener) => RouteOutcome::Errored { id, listener, message },
                None => RouteOutcome::Unrouted(WorkerResponse::Errored { id, message }),
            },
            other => RouteOutcome::Unrouted(other),
        };
        Routing { lost, outcome }
    }
}

// ───────────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────────

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Compression worker gone (segment {0})")]
    WorkerGone(SegmentId),
}
