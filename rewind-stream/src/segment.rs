//! One replay segment: records streamed to the worker as a JSON document.
//!
//! ```text
//!  add_record ─▸ {"records":[REC₁ ─▸ ,REC₂ ─▸ … ─▸ ,RECₙ
//!  flush      ─▸ ],"start":…,"end":…,…,"index_in_view":k}\n
//! ```
//!
//! The opening and body go out as `Write` requests, the closing bracket and
//! metadata as the final `Flush`. Pointer samples are held back and written
//! as one coalesced PointerMove record.

use crate::protocol::{SegmentId, WorkerRequest};
use crate::worker::WorkerHandle;
use rewind_core::{MousePosition, PointerMoveData, Record, RecordData, RecordKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a segment was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationReason {
    Init,
    SegmentDurationLimit,
    SegmentBytesLimit,
    ViewChange,
    SessionRenewed,
    BeforeUnload,
    VisibilityHidden,
}

/// Why a segment was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    DurationLimit,
    BytesLimit,
    ViewChange,
    SessionRenewed,
    BeforeUnload,
    VisibilityHidden,
    Stop,
}

impl FlushReason {
    /// Creation reason of the segment that follows, `None` once stopped.
    pub fn next_creation_reason(self) -> Option<CreationReason> {
        Some(match self {
            Self::DurationLimit => CreationReason::SegmentDurationLimit,
            Self::BytesLimit => CreationReason::SegmentBytesLimit,
            Self::ViewChange => CreationReason::ViewChange,
            Self::SessionRenewed => CreationReason::SessionRenewed,
            Self::BeforeUnload => CreationReason::BeforeUnload,
            Self::VisibilityHidden => CreationReason::VisibilityHidden,
            Self::Stop => return None,
        })
    }

    /// The page is going away; transports should use a keep-alive send.
    pub fn is_page_exit(self) -> bool {
        matches!(self, Self::BeforeUnload | Self::VisibilityHidden)
    }
}

/// Application, session and view a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentContext {
    pub application_id: Uuid,
    pub session_id: Uuid,
    pub view_id: Uuid,
}

impl SegmentContext {
    pub fn new(application_id: Uuid, session_id: Uuid, view_id: Uuid) -> Self {
        Self {
            application_id,
            session_id,
            view_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    pub id: Uuid,
}

/// Metadata closing the segment document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    pub start: u64,
    pub end: u64,
    pub has_full_snapshot: bool,
    pub records_count: usize,
    pub creation_reason: CreationReason,
    pub application: IdRef,
    pub session: IdRef,
    pub view: IdRef,
    pub index_in_view: u32,
}

/// A pointer sample waiting to be coalesced.
#[derive(Debug, Clone, Copy)]
struct PendingSample {
    timestamp: u64,
    position: MousePosition,
}

/// A segment still accepting records.
#[derive(Debug)]
pub struct Segment {
    id: SegmentId,
    worker: WorkerHandle,
    metadata: SegmentMetadata,
    last_kind: Option<RecordKind>,
    pending_moves: Vec<PendingSample>,
    pointer_move_batch_size: usize,
    opened: bool,
}

impl Segment {
    pub fn new(
        id: SegmentId,
        worker: WorkerHandle,
        context: SegmentContext,
        creation_reason: CreationReason,
        index_in_view: u32,
        pointer_move_batch_size: usize,
    ) -> Self {
        Self {
            id,
            worker,
            metadata: SegmentMetadata {
                start: 0,
                end: 0,
                has_full_snapshot: false,
                records_count: 0,
                creation_reason,
                application: IdRef {
                    id: context.application_id,
                },
                session: IdRef {
                    id: context.session_id,
                },
                view: IdRef {
                    id: context.view_id,
                },
                index_in_view,
            },
            last_kind: None,
            pending_moves: Vec::new(),
            pointer_move_batch_size: pointer_move_batch_size.max(1),
            opened: false,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn metadata(&self) -> &SegmentMetadata {
        &self.metadata
    }

    /// No record has reached this segment yet.
    pub fn is_empty(&self) -> bool {
        !self.opened && self.pending_moves.is_empty()
    }

    pub fn add_record(&mut self, record: Record) {
        self.extend_time_range(&record);
        let kind = record.kind();
        if kind == RecordKind::FullSnapshot && self.last_kind == Some(RecordKind::Meta) {
            self.metadata.has_full_snapshot = true;
        }
        self.last_kind = Some(kind);

        match record.data {
            RecordData::PointerMove(data) => {
                self.pending_moves
                    .extend(data.positions.into_iter().map(|position| PendingSample {
                        timestamp: offset_timestamp(record.timestamp, position.time_offset),
                        position,
                    }));
                if self.pending_moves.len() >= self.pointer_move_batch_size {
                    self.write_pending_moves();
                }
            }
            data => self.write_record(&Record::new(record.timestamp, data)),
        }
    }

    /// Close the segment and post its final bytes. Returns the metadata the
    /// flushed payload will carry.
    pub fn flush(mut self, reason: FlushReason) -> SegmentMetadata {
        self.write_pending_moves();
        let prefix = if self.opened { "]," } else { "{\"records\":[]," };
        let metadata = match serde_json::to_string(&self.metadata) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Segment {} metadata not serializable: {e}", self.id);
                "{}".to_string()
            }
        };
        let mut data = String::with_capacity(prefix.len() + metadata.len() + 1);
        data.push_str(prefix);
        data.push_str(metadata.strip_prefix('{').unwrap_or(metadata.as_str()));
        data.push('\n');

        log::debug!(
            "Flushing segment {} ({:?}, {} records)",
            self.id,
            reason,
            self.metadata.records_count
        );
        self.post(WorkerRequest::Flush { id: self.id, data });
        self.metadata
    }

    fn extend_time_range(&mut self, record: &Record) {
        let (start, end) = record.time_range();
        if self.is_empty() {
            self.metadata.start = start;
            self.metadata.end = end;
        } else {
            self.metadata.start = self.metadata.start.min(start);
            self.metadata.end = self.metadata.end.max(end);
        }
    }

    fn write_pending_moves(&mut self) {
        let Some(last) = self.pending_moves.last().map(|s| s.timestamp) else {
            return;
        };
        let positions = self
            .pending_moves
            .drain(..)
            .map(|sample| MousePosition {
                time_offset: sample.timestamp as i64 - last as i64,
                ..sample.position
            })
            .collect();
        let record = Record::new(last, RecordData::PointerMove(PointerMoveData { positions }));
        self.write_record(&record);
    }

    fn write_record(&mut self, record: &Record) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Dropping unserializable {:?} record: {e}", record.kind());
                return;
            }
        };
        let data = if self.opened {
            format!(",{json}")
        } else {
            self.opened = true;
            format!("{{\"records\":[{json}")
        };
        self.metadata.records_count += 1;
        self.post(WorkerRequest::Write { id: self.id, data });
    }

    fn post(&self, request: WorkerRequest) {
        if let Err(e) = self.worker.post(request) {
            log::warn!("{e}");
        }
    }
}

fn offset_timestamp(timestamp: u64, offset: i64) -> u64 {
    if offset < 0 {
        timestamp.saturating_sub(offset.unsigned_abs())
    } else {
        timestamp.saturating_add(offset as u64)
    }
}
