//! Segment collection: decides when segments open and close, and turns
//! worker responses into transport sends and monitoring events.
//!
//! ```text
//!                    record                       flush(reason)
//!  WaitingForInitial ──────► SegmentPending ─────────────────► WaitingForInitial
//!         ▲                       │  ▲ record                   (next reason)
//!         │                       └──┘
//!         └────────── flush(stop) from any state ─────────────► Stopped
//! ```

use crate::config::RecorderConfig;
use crate::protocol::{ResponseRouter, RouteOutcome, SegmentId, WorkerResponse};
use crate::segment::{CreationReason, FlushReason, Segment, SegmentContext, SegmentMetadata};
use crate::transport::{flatten_metadata, Monitor, ReplayPayload, Transport};
use crate::worker::WorkerHandle;
use rewind_core::Record;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

enum CollectionState {
    WaitingForInitialRecord {
        next_creation_reason: CreationReason,
    },
    SegmentPending {
        segment: Segment,
        expires_at: u64,
    },
    Stopped,
}

/// Per-segment state kept until the worker's terminal response.
#[derive(Debug, Default)]
struct SegmentListener {
    flushed: Option<FlushedSegment>,
}

#[derive(Debug)]
struct FlushedSegment {
    metadata: SegmentMetadata,
    page_exit: bool,
}

pub struct SegmentCollection {
    state: CollectionState,
    context: Option<SegmentContext>,
    worker: WorkerHandle,
    router: ResponseRouter<SegmentListener>,
    next_segment_id: SegmentId,
    /// Current view and the number of segments it has opened
    view_index: Option<(Uuid, u32)>,
    endpoint: String,
    duration_limit_ms: u64,
    bytes_limit: usize,
    pointer_move_batch_size: usize,
    transport: Arc<dyn Transport>,
    monitor: Arc<dyn Monitor>,
}

impl SegmentCollection {
    pub fn new(
        config: &RecorderConfig,
        worker: WorkerHandle,
        transport: Arc<dyn Transport>,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            state: CollectionState::WaitingForInitialRecord {
                next_creation_reason: CreationReason::Init,
            },
            context: None,
            worker,
            router: ResponseRouter::new(),
            next_segment_id: SegmentId(0),
            view_index: None,
            endpoint: config.endpoint.clone(),
            duration_limit_ms: config.segment_duration_limit_ms,
            bytes_limit: config.segment_bytes_limit,
            pointer_move_batch_size: config.pointer_move_batch_size,
            transport,
            monitor,
        }
    }

    pub fn set_context(&mut self, context: SegmentContext) {
        self.context = Some(context);
    }

    pub fn context(&self) -> Option<SegmentContext> {
        self.context
    }

    pub fn current_segment_id(&self) -> Option<SegmentId> {
        match &self.state {
            CollectionState::SegmentPending { segment, .. } => Some(segment.id()),
            _ => None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, CollectionState::Stopped)
    }

    /// Segments still waiting for a terminal worker response.
    pub fn pending_responses(&self) -> usize {
        self.router.len()
    }

    pub fn add_record(&mut self, record: Record) {
        let Some(context) = self.context else {
            log::debug!("Dropping {:?} record: no view context", record.kind());
            return;
        };
        if let CollectionState::SegmentPending { expires_at, .. } = self.state {
            if record.timestamp >= expires_at {
                self.flush(FlushReason::DurationLimit);
            }
        }

        let reason = match &mut self.state {
            CollectionState::Stopped => return,
            CollectionState::SegmentPending { segment, .. } => {
                segment.add_record(record);
                return;
            }
            CollectionState::WaitingForInitialRecord {
                next_creation_reason,
            } => *next_creation_reason,
        };
        let expires_at = record.timestamp.saturating_add(self.duration_limit_ms);
        let mut segment = self.open_segment(context, reason);
        segment.add_record(record);
        self.state = CollectionState::SegmentPending {
            segment,
            expires_at,
        };
    }

    /// Rotate on elapsed time.
    pub fn tick(&mut self, now: u64) {
        if let CollectionState::SegmentPending { expires_at, .. } = self.state {
            if now >= expires_at {
                self.flush(FlushReason::DurationLimit);
            }
        }
    }

    /// Close the pending segment, if any. The next record opens a segment
    /// tagged with the matching creation reason; after `Stop` nothing does.
    pub fn flush(&mut self, reason: FlushReason) {
        let previous = std::mem::replace(&mut self.state, CollectionState::Stopped);
        if let CollectionState::Stopped = previous {
            return;
        }
        if let CollectionState::SegmentPending { segment, .. } = previous {
            let id = segment.id();
            let metadata = segment.flush(reason);
            if let Some(listener) = self.router.listener_mut(id) {
                listener.flushed = Some(FlushedSegment {
                    metadata,
                    page_exit: reason.is_page_exit(),
                });
            }
        }
        if let Some(next_creation_reason) = reason.next_creation_reason() {
            self.state = CollectionState::WaitingForInitialRecord {
                next_creation_reason,
            };
        }
    }

    pub fn stop(&mut self) {
        self.flush(FlushReason::Stop);
    }

    pub fn handle_response(&mut self, response: WorkerResponse) {
        let routing = self.router.route(response);
        for (id, _) in routing.lost {
            self.monitor
                .debug("Segment compression response lost", json!({ "segment_id": id }));
        }

        match routing.outcome {
            RouteOutcome::Wrote {
                id,
                compressed_bytes_count,
                ..
            } => {
                if self.current_segment_id() == Some(id)
                    && compressed_bytes_count > self.bytes_limit
                {
                    self.flush(FlushReason::BytesLimit);
                }
            }
            RouteOutcome::Flushed {
                id,
                listener,
                result,
                raw_bytes_count,
                ..
            } => match listener.flushed {
                Some(flushed) => self.deliver(flushed, result, raw_bytes_count),
                None => log::debug!("Segment {id} flushed without metadata"),
            },
            RouteOutcome::Errored { id, message, .. } => {
                self.monitor.debug(
                    "Segment compression failed",
                    json!({ "segment_id": id, "message": message }),
                );
            }
            RouteOutcome::Unrouted(response) => {
                log::debug!("No listener for segment {} response", response.id());
            }
        }
    }

    fn open_segment(&mut self, context: SegmentContext, reason: CreationReason) -> Segment {
        let id = self.next_segment_id;
        self.next_segment_id = id.next();

        let index_in_view = match &mut self.view_index {
            Some((view, count)) if *view == context.view_id => {
                *count += 1;
                *count - 1
            }
            slot => {
                *slot = Some((context.view_id, 1));
                0
            }
        };

        self.router.register(id, SegmentListener::default());
        Segment::new(
            id,
            self.worker.clone(),
            context,
            reason,
            index_in_view,
            self.pointer_move_batch_size,
        )
    }

    fn deliver(&self, flushed: FlushedSegment, result: Vec<u8>, raw_bytes_count: usize) {
        let mut metadata = match serde_json::to_value(&flushed.metadata) {
            Ok(value) => flatten_metadata(&value),
            Err(e) => {
                log::warn!("Segment metadata not serializable: {e}");
                return;
            }
        };
        metadata.insert("raw_segment_size".into(), Value::from(raw_bytes_count));
        metadata.insert("compressed_segment_size".into(), Value::from(result.len()));
        self.transport.send(
            &self.endpoint,
            ReplayPayload {
                data: result,
                metadata,
                raw_size: raw_bytes_count,
                page_exit: flushed.page_exit,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WorkerRequest;
    use crate::transport::ChannelTransport;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingMonitor {
        events: Mutex<Vec<String>>,
    }

    impl Monitor for RecordingMonitor {
        fn debug(&self, message: &str, _context: Value) {
            self.events.lock().unwrap().push(message.to_string());
        }
    }

    struct Harness {
        collection: SegmentCollection,
        requests: mpsc::UnboundedReceiver<WorkerRequest>,
        payloads: mpsc::UnboundedReceiver<(String, ReplayPayload)>,
        monitor: Arc<RecordingMonitor>,
    }

    impl Harness {
        fn new(config: RecorderConfig) -> Self {
            let (tx, requests) = mpsc::unbounded_channel();
            let (transport, payloads) = ChannelTransport::new();
            let monitor = Arc::new(RecordingMonitor::default());
            let mut collection = SegmentCollection::new(
                &config,
                WorkerHandle::from_sender(tx),
                Arc::new(transport),
                monitor.clone(),
            );
            collection.set_context(context(1));
            Self {
                collection,
                requests,
                payloads,
                monitor,
            }
        }

        fn flush_requests(&mut self) -> Vec<(SegmentId, String)> {
            let mut out = Vec::new();
            while let Ok(request) = self.requests.try_recv() {
                if let WorkerRequest::Flush { id, data } = request {
                    out.push((id, data));
                }
            }
            out
        }
    }

    fn context(view: u128) -> SegmentContext {
        SegmentContext::new(Uuid::from_u128(7), Uuid::from_u128(8), Uuid::from_u128(view))
    }

    fn flushed(id: u64) -> WorkerResponse {
        WorkerResponse::Flushed {
            id: SegmentId(id),
            result: vec![0xAB; 4],
            raw_bytes_count: 40,
            additional_bytes_count: 10,
        }
    }

    #[test]
    fn test_first_record_opens_segment() {
        let mut h = Harness::new(RecorderConfig::default());
        assert_eq!(h.collection.current_segment_id(), None);
        h.collection.add_record(Record::focus(1, true));
        assert_eq!(h.collection.current_segment_id(), Some(SegmentId(0)));
        assert_eq!(h.collection.pending_responses(), 1);
    }

    #[test]
    fn test_records_without_context_are_dropped() {
        let config = RecorderConfig::default();
        let (tx, mut requests) = mpsc::unbounded_channel();
        let (transport, _payloads) = ChannelTransport::new();
        let mut collection = SegmentCollection::new(
            &config,
            WorkerHandle::from_sender(tx),
            Arc::new(transport),
            Arc::new(RecordingMonitor::default()),
        );
        collection.add_record(Record::focus(1, true));
        assert_eq!(collection.current_segment_id(), None);
        assert!(requests.try_recv().is_err());
    }

    #[test]
    fn test_explicit_flush_sets_next_creation_reason() {
        let mut h = Harness::new(RecorderConfig::default());
        h.collection.add_record(Record::focus(1, true));
        h.collection.flush(FlushReason::ViewChange);
        assert_eq!(h.collection.current_segment_id(), None);

        h.collection.add_record(Record::focus(2, true));
        h.collection.flush(FlushReason::Stop);
        let flushes = h.flush_requests();
        assert_eq!(flushes.len(), 2);
        assert!(flushes[0].1.contains("\"creation_reason\":\"init\""));
        assert!(flushes[1].1.contains("\"creation_reason\":\"view_change\""));
        assert!(flushes[1].1.contains("\"index_in_view\":1"));
    }

    #[test]
    fn test_records_after_stop_are_ignored() {
        let mut h = Harness::new(RecorderConfig::default());
        h.collection.stop();
        assert!(h.collection.is_stopped());
        h.collection.add_record(Record::focus(1, true));
        assert_eq!(h.collection.current_segment_id(), None);
        h.collection.flush(FlushReason::ViewChange);
        assert!(h.collection.is_stopped());
    }

    #[test]
    fn test_duration_limit_rotates_on_tick_and_on_arrival() {
        let config = RecorderConfig {
            segment_duration_limit_ms: 100,
            ..RecorderConfig::default()
        };
        let mut h = Harness::new(config);
        h.collection.add_record(Record::focus(1_000, true));
        h.collection.tick(1_099);
        assert_eq!(h.collection.current_segment_id(), Some(SegmentId(0)));
        h.collection.tick(1_100);
        assert_eq!(h.collection.current_segment_id(), None);

        h.collection.add_record(Record::focus(2_000, true));
        h.collection.add_record(Record::focus(2_100, true));
        assert_eq!(h.collection.current_segment_id(), Some(SegmentId(2)));

        let flushes = h.flush_requests();
        assert_eq!(flushes.len(), 2);
        assert!(flushes[1].1.contains("\"creation_reason\":\"segment_duration_limit\""));
    }

    #[test]
    fn test_byte_limit_rotates_current_segment_only() {
        let config = RecorderConfig {
            segment_bytes_limit: 100,
            ..RecorderConfig::default()
        };
        let mut h = Harness::new(config);
        h.collection.add_record(Record::focus(1, true));
        h.collection.handle_response(WorkerResponse::Wrote {
            id: SegmentId(0),
            compressed_bytes_count: 100,
            additional_bytes_count: 10,
        });
        assert_eq!(h.collection.current_segment_id(), Some(SegmentId(0)));
        h.collection.handle_response(WorkerResponse::Wrote {
            id: SegmentId(0),
            compressed_bytes_count: 101,
            additional_bytes_count: 10,
        });
        assert_eq!(h.collection.current_segment_id(), None);

        h.collection.add_record(Record::focus(2, true));
        let flushes = h.flush_requests();
        assert_eq!(flushes.len(), 1);
        assert_eq!(h.collection.current_segment_id(), Some(SegmentId(1)));
    }

    #[test]
    fn test_flushed_response_reaches_transport() {
        let mut h = Harness::new(RecorderConfig::default());
        h.collection.add_record(Record::focus(5, true));
        h.collection.flush(FlushReason::BeforeUnload);
        h.collection.handle_response(flushed(0));

        let (endpoint, payload) = h.payloads.try_recv().unwrap();
        assert_eq!(endpoint, RecorderConfig::default().endpoint);
        assert!(payload.page_exit);
        assert_eq!(payload.raw_size, 40);
        assert_eq!(payload.metadata["raw_segment_size"], json!(40));
        assert_eq!(payload.metadata["compressed_segment_size"], json!(4));
        assert_eq!(payload.metadata["records_count"], json!(1));
        assert_eq!(payload.metadata["view.id"], json!(Uuid::from_u128(1)));
        assert_eq!(h.collection.pending_responses(), 0);
    }

    #[test]
    fn test_lost_response_is_reported_once() {
        let mut h = Harness::new(RecorderConfig::default());
        h.collection.add_record(Record::focus(1, true));
        h.collection.flush(FlushReason::ViewChange);
        h.collection.add_record(Record::focus(2, true));
        h.collection.flush(FlushReason::ViewChange);

        h.collection.handle_response(flushed(1));
        assert_eq!(
            *h.monitor.events.lock().unwrap(),
            vec!["Segment compression response lost".to_string()]
        );
        assert!(h.payloads.try_recv().is_ok());
        assert!(h.payloads.try_recv().is_err());

        h.collection.handle_response(flushed(0));
        assert_eq!(h.monitor.events.lock().unwrap().len(), 1);
        assert!(h.payloads.try_recv().is_err());
    }

    #[test]
    fn test_errored_response_is_monitored() {
        let mut h = Harness::new(RecorderConfig::default());
        h.collection.add_record(Record::focus(1, true));
        h.collection.handle_response(WorkerResponse::Errored {
            id: SegmentId(0),
            message: "boom".into(),
        });
        assert_eq!(
            *h.monitor.events.lock().unwrap(),
            vec!["Segment compression failed".to_string()]
        );
        assert_eq!(h.collection.pending_responses(), 0);
    }

    #[test]
    fn test_index_in_view_restarts_for_new_view() {
        let mut h = Harness::new(RecorderConfig::default());
        h.collection.add_record(Record::focus(1, true));
        h.collection.flush(FlushReason::DurationLimit);
        h.collection.add_record(Record::focus(2, true));
        h.collection.flush(FlushReason::ViewChange);
        h.collection.set_context(context(2));
        h.collection.add_record(Record::focus(3, true));
        h.collection.stop();

        let indexes: Vec<bool> = h
            .flush_requests()
            .iter()
            .map(|(_, data)| data.contains("\"index_in_view\":0"))
            .collect();
        assert_eq!(indexes, vec![true, false, true]);
    }
}
