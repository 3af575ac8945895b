//! Capture session: one recording, owned end to end.
//!
//! ```text
//!  host callbacks ──► CaptureSession ──► SegmentCollection ──► worker task
//!   (batches, ticks,   │ NodeRegistry                            │
//!    lifecycle)        │ MutationTracker          ◄── responses ─┘
//!                      │ InputTracker
//! ```
//!
//! The session is driven from a single task. Worker responses are pulled
//! with [`CaptureSession::pump_worker`] or awaited with
//! [`CaptureSession::next_worker_message`].

use crate::collection::SegmentCollection;
use crate::config::RecorderConfig;
use crate::protocol::WorkerResponse;
use crate::segment::{FlushReason, SegmentContext};
use crate::transport::{Monitor, Transport};
use crate::worker::spawn_worker;
use rewind_capture::{serialize_document, InputTracker, MutationTracker, NodeRegistry};
use rewind_core::{
    Document, MouseInteractionData, MouseInteractionKind, MutationData, NodeRef, Privacy,
    RawMutation, Record, RecordData, ScrollData, ScrollOffset, ViewportResizeData,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct CaptureSession {
    config: RecorderConfig,
    registry: NodeRegistry,
    mutations: MutationTracker,
    inputs: InputTracker,
    collection: SegmentCollection,
    responses: mpsc::UnboundedReceiver<WorkerResponse>,
    /// Document scroll position, reported as the snapshot's initial offset
    page_offset: ScrollOffset,
    has_focus: bool,
    recording: bool,
}

impl CaptureSession {
    /// Create a session and spawn its compression worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: RecorderConfig,
        context: SegmentContext,
        transport: Arc<dyn Transport>,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        let (worker, responses) = spawn_worker();
        let mut collection = SegmentCollection::new(&config, worker, transport, monitor);
        collection.set_context(context);
        Self {
            mutations: MutationTracker::new(config.default_privacy()),
            config,
            registry: NodeRegistry::new(),
            inputs: InputTracker::new(),
            collection,
            responses,
            page_offset: ScrollOffset::default(),
            has_focus: true,
            recording: false,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn collection(&self) -> &SegmentCollection {
        &self.collection
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    fn default_privacy(&self) -> Privacy {
        self.config.default_privacy()
    }

    /// Subscribe to the document and take the initial full snapshot.
    pub fn start(&mut self, doc: &mut Document, now: u64) {
        if self.recording {
            return;
        }
        self.recording = true;
        doc.observe();
        self.take_full_snapshot(doc, now);
    }

    /// Emit Meta, FullSnapshot and Focus records for the current tree.
    pub fn take_full_snapshot(&mut self, doc: &mut Document, now: u64) {
        self.flush_mutations(doc, now);
        self.mutations.freeze();

        let (width, height) = doc
            .document_element()
            .and_then(|html| doc.element(html))
            .map(|el| (el.bounding_box.width as u32, el.bounding_box.height as u32))
            .unwrap_or((0, 0));
        self.collection
            .add_record(Record::meta(now, doc.base_url(), width, height));
        let privacy = self.default_privacy();
        match serialize_document(doc, &mut self.registry, privacy) {
            Some(node) => self
                .collection
                .add_record(Record::full_snapshot(now, node, self.page_offset)),
            None => log::warn!("Full snapshot produced no document node"),
        }
        self.collection.add_record(Record::focus(now, self.has_focus));

        if let Some(data) = self.mutations.unfreeze(doc, &mut self.registry) {
            self.add_mutations(data, now);
        }
    }

    fn add_mutations(&mut self, data: MutationData, now: u64) {
        // removed and moved nodes lose their ids
        if !data.removes.is_empty() || !data.adds.is_empty() {
            self.inputs.prune(&self.registry);
        }
        self.collection.add_record(Record::incremental(now, data));
    }

    /// Process a notification batch delivered by the host.
    pub fn on_mutations(&mut self, doc: &Document, batch: Vec<RawMutation>, now: u64) {
        if !self.recording {
            return;
        }
        if let Some(data) = self.mutations.process(doc, &mut self.registry, batch) {
            self.add_mutations(data, now);
        }
    }

    /// Drain and process the document's pending notifications.
    pub fn flush_mutations(&mut self, doc: &mut Document, now: u64) {
        if !self.recording {
            return;
        }
        if let Some(data) = self.mutations.flush(doc, &mut self.registry) {
            self.add_mutations(data, now);
        }
    }

    pub fn record_input(&mut self, doc: &Document, node: NodeRef, now: u64) {
        if !self.recording {
            return;
        }
        let privacy = self.default_privacy();
        if let Some(data) = self.inputs.capture(doc, &self.registry, node, privacy) {
            self.collection
                .add_record(Record::new(now, RecordData::Input(data)));
        }
    }

    pub fn record_scroll(&mut self, doc: &Document, node: NodeRef, x: f64, y: f64, now: u64) {
        if !self.recording {
            return;
        }
        if node == doc.root() || Some(node) == doc.document_element() {
            self.page_offset = ScrollOffset { top: y, left: x };
        }
        let Some(id) = self.registry.id_of(node) else {
            return;
        };
        self.collection
            .add_record(Record::new(now, RecordData::Scroll(ScrollData { id, x, y })));
    }

    pub fn record_pointer_move(&mut self, node: NodeRef, x: f64, y: f64, now: u64) {
        if !self.recording {
            return;
        }
        if let Some(id) = self.registry.id_of(node) {
            self.collection.add_record(Record::pointer_move(now, id, x, y));
        }
    }

    pub fn record_mouse_interaction(
        &mut self,
        node: NodeRef,
        kind: MouseInteractionKind,
        position: Option<(f64, f64)>,
        now: u64,
    ) {
        if !self.recording {
            return;
        }
        let Some(id) = self.registry.id_of(node) else {
            return;
        };
        let data = MouseInteractionData {
            kind,
            id,
            x: position.map(|(x, _)| x),
            y: position.map(|(_, y)| y),
        };
        self.collection
            .add_record(Record::new(now, RecordData::MouseInteraction(data)));
    }

    pub fn record_focus(&mut self, has_focus: bool, now: u64) {
        self.has_focus = has_focus;
        if self.recording {
            self.collection.add_record(Record::focus(now, has_focus));
        }
    }

    pub fn record_viewport_resize(&mut self, width: u32, height: u32, now: u64) {
        if !self.recording {
            return;
        }
        self.collection.add_record(Record::new(
            now,
            RecordData::ViewportResize(ViewportResizeData { width, height }),
        ));
    }

    pub fn record_custom(&mut self, tag: &str, payload: Value, now: u64) {
        if self.recording {
            self.collection.add_record(Record::custom(now, tag, payload));
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Close the current view's segment and snapshot the new view.
    pub fn on_view_change(&mut self, doc: &mut Document, context: SegmentContext, now: u64) {
        if !self.recording {
            self.collection.set_context(context);
            return;
        }
        self.flush_mutations(doc, now);
        self.collection.add_record(Record::new(now, RecordData::ViewEnd));
        self.collection.flush(FlushReason::ViewChange);
        self.collection.set_context(context);
        self.take_full_snapshot(doc, now);
    }

    pub fn on_session_renewed(&mut self, doc: &mut Document, context: SegmentContext, now: u64) {
        if !self.recording {
            self.collection.set_context(context);
            return;
        }
        self.flush_mutations(doc, now);
        self.collection.flush(FlushReason::SessionRenewed);
        self.collection.set_context(context);
        self.take_full_snapshot(doc, now);
    }

    pub fn on_before_unload(&mut self, doc: &mut Document, now: u64) {
        self.flush_mutations(doc, now);
        self.collection.flush(FlushReason::BeforeUnload);
    }

    pub fn on_visibility_hidden(&mut self, doc: &mut Document, now: u64) {
        self.flush_mutations(doc, now);
        self.collection.flush(FlushReason::VisibilityHidden);
    }

    /// Timer callback driving duration-based rotation.
    pub fn tick(&mut self, now: u64) {
        self.collection.tick(now);
    }

    /// Handle every worker response already queued. Returns how many.
    pub fn pump_worker(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(response) = self.responses.try_recv() {
            self.collection.handle_response(response);
            handled += 1;
        }
        handled
    }

    /// Wait for one worker response and handle it. `false` once the
    /// worker is gone.
    pub async fn next_worker_message(&mut self) -> bool {
        match self.responses.recv().await {
            Some(response) => {
                self.collection.handle_response(response);
                true
            }
            None => false,
        }
    }

    /// Process pending notifications, disconnect, flush the last segment
    /// and forget every node.
    pub fn stop(&mut self, doc: &mut Document, now: u64) {
        if !self.recording {
            return;
        }
        self.flush_mutations(doc, now);
        doc.disconnect();
        self.recording = false;
        self.collection.stop();
        self.registry.clear();
        self.inputs.clear();
        log::debug!("Capture stopped");
    }
}
