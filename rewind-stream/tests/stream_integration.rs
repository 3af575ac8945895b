//! Integration tests for segment streaming.
//!
//! These run real compression (in-process or on the worker task) and read
//! the delivered payloads back the way an intake service would.

use rewind_core::{Document, Record};
use rewind_stream::{
    decompress, CaptureSession, ChannelTransport, CompressionWorker, FlushReason, LogMonitor,
    Monitor, RecorderConfig, ReplayPayload, SegmentCollection, SegmentContext, SegmentId,
    Transport, WorkerHandle, WorkerResponse,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn context(view: u128) -> SegmentContext {
    SegmentContext::new(Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(view))
}

fn parse_segment(payload: &ReplayPayload) -> Value {
    let raw = decompress(&payload.data).unwrap();
    assert_eq!(raw.len(), payload.raw_size);
    assert_eq!(raw.last(), Some(&b'\n'));
    serde_json::from_slice(&raw).unwrap()
}

fn record_types(segment: &Value) -> Vec<String> {
    segment["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["type"].as_str().unwrap().to_string())
        .collect()
}

/// Depth-first search for the element whose `id` attribute is `html_id`.
fn find_node_id(node: &Value, html_id: &str) -> Option<u64> {
    if node["attributes"]["id"] == html_id {
        return node["id"].as_u64();
    }
    node["childNodes"]
        .as_array()?
        .iter()
        .find_map(|child| find_node_id(child, html_id))
}

/// Collects monitor events and transport sends in arrival order.
#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
    payloads: Mutex<Vec<ReplayPayload>>,
}

impl Monitor for EventLog {
    fn debug(&self, message: &str, context: Value) {
        self.events
            .lock()
            .unwrap()
            .push(format!("monitor: {message} {}", context["segment_id"]));
    }
}

impl Transport for EventLog {
    fn send(&self, _endpoint: &str, payload: ReplayPayload) {
        let view = payload.metadata["index_in_view"].clone();
        self.events.lock().unwrap().push(format!("send: {view}"));
        self.payloads.lock().unwrap().push(payload);
    }
}

async fn next_payload(
    session: &mut CaptureSession,
    payloads: &mut mpsc::UnboundedReceiver<(String, ReplayPayload)>,
) -> ReplayPayload {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Ok((_, payload)) = payloads.try_recv() {
                return payload;
            }
            assert!(session.next_worker_message().await, "worker gone");
        }
    })
    .await
    .expect("payload delivered in time")
}

#[test]
fn test_dropped_flush_response_is_reported_before_next_result() {
    init_logging();
    let log = Arc::new(EventLog::default());
    let (tx, mut requests) = mpsc::unbounded_channel();
    let mut collection = SegmentCollection::new(
        &RecorderConfig::default(),
        WorkerHandle::from_sender(tx),
        log.clone(),
        log.clone(),
    );
    collection.set_context(context(10));

    collection.add_record(Record::focus(1, true));
    collection.flush(FlushReason::DurationLimit);
    collection.add_record(Record::focus(2, false));
    collection.flush(FlushReason::Stop);

    let mut worker = CompressionWorker::new();
    while let Ok(request) = requests.try_recv() {
        let response = worker.handle(request);
        if let WorkerResponse::Flushed { id: SegmentId(0), .. } = response {
            continue;
        }
        collection.handle_response(response);
    }

    assert_eq!(
        *log.events.lock().unwrap(),
        vec![
            "monitor: Segment compression response lost 0".to_string(),
            "send: 1".to_string(),
        ]
    );
    assert_eq!(collection.pending_responses(), 0);

    let payloads = log.payloads.lock().unwrap();
    let segment = parse_segment(&payloads[0]);
    assert_eq!(segment["creation_reason"], "segment_duration_limit");
    assert_eq!(segment["records"][0]["data"]["has_focus"], false);
}

#[tokio::test]
async fn test_session_snapshot_then_mutation() {
    init_logging();
    let mut doc = Document::with_skeleton("https://example.com/");
    let body = doc.body().unwrap();
    let sandbox = doc.append_element(body, "div", &[("id", "sandbox")]).unwrap();
    doc.append_element(sandbox, "input", &[]).unwrap();

    let (transport, mut payloads) = ChannelTransport::new();
    let mut session = CaptureSession::new(
        RecorderConfig::default(),
        context(20),
        Arc::new(transport),
        Arc::new(LogMonitor),
    );
    session.start(&mut doc, 1_000);
    assert!(session.is_recording());

    doc.append_element(sandbox, "p", &[]).unwrap();
    session.flush_mutations(&mut doc, 1_010);
    session.stop(&mut doc, 1_020);
    assert!(!session.is_recording());
    assert!(session.registry().is_empty());
    assert!(!doc.is_observing());

    let payload = next_payload(&mut session, &mut payloads).await;
    assert!(!payload.page_exit);
    assert_eq!(payload.metadata["view.id"], Uuid::from_u128(20).to_string());
    assert_eq!(payload.metadata["compressed_segment_size"], payload.data.len());

    let segment = parse_segment(&payload);
    assert_eq!(
        record_types(&segment),
        vec!["meta", "full_snapshot", "focus", "incremental_change"]
    );
    assert_eq!(segment["has_full_snapshot"], true);
    assert_eq!(segment["records_count"], 4);
    assert_eq!(segment["creation_reason"], "init");
    assert_eq!(segment["start"], 1_000);
    assert_eq!(segment["end"], 1_010);

    let snapshot = &segment["records"][1]["data"]["node"];
    let sandbox_id = find_node_id(snapshot, "sandbox").unwrap();
    let adds = segment["records"][3]["data"]["adds"].as_array().unwrap();
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0]["parentId"], sandbox_id);
    assert_eq!(adds[0]["node"]["tagName"], "p");
}

#[tokio::test]
async fn test_view_change_rotates_with_new_snapshot() {
    init_logging();
    let mut doc = Document::with_skeleton("https://example.com/");
    let (transport, mut payloads) = ChannelTransport::new();
    let mut session = CaptureSession::new(
        RecorderConfig::default(),
        context(30),
        Arc::new(transport),
        Arc::new(LogMonitor),
    );
    session.start(&mut doc, 0);
    session.record_custom("checkout", serde_json::json!({ "step": 1 }), 5);
    session.on_view_change(&mut doc, context(31), 10);
    session.on_before_unload(&mut doc, 20);

    let first = next_payload(&mut session, &mut payloads).await;
    let first_segment = parse_segment(&first);
    assert_eq!(
        record_types(&first_segment).last().map(String::as_str),
        Some("view_end")
    );
    assert_eq!(first_segment["view"]["id"], Uuid::from_u128(30).to_string());

    let second = next_payload(&mut session, &mut payloads).await;
    assert!(second.page_exit);
    let second_segment = parse_segment(&second);
    assert_eq!(second_segment["creation_reason"], "view_change");
    assert_eq!(second_segment["has_full_snapshot"], true);
    assert_eq!(second_segment["index_in_view"], 0);
    assert_eq!(second_segment["view"]["id"], Uuid::from_u128(31).to_string());
}

#[tokio::test]
async fn test_pointer_moves_arrive_coalesced() {
    init_logging();
    let mut doc = Document::with_skeleton("https://example.com/");
    let body = doc.body().unwrap();
    let config = RecorderConfig {
        pointer_move_batch_size: 2,
        ..RecorderConfig::default()
    };
    let (transport, mut payloads) = ChannelTransport::new();
    let mut session =
        CaptureSession::new(config, context(40), Arc::new(transport), Arc::new(LogMonitor));
    session.start(&mut doc, 100);
    for (i, now) in [110, 120, 130].into_iter().enumerate() {
        session.record_pointer_move(body, i as f64, 0.0, now);
    }
    session.stop(&mut doc, 140);

    let segment = parse_segment(&next_payload(&mut session, &mut payloads).await);
    let moves: Vec<&Value> = segment["records"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["type"] == "pointer_move")
        .collect();
    assert_eq!(moves.len(), 2);
    assert_eq!(moves[0]["data"]["positions"].as_array().unwrap().len(), 2);
    assert_eq!(moves[0]["timestamp"], 120);
    assert_eq!(moves[0]["data"]["positions"][0]["timeOffset"], -10);
    assert_eq!(segment["end"], 130);
}
