//! Outbound collaborators: the network transport and the monitoring sink.

use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// A compressed segment ready to leave the process.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayPayload {
    pub data: Vec<u8>,
    /// Segment metadata with nested objects flattened to dotted keys
    pub metadata: Map<String, Value>,
    pub raw_size: usize,
    pub page_exit: bool,
}

/// Delivers payloads to the intake endpoint.
pub trait Transport: Send + Sync {
    fn send(&self, endpoint: &str, payload: ReplayPayload);
}

/// Hands payloads to an in-process receiver.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<(String, ReplayPayload)>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, ReplayPayload)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, endpoint: &str, payload: ReplayPayload) {
        if self.tx.send((endpoint.to_string(), payload)).is_err() {
            log::warn!("Replay payload for {endpoint} dropped: receiver closed");
        }
    }
}

/// Sink for internal diagnostics that never reach the host.
pub trait Monitor: Send + Sync {
    fn debug(&self, message: &str, context: Value);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogMonitor;

impl Monitor for LogMonitor {
    fn debug(&self, message: &str, context: Value) {
        log::warn!("{message} {context}");
    }
}

/// Flatten nested objects into `parent.child` keys.
///
/// `{"view":{"id":"v"},"start":1}` becomes `{"view.id":"v","start":1}`.
pub fn flatten_metadata(value: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    let mut stack: Vec<(String, &Value)> = match value {
        Value::Object(map) => map.iter().rev().map(|(k, v)| (k.clone(), v)).collect(),
        other => vec![(String::new(), other)],
    };
    while let Some((key, value)) = stack.pop() {
        match value {
            Value::Object(map) if !map.is_empty() => {
                stack.extend(map.iter().rev().map(|(k, v)| (format!("{key}.{k}"), v)));
            }
            leaf => {
                out.insert(key, leaf.clone());
            }
        }
    }
    out
}
