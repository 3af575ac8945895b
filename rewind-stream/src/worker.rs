//! Streaming compression worker.
//!
//! Runs as a tokio task fed by an unbounded channel. Each segment is one
//! LZ4 frame in linked-block mode, so later blocks can reference earlier
//! ones and the whole segment compresses as a single stream.
//!
//! ```text
//!  WorkerHandle ──mpsc──► CompressionWorker ──mpsc──► responses
//!                         ┌───────────────────┐
//!                         │ FrameEncoder<Vec> │  write + flush per Write
//!                         │                   │  finish per Flush
//!                         └───────────────────┘
//! ```

use crate::protocol::{ProtocolError, SegmentId, WorkerRequest, WorkerResponse};
use lz4_flex::frame::{BlockMode, FrameDecoder, FrameEncoder, FrameInfo};
use std::io::{Read, Write};
use tokio::sync::mpsc;

/// Sending side of the worker channel.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerRequest>,
}

impl WorkerHandle {
    /// Wrap an existing request channel. The receiving end is expected to
    /// answer with [`WorkerResponse`]s in request order.
    pub fn from_sender(tx: mpsc::UnboundedSender<WorkerRequest>) -> Self {
        Self { tx }
    }

    pub fn post(&self, request: WorkerRequest) -> Result<(), ProtocolError> {
        let id = request.id();
        self.tx
            .send(request)
            .map_err(|_| ProtocolError::WorkerGone(id))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the compression task on the current tokio runtime.
///
/// The task ends once every [`WorkerHandle`] is dropped or the response
/// receiver goes away.
pub fn spawn_worker() -> (WorkerHandle, mpsc::UnboundedReceiver<WorkerResponse>) {
    let (req_tx, mut req_rx) = mpsc::unbounded_channel::<WorkerRequest>();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut worker = CompressionWorker::new();
        while let Some(request) = req_rx.recv().await {
            if resp_tx.send(worker.handle(request)).is_err() {
                break;
            }
        }
        log::debug!("Compression worker stopped");
    });

    (WorkerHandle::from_sender(req_tx), resp_rx)
}

/// Synchronous core of the worker: one open frame at a time.
pub struct CompressionWorker {
    stream: Option<OpenStream>,
}

struct OpenStream {
    id: SegmentId,
    encoder: FrameEncoder<Vec<u8>>,
    raw_bytes_count: usize,
}

impl OpenStream {
    fn new(id: SegmentId) -> Self {
        let info = FrameInfo::new().block_mode(BlockMode::Linked);
        Self {
            id,
            encoder: FrameEncoder::with_frame_info(info, Vec::new()),
            raw_bytes_count: 0,
        }
    }

    fn append(&mut self, data: &str) -> std::io::Result<()> {
        self.encoder.write_all(data.as_bytes())?;
        self.encoder.flush()?;
        self.raw_bytes_count += data.len();
        Ok(())
    }
}

impl Default for CompressionWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionWorker {
    pub fn new() -> Self {
        Self { stream: None }
    }

    pub fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        match request {
            WorkerRequest::Write { id, data } => self.write(id, &data),
            WorkerRequest::Flush { id, data } => self.flush(id, &data),
        }
    }

    fn stream_for(&mut self, id: SegmentId) -> &mut OpenStream {
        if self.stream.as_ref().map(|s| s.id) != Some(id) {
            if let Some(stale) = self.stream.take() {
                log::debug!(
                    "Discarding unfinished stream for segment {} ({} raw bytes)",
                    stale.id,
                    stale.raw_bytes_count
                );
            }
        }
        self.stream.get_or_insert_with(|| OpenStream::new(id))
    }

    fn write(&mut self, id: SegmentId, data: &str) -> WorkerResponse {
        let stream = self.stream_for(id);
        match stream.append(data) {
            Ok(()) => WorkerResponse::Wrote {
                id,
                compressed_bytes_count: stream.encoder.get_ref().len(),
                additional_bytes_count: data.len(),
            },
            Err(e) => self.fail(id, e.to_string()),
        }
    }

    fn flush(&mut self, id: SegmentId, data: &str) -> WorkerResponse {
        let mut stream = match self.stream.take() {
            Some(stream) if stream.id == id => stream,
            _ => OpenStream::new(id),
        };
        if let Err(e) = stream.append(data) {
            return self.fail(id, e.to_string());
        }
        let raw_bytes_count = stream.raw_bytes_count;
        match stream.encoder.finish() {
            Ok(result) => WorkerResponse::Flushed {
                id,
                result,
                raw_bytes_count,
                additional_bytes_count: data.len(),
            },
            Err(e) => self.fail(id, e.to_string()),
        }
    }

    fn fail(&mut self, id: SegmentId, message: String) -> WorkerResponse {
        log::warn!("Compression failed for segment {id}: {message}");
        self.stream = None;
        WorkerResponse::Errored { id, message }
    }
}

/// Decompress one flushed segment.
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::new();
    FrameDecoder::new(compressed)
        .read_to_end(&mut out)
        .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;
    Ok(out)
}

/// Compression errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompressionError {
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
}
