pub mod chunked;
pub mod sink;

use crate::remote::{
    IngestionError, LogIngestion, OutputEvent, EVENT_OVERHEAD_BYTES, MAX_BATCH_BYTES,
    MAX_BATCH_EVENTS,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ShipperError {
    #[error("ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    #[error("flush task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One complete log line, stamped when the line boundary was recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

fn entry_cost(entry: &LogEntry) -> usize {
    entry.text.len() + EVENT_OVERHEAD_BYTES
}

/// Queue and partial-line fragment shared between the writer side and the
/// flush task. The lock is held only for in-memory mutation, never across a
/// network call.
struct ShipperState {
    queue: VecDeque<LogEntry>,
    partial: String,
}

impl ShipperState {
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.partial.push_str(&String::from_utf8_lossy(bytes));

        while let Some(pos) = self.partial.find('\n') {
            let rest = self.partial.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.partial, rest);
            line.truncate(line.len() - 1);
            if line.ends_with('\r') {
                line.truncate(line.len() - 1);
            }
            self.queue.push_back(LogEntry {
                text: line,
                timestamp: Utc::now(),
            });
        }
    }

    fn flush_partial(&mut self) {
        if self.partial.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.partial);
        self.queue.push_back(LogEntry {
            text,
            timestamp: Utc::now(),
        });
    }
}

/// Cheaply cloneable write handle. Writes only touch in-memory state and
/// never block on network I/O.
#[derive(Clone)]
pub struct ShipperWriter {
    state: Arc<Mutex<ShipperState>>,
}

impl ShipperWriter {
    /// Splits written bytes into complete lines and enqueues them. The
    /// trailing fragment without a terminator is retained and completed by
    /// the next write, or flushed as a final entry on close.
    pub fn write(&self, bytes: &[u8]) {
        let mut state = self.state.lock().expect("shipper state lock poisoned");
        state.push_bytes(bytes);
    }
}

/// Ships buffered log lines to the ingestion service in ordered, size-capped
/// batches on a fixed interval. Delivery is at-least-once: a failed append is
/// retried forever with exponential backoff, and `close` drains everything
/// before returning.
pub struct LogShipper {
    ingestion: Arc<dyn LogIngestion>,
    group: String,
    stream: String,
    interval: Duration,
    state: Arc<Mutex<ShipperState>>,
    shutdown_tx: watch::Sender<bool>,
    flush_handle: Option<JoinHandle<()>>,
}

impl LogShipper {
    pub fn new(
        ingestion: Arc<dyn LogIngestion>,
        group: impl Into<String>,
        stream: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ingestion,
            group: group.into(),
            stream: stream.into(),
            interval,
            state: Arc::new(Mutex::new(ShipperState {
                queue: VecDeque::new(),
                partial: String::new(),
            })),
            shutdown_tx,
            flush_handle: None,
        }
    }

    pub fn writer(&self) -> ShipperWriter {
        ShipperWriter {
            state: Arc::clone(&self.state),
        }
    }

    /// Creates the destination stream and spawns the background flush task.
    /// Stream creation failure is fatal; nothing can be shipped without it.
    pub async fn start(&mut self) -> Result<(), ShipperError> {
        self.ingestion
            .create_stream(&self.group, &self.stream)
            .await?;

        let mut flusher = Flusher {
            ingestion: Arc::clone(&self.ingestion),
            group: self.group.clone(),
            stream: self.stream.clone(),
            state: Arc::clone(&self.state),
            sequence_token: None,
        };
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.flush_handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let closing = tokio::select! {
                    _ = ticker.tick() => false,
                    _ = shutdown_rx.changed() => true,
                };
                flusher.flush_pending().await;
                if closing {
                    debug!("Flush task observed close signal, exiting");
                    break;
                }
            }
        }));

        Ok(())
    }

    /// Flushes the retained partial line, signals the flush task and waits
    /// for it to drain the queue completely. Returns only once every buffered
    /// entry has been accepted by the ingestion service.
    pub async fn close(mut self) -> Result<(), ShipperError> {
        {
            let mut state = self.state.lock().expect("shipper state lock poisoned");
            state.flush_partial();
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.flush_handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

/// Flush-side state. The sequence token has a single writer: this task.
struct Flusher {
    ingestion: Arc<dyn LogIngestion>,
    group: String,
    stream: String,
    state: Arc<Mutex<ShipperState>>,
    sequence_token: Option<String>,
}

impl Flusher {
    /// Drains the queue completely, one capped batch per append call. An
    /// oversized backlog becomes multiple sequential batches within this one
    /// invocation.
    async fn flush_pending(&mut self) {
        loop {
            let batch = {
                let mut state = self.state.lock().expect("shipper state lock poisoned");
                extract_batch(&mut state.queue)
            };
            if batch.is_empty() {
                break;
            }
            self.ship_batch(&batch).await;
        }
    }

    /// Ships one batch, retrying the identical batch with the identical
    /// preceding token until the service accepts it. Backoff starts at 1s and
    /// doubles without bound; log delivery is never abandoned.
    async fn ship_batch(&mut self, batch: &[LogEntry]) {
        let events: Vec<OutputEvent> = batch
            .iter()
            .map(|entry| OutputEvent {
                message: entry.text.clone(),
                timestamp_ms: entry.timestamp.timestamp_millis(),
            })
            .collect();

        let mut backoff = Duration::from_secs(1);
        loop {
            let result = self
                .ingestion
                .put_events(
                    &self.group,
                    &self.stream,
                    &events,
                    self.sequence_token.as_deref(),
                )
                .await;

            match result {
                Ok(next_token) => {
                    debug!(events = events.len(), "Shipped log batch");
                    self.sequence_token = Some(next_token);
                    return;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Uploading logs failed, will retry"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

/// Pops the longest queue prefix that fits both service limits: entry count
/// and serialized byte budget (message length plus fixed per-entry overhead).
/// A single entry over the byte budget still ships alone rather than being
/// dropped or split.
fn extract_batch(queue: &mut VecDeque<LogEntry>) -> Vec<LogEntry> {
    let mut batch = Vec::new();
    let mut bytes = 0usize;

    while let Some(front) = queue.front() {
        let cost = entry_cost(front);
        if batch.len() >= MAX_BATCH_EVENTS {
            break;
        }
        if !batch.is_empty() && bytes + cost > MAX_BATCH_BYTES {
            break;
        }
        bytes += cost;
        match queue.pop_front() {
            Some(entry) => batch.push(entry),
            None => break,
        }
    }

    batch
}
