//! Alternate output sink that uploads raw command output to the object store
//! as a sequence of numbered chunk objects instead of a log stream.
//!
//! The open chunk is re-uploaded with its latest content on every cycle;
//! sealed chunks are dropped from the buffer once their upload succeeds, so a
//! failed upload is simply retried on the next cycle without losing order.

use crate::remote::{ObjectAddress, ObjectStore, ObjectStoreError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("object store error: {0}")]
    Store(#[from] ObjectStoreError),

    #[error("upload task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

struct Chunk {
    body: Vec<u8>,
    index: u64,
    sealed: bool,
}

struct ChunkState {
    chunks: VecDeque<Chunk>,
}

impl ChunkState {
    fn append(&mut self, bytes: &[u8], max_chunk_size: usize) {
        let roll = match self.chunks.back() {
            Some(open) => open.body.len() + bytes.len() > max_chunk_size,
            None => true,
        };
        if roll {
            let next_index = self.chunks.back().map(|c| c.index + 1).unwrap_or(1);
            if let Some(open) = self.chunks.back_mut() {
                open.sealed = true;
            }
            debug!(index = next_index, "Opening new output chunk");
            self.chunks.push_back(Chunk {
                body: Vec::new(),
                index: next_index,
                sealed: false,
            });
        }
        if let Some(open) = self.chunks.back_mut() {
            open.body.extend_from_slice(bytes);
        }
    }

    fn seal_all(&mut self) {
        for chunk in &mut self.chunks {
            chunk.sealed = true;
        }
    }
}

#[derive(Clone)]
pub struct ChunkWriter {
    state: Arc<Mutex<ChunkState>>,
    max_chunk_size: usize,
}

impl ChunkWriter {
    pub fn write(&self, bytes: &[u8]) {
        let mut state = self.state.lock().expect("chunk state lock poisoned");
        state.append(bytes, self.max_chunk_size);
    }
}

/// Buffers raw output into size-capped chunks and uploads each as
/// `<prefix><index>.log` on a fixed interval. `close` seals every chunk and
/// drains the buffer before returning.
pub struct ChunkedObjectWriter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key_prefix: String,
    max_chunk_size: usize,
    interval: Duration,
    state: Arc<Mutex<ChunkState>>,
    shutdown_tx: watch::Sender<bool>,
    upload_handle: Option<JoinHandle<()>>,
}

impl ChunkedObjectWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        key_prefix: impl Into<String>,
        interval: Duration,
        max_chunk_size: usize,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
            max_chunk_size,
            interval,
            state: Arc::new(Mutex::new(ChunkState {
                chunks: VecDeque::new(),
            })),
            shutdown_tx,
            upload_handle: None,
        }
    }

    pub fn writer(&self) -> ChunkWriter {
        ChunkWriter {
            state: Arc::clone(&self.state),
            max_chunk_size: self.max_chunk_size,
        }
    }

    pub fn start(&mut self) {
        let uploader = Uploader {
            store: Arc::clone(&self.store),
            bucket: self.bucket.clone(),
            key_prefix: self.key_prefix.clone(),
            state: Arc::clone(&self.state),
        };
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.upload_handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let closing = tokio::select! {
                    _ = ticker.tick() => false,
                    _ = shutdown_rx.changed() => true,
                };
                if closing {
                    uploader.drain().await;
                    break;
                }
                uploader.upload_cycle().await;
            }
        }));
    }

    /// Seals all chunks and blocks until every one has been uploaded.
    pub async fn close(mut self) -> Result<(), ChunkError> {
        {
            let mut state = self.state.lock().expect("chunk state lock poisoned");
            state.seal_all();
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.upload_handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

struct Uploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key_prefix: String,
    state: Arc<Mutex<ChunkState>>,
}

impl Uploader {
    /// Uploads chunks front-to-back, stopping at the first failure so order
    /// is preserved; sealed chunks whose upload succeeded are purged.
    /// Returns true when no sealed chunk remains buffered.
    async fn upload_cycle(&self) -> bool {
        let snapshot: Vec<(u64, bool, Vec<u8>)> = {
            let state = self.state.lock().expect("chunk state lock poisoned");
            state
                .chunks
                .iter()
                .map(|c| (c.index, c.sealed, c.body.clone()))
                .collect()
        };

        let mut purge_count = 0usize;
        let mut stopped_early = false;
        for (index, sealed, body) in snapshot {
            let address = ObjectAddress::new(
                self.bucket.clone(),
                format!("{}{}.log", self.key_prefix, index),
            );
            debug!(address = %address, bytes = body.len(), "Uploading output chunk");

            if let Err(e) = self.store.put(&address, body).await {
                warn!(address = %address, error = %e, "Chunk upload failed, will retry");
                stopped_early = true;
                break;
            }
            if sealed {
                purge_count += 1;
            }
        }

        let mut state = self.state.lock().expect("chunk state lock poisoned");
        for _ in 0..purge_count {
            state.chunks.pop_front();
        }
        !stopped_early && state.chunks.iter().all(|c| !c.sealed)
    }

    /// Final drain: every chunk is sealed by now, so cycles repeat with
    /// backoff until the buffer is empty.
    async fn drain(&self) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if self.upload_cycle().await {
                return;
            }
            warn!(
                backoff_secs = backoff.as_secs(),
                "Output chunks still pending, retrying upload"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
}
