//! Out-of-band signal delivery. The controller has no network path to the
//! process, so it publishes a small JSON marker at a well-known object store
//! address and the agent polls for it.

use crate::remote::{ObjectAddress, ObjectStore, ObjectStoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Marker object published by the controller, e.g. `{"signal": 15}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMarker {
    pub signal: i32,
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("object store error: {0}")]
    Store(#[from] ObjectStoreError),

    #[error("malformed signal marker: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub struct SignalWatcher {
    store: Arc<dyn ObjectStore>,
    address: ObjectAddress,
    interval: Duration,
}

impl SignalWatcher {
    pub fn new(store: Arc<dyn ObjectStore>, address: ObjectAddress, interval: Duration) -> Self {
        Self {
            store,
            address,
            interval,
        }
    }

    /// One lookup of the marker. An absent object is `Ok(None)`, a normal
    /// outcome; a malformed payload or transport failure is an error and
    /// never implies "not found".
    pub async fn poll_once(&self) -> Result<Option<SignalMarker>, WatcherError> {
        debug!(address = %self.address, "Checking for signal marker");

        let Some(body) = self.store.get(&self.address).await? else {
            debug!("Signal marker not found");
            return Ok(None);
        };

        let marker: SignalMarker = serde_json::from_slice(&body)?;
        Ok(Some(marker))
    }

    /// Spawns the poll loop: at most one marker per interval, "not found"
    /// suppressed, lookup errors logged and retried next tick. Transient
    /// errors never terminate the loop. A marker that persists across polls
    /// is delivered once; it is delivered again only if its content changes.
    pub fn start(self) -> mpsc::Receiver<SignalMarker> {
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The immediate first tick would double up with the pre-start
            // check; wait a full interval before the first poll.
            ticker.tick().await;
            let mut delivered: Option<SignalMarker> = None;

            loop {
                ticker.tick().await;
                match self.poll_once().await {
                    Ok(Some(marker)) => {
                        if delivered == Some(marker) {
                            continue;
                        }
                        info!(signal = marker.signal, "Signal marker found");
                        if tx.send(marker).await.is_err() {
                            debug!("Signal channel closed, stopping watch loop");
                            break;
                        }
                        delivered = Some(marker);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "Signal marker lookup failed");
                    }
                }
            }
        });

        rx
    }
}
