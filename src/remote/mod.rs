pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use http::{HttpLogIngestion, HttpObjectStore};

/// Hard limits the log ingestion service enforces on a single append call.
pub const MAX_BATCH_EVENTS: usize = 10_000;
pub const MAX_BATCH_BYTES: usize = 1_048_576;

/// Fixed per-event overhead charged against the byte budget, in addition to
/// the message length.
pub const EVENT_OVERHEAD_BYTES: usize = 26;

/// Location of an object in the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAddress {
    pub bucket: String,
    pub key: String,
}

impl ObjectAddress {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// A single log event as accepted by the ingestion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub message: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object store transport error: {0}")]
    Transport(String),

    #[error("object store returned status {status}: {message}")]
    Remote { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("log ingestion transport error: {0}")]
    Transport(String),

    #[error("log ingestion returned status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("log ingestion response missing sequence token")]
    MissingToken,
}

/// Object store capability: fetch the script to run, poll for signal markers,
/// upload chunked output and the final result object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` means the object does not exist, a normal outcome.
    async fn get(&self, address: &ObjectAddress) -> Result<Option<Vec<u8>>, ObjectStoreError>;

    async fn put(&self, address: &ObjectAddress, body: Vec<u8>) -> Result<(), ObjectStoreError>;
}

/// Append-only log ingestion capability. Appends to a stream are totally
/// ordered by the sequence token: each successful call returns the token that
/// must accompany the next call for the same stream.
#[async_trait]
pub trait LogIngestion: Send + Sync {
    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), IngestionError>;

    /// Returns the sequence token to present on the next append.
    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        events: &[OutputEvent],
        sequence_token: Option<&str>,
    ) -> Result<String, IngestionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_address_display() {
        let addr = ObjectAddress::new("ops-bucket", "signals/i-1234.json");
        assert_eq!(addr.to_string(), "ops-bucket/signals/i-1234.json");
    }

    #[test]
    fn test_output_event_wire_format() {
        let event = OutputEvent {
            message: "hello".to_string(),
            timestamp_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"message":"hello","timestamp_ms":1700000000000}"#
        );
    }
}
