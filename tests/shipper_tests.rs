//! Shipper behavior across the public surface: ordering, batching of a large
//! backlog, and drain-on-close.

use async_trait::async_trait;
use remex::remote::{IngestionError, LogIngestion, OutputEvent, MAX_BATCH_EVENTS};
use remex::shipper::LogShipper;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct BatchRecorder {
    batches: Mutex<Vec<Vec<String>>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl BatchRecorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
        })
    }

    fn all_messages(&self) -> Vec<String> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl LogIngestion for BatchRecorder {
    async fn create_stream(&self, _group: &str, _stream: &str) -> Result<(), IngestionError> {
        Ok(())
    }

    async fn put_events(
        &self,
        _group: &str,
        _stream: &str,
        events: &[OutputEvent],
        sequence_token: Option<&str>,
    ) -> Result<String, IngestionError> {
        let mut batches = self.batches.lock().unwrap();
        batches.push(events.iter().map(|e| e.message.clone()).collect());
        self.tokens
            .lock()
            .unwrap()
            .push(sequence_token.map(|t| t.to_string()));
        Ok(format!("token-{}", batches.len()))
    }
}

#[tokio::test]
async fn test_large_backlog_ships_in_capped_ordered_batches() {
    let ingestion = BatchRecorder::new();
    let mut shipper = LogShipper::new(
        ingestion.clone(),
        "jobs",
        "stream",
        Duration::from_secs(3600),
    );
    shipper.start().await.unwrap();

    let writer = shipper.writer();
    let total = MAX_BATCH_EVENTS + 100;
    for i in 0..total {
        writer.write(format!("line-{i}\n").as_bytes());
    }
    shipper.close().await.unwrap();

    let batches = ingestion.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), MAX_BATCH_EVENTS);
    assert_eq!(batches[1].len(), 100);

    let expected: Vec<String> = (0..total).map(|i| format!("line-{i}")).collect();
    assert_eq!(ingestion.all_messages(), expected);
}

#[tokio::test]
async fn test_sequence_tokens_chain_batch_to_batch() {
    let ingestion = BatchRecorder::new();
    let mut shipper = LogShipper::new(
        ingestion.clone(),
        "jobs",
        "stream",
        Duration::from_secs(3600),
    );
    shipper.start().await.unwrap();

    let writer = shipper.writer();
    for i in 0..MAX_BATCH_EVENTS + 1 {
        writer.write(format!("{i}\n").as_bytes());
    }
    shipper.close().await.unwrap();

    let tokens = ingestion.tokens.lock().unwrap().clone();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0], None);
    assert_eq!(tokens[1].as_deref(), Some("token-1"));
}

#[tokio::test]
async fn test_periodic_flush_ships_without_close() {
    let ingestion = BatchRecorder::new();
    let mut shipper = LogShipper::new(
        ingestion.clone(),
        "jobs",
        "stream",
        Duration::from_millis(20),
    );
    shipper.start().await.unwrap();

    shipper.writer().write(b"early\n");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(ingestion.all_messages(), vec!["early".to_string()]);
    shipper.close().await.unwrap();
}

#[tokio::test]
async fn test_close_flushes_unterminated_final_line() {
    let ingestion = BatchRecorder::new();
    let mut shipper = LogShipper::new(
        ingestion.clone(),
        "jobs",
        "stream",
        Duration::from_secs(3600),
    );
    shipper.start().await.unwrap();

    let writer = shipper.writer();
    writer.write(b"done\nno newline at end");
    shipper.close().await.unwrap();

    assert_eq!(
        ingestion.all_messages(),
        vec!["done".to_string(), "no newline at end".to_string()]
    );
}
