//! The control loop tying subprocess lifecycle, log shipping and out-of-band
//! signal delivery together: Starting -> Running -> Draining -> Terminated.

pub mod result;

use crate::command::exit::classify;
use crate::command::{CommandError, CommandRunner, ExecSource, WaitOutcome};
use crate::remote::{ObjectAddress, ObjectStore};
use crate::shipper::sink::{OutputSink, SinkError};
use crate::watcher::SignalWatcher;
use result::CommandResult;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("output sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("command error: {0}")]
    Command(#[from] CommandError),
}

pub struct Agent {
    pub store: Arc<dyn ObjectStore>,
    pub sink: OutputSink,
    pub source: ExecSource,
    pub watcher: SignalWatcher,
    pub check_signal_before_start: bool,
    pub result_address: Option<ObjectAddress>,
}

impl Agent {
    /// Runs the command to completion and returns the exit code the agent
    /// process should report. Errors are fatal-startup only; once the
    /// command is running every failure is absorbed into the classified
    /// outcome.
    pub async fn run(self) -> Result<i32, AgentError> {
        let Agent {
            store,
            mut sink,
            source,
            watcher,
            check_signal_before_start,
            result_address,
        } = self;

        // Starting.
        sink.start().await?;

        if check_signal_before_start {
            match watcher.poll_once().await {
                Ok(Some(marker)) => {
                    info!(
                        signal = marker.signal,
                        "Signal marker already present, not starting the command"
                    );
                    return abort_before_start(sink, store, result_address).await;
                }
                Ok(None) => {}
                // A failed pre-check is transient like any other lookup
                // failure; the watch loop keeps polling once we are running.
                Err(e) => warn!(error = %e, "Pre-start signal check failed"),
            }
        }

        let runner = CommandRunner::new(Arc::clone(&store), source, sink.writer());
        let mut running = runner.start().await?;
        let mut signal_rx = watcher.start();

        // Running: one consumer multiplexing termination against discovered
        // signals. Biased so that termination always wins the race; a marker
        // observed after the wait event is dropped, there is no process left
        // to deliver it to.
        let outcome = loop {
            tokio::select! {
                biased;

                outcome = running.wait_event() => {
                    break outcome.unwrap_or_else(|_| {
                        WaitOutcome::WaitFailed("command wait task ended unexpectedly".to_string())
                    });
                }
                Some(marker) = signal_rx.recv() => {
                    if let Err(e) = running.signal(marker.signal) {
                        warn!(
                            signal = marker.signal,
                            error = %e,
                            "Failed to deliver signal to command"
                        );
                    }
                }
            }
        };

        // Draining: the exit marker is always the last line shipped, and
        // shipping completes before the agent exits.
        let classified = classify(&outcome);
        if classified.is_abnormal() {
            warn!(outcome = ?outcome, "Command did not exit normally");
        } else {
            info!(code = classified.code(), "Command exited");
        }

        sink.writer()
            .write(format!("{}\n", classified.marker_line()).as_bytes());
        sink.close().await?;

        upload_result(
            store.as_ref(),
            result_address.as_ref(),
            &CommandResult::from_outcome(&classified),
        )
        .await;

        Ok(classified.code())
    }
}

/// Pre-start marker found: the run is over before it began. Record a
/// successful no-op outcome and drain the sink.
async fn abort_before_start(
    sink: OutputSink,
    store: Arc<dyn ObjectStore>,
    result_address: Option<ObjectAddress>,
) -> Result<i32, AgentError> {
    sink.writer()
        .write(b"signal marker already present; command not started\n");
    sink.close().await?;

    upload_result(
        store.as_ref(),
        result_address.as_ref(),
        &CommandResult {
            exit_status: 0,
            error: "signal marker already present; command not started".to_string(),
        },
    )
    .await;

    Ok(0)
}

/// Result upload is best-effort: the run's outcome is already decided and
/// shipped, so a failure here must not change it.
async fn upload_result(
    store: &dyn ObjectStore,
    address: Option<&ObjectAddress>,
    command_result: &CommandResult,
) {
    let Some(address) = address else {
        return;
    };
    info!(address = %address, "Uploading result object");
    if let Err(e) = result::upload(store, address, command_result).await {
        warn!(address = %address, error = %e, "Failed to upload result object");
    }
}
