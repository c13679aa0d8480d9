//! Final structured result object uploaded to the object store so the
//! controller can read the outcome without access to the log stream.

use crate::command::exit::ExitOutcome;
use crate::remote::{ObjectAddress, ObjectStore, ObjectStoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to upload result: {0}")]
    Upload(#[from] ObjectStoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_status: i32,
    pub error: String,
}

impl CommandResult {
    pub fn from_outcome(outcome: &ExitOutcome) -> Self {
        let error = match outcome {
            ExitOutcome::Exited(_) => String::new(),
            other => other.marker_line(),
        };
        Self {
            exit_status: outcome.code(),
            error,
        }
    }
}

pub async fn upload(
    store: &dyn ObjectStore,
    address: &ObjectAddress,
    result: &CommandResult,
) -> Result<(), ResultError> {
    let body = serde_json::to_vec(result)?;
    store.put(address, body).await?;
    Ok(())
}
