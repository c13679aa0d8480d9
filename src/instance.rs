//! Instance identity used to name the log stream when none is given
//! explicitly: an environment override first, then the host's metadata
//! endpoint.

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const INSTANCE_ID_ENV: &str = "REMEX_INSTANCE_ID";

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("metadata request failed: {0}")]
    Metadata(#[from] reqwest::Error),

    #[error("metadata endpoint returned an empty instance id")]
    Empty,
}

pub async fn instance_id(metadata_url: &str) -> Result<String, InstanceError> {
    if let Ok(id) = std::env::var(INSTANCE_ID_ENV) {
        if !id.is_empty() {
            debug!(instance_id = %id, "Instance id from environment");
            return Ok(id);
        }
    }

    debug!(url = %metadata_url, "Fetching instance id from metadata endpoint");
    let client = reqwest::Client::builder()
        .timeout(METADATA_TIMEOUT)
        .build()?;
    let body = client
        .get(metadata_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let id = body.trim().to_string();
    if id.is_empty() {
        return Err(InstanceError::Empty);
    }
    Ok(id)
}
