//! HTTP-backed implementations of the remote capabilities.
//!
//! Both services speak plain JSON over HTTP. Authenticated session setup is
//! the deployment's concern; when a token is configured it is attached as a
//! bearer credential to every request.

use crate::remote::{
    IngestionError, LogIngestion, ObjectAddress, ObjectStore, ObjectStoreError, OutputEvent,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RemoteClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub auth_token: Option<String>,
}

fn build_client(config: &RemoteClientConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(config.timeout).build()
}

fn apply_auth(
    request: reqwest::RequestBuilder,
    auth_token: &Option<String>,
) -> reqwest::RequestBuilder {
    match auth_token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

#[derive(Debug)]
pub struct HttpObjectStore {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(config: &RemoteClientConfig) -> Result<Self, ObjectStoreError> {
        let client =
            build_client(config).map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    fn object_url(&self, address: &ObjectAddress) -> String {
        format!("{}/{}/{}", self.base_url, address.bucket, address.key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, address: &ObjectAddress) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let url = self.object_url(address);
        debug!(url = %url, "Fetching object");

        let request = apply_auth(self.client.get(&url), &self.auth_token);
        let response = request
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ObjectStoreError::Remote {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
        Ok(Some(body.to_vec()))
    }

    async fn put(&self, address: &ObjectAddress, body: Vec<u8>) -> Result<(), ObjectStoreError> {
        let url = self.object_url(address);
        debug!(url = %url, bytes = body.len(), "Uploading object");

        let request = apply_auth(self.client.put(&url), &self.auth_token).body(body);
        let response = request
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ObjectStoreError::Remote {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct HttpLogIngestion {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CreateStreamRequest<'a> {
    group: &'a str,
    stream: &'a str,
}

#[derive(Debug, Serialize)]
struct PutEventsRequest<'a> {
    group: &'a str,
    stream: &'a str,
    events: &'a [OutputEvent],
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutEventsResponse {
    next_sequence_token: Option<String>,
}

impl HttpLogIngestion {
    pub fn new(config: &RemoteClientConfig) -> Result<Self, IngestionError> {
        let client = build_client(config).map_err(|e| IngestionError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }
}

#[async_trait]
impl LogIngestion for HttpLogIngestion {
    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), IngestionError> {
        let url = format!("{}/streams", self.base_url);
        debug!(group = %group, stream = %stream, "Creating log stream");

        let request = apply_auth(self.client.post(&url), &self.auth_token)
            .json(&CreateStreamRequest { group, stream });
        let response = request
            .send()
            .await
            .map_err(|e| IngestionError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IngestionError::Remote {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        events: &[OutputEvent],
        sequence_token: Option<&str>,
    ) -> Result<String, IngestionError> {
        let url = format!("{}/events", self.base_url);
        debug!(
            group = %group,
            stream = %stream,
            events = events.len(),
            "Appending log events"
        );

        let request = apply_auth(self.client.post(&url), &self.auth_token).json(&PutEventsRequest {
            group,
            stream,
            events,
            sequence_token,
        });
        let response = request
            .send()
            .await
            .map_err(|e| IngestionError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IngestionError::Remote {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: PutEventsResponse = response
            .json()
            .await
            .map_err(|e| IngestionError::Transport(e.to_string()))?;
        body.next_sequence_token.ok_or(IngestionError::MissingToken)
    }
}
