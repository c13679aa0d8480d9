use crate::agent::Agent;
use crate::command::ExecSource;
use crate::config::{load_config, Config, ConfigError};
use crate::instance::{instance_id, InstanceError};
use crate::remote::http::RemoteClientConfig;
use crate::remote::{
    HttpLogIngestion, HttpObjectStore, IngestionError, ObjectAddress, ObjectStoreError,
};
use crate::shipper::chunked::ChunkedObjectWriter;
use crate::shipper::sink::OutputSink;
use crate::shipper::LogShipper;
use crate::watcher::SignalWatcher;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Exit code reported when the agent itself fails before or outside the
/// command's own run (startup failure, flag validation).
pub const AGENT_EXIT_CODE: i32 = 254;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config not found; use --config or place one at ~/.config/remex/config.yml")]
    ConfigMissing,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("instance id error: {0}")]
    Instance(#[from] InstanceError),

    #[error("object store client error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("log ingestion client error: {0}")]
    Ingestion(#[from] IngestionError),

    #[error("agent error: {0}")]
    Agent(#[from] crate::agent::AgentError),
}

#[derive(Debug, Clone)]
pub struct Options {
    pub config_path: Option<PathBuf>,
    pub log_group: String,
    pub log_stream: Option<String>,
    pub signal: ObjectAddress,
    pub script: Option<ObjectAddress>,
    pub command: Vec<String>,
    pub result: Option<ObjectAddress>,
    pub chunk_output: Option<ChunkOutputOptions>,
    pub upload_interval: Duration,
    pub signal_interval: Duration,
    pub check_signal_before_start: bool,
}

#[derive(Debug, Clone)]
pub struct ChunkOutputOptions {
    pub bucket: String,
    pub key_prefix: String,
    pub max_chunk_size: usize,
}

/// Builds the agent from config + options and runs it to completion,
/// returning the process exit code to report.
pub async fn run(options: Options) -> Result<i32, RunError> {
    let config_path = options
        .config_path
        .clone()
        .ok_or(RunError::ConfigMissing)?;
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(&config_path)?;

    let source = resolve_source(&options)?;

    let store = Arc::new(HttpObjectStore::new(&RemoteClientConfig {
        base_url: config.object_store_url.clone(),
        timeout: config.request_timeout,
        auth_token: config.auth_token.clone(),
    })?);

    let sink = build_sink(&options, &config, store.clone()).await?;

    let watcher = SignalWatcher::new(
        store.clone(),
        options.signal.clone(),
        options.signal_interval,
    );

    let agent = Agent {
        store,
        sink,
        source,
        watcher,
        check_signal_before_start: options.check_signal_before_start,
        result_address: options.result.clone(),
    };
    let code = agent.run().await?;
    Ok(code)
}

fn resolve_source(options: &Options) -> Result<ExecSource, RunError> {
    match (&options.script, options.command.as_slice()) {
        (Some(address), []) => Ok(ExecSource::Remote {
            address: address.clone(),
        }),
        (None, [program, args @ ..]) => Ok(ExecSource::Local {
            program: PathBuf::from(program),
            args: args.to_vec(),
        }),
        (Some(_), [_, ..]) => Err(RunError::InvalidOptions(
            "a script address and a local command are mutually exclusive".to_string(),
        )),
        (None, []) => Err(RunError::InvalidOptions(
            "either a script address or a command must be given".to_string(),
        )),
    }
}

async fn build_sink(
    options: &Options,
    config: &Config,
    store: Arc<HttpObjectStore>,
) -> Result<OutputSink, RunError> {
    if let Some(chunks) = &options.chunk_output {
        return Ok(OutputSink::Chunks(ChunkedObjectWriter::new(
            store,
            chunks.bucket.clone(),
            chunks.key_prefix.clone(),
            options.upload_interval,
            chunks.max_chunk_size,
        )));
    }

    let stream = match &options.log_stream {
        Some(stream) => stream.clone(),
        None => instance_id(&config.metadata_url).await?,
    };
    info!(group = %options.log_group, stream = %stream, "Shipping output to log stream");

    let ingestion = Arc::new(HttpLogIngestion::new(&RemoteClientConfig {
        base_url: config.log_ingestion_url.clone(),
        timeout: config.request_timeout,
        auth_token: config.auth_token.clone(),
    })?);

    Ok(OutputSink::Stream(LogShipper::new(
        ingestion,
        options.log_group.clone(),
        stream,
        options.upload_interval,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_options() -> Options {
        Options {
            config_path: None,
            log_group: "group".to_string(),
            log_stream: Some("stream".to_string()),
            signal: ObjectAddress::new("ops", "signal.json"),
            script: None,
            command: vec![],
            result: None,
            chunk_output: None,
            upload_interval: Duration::from_secs(10),
            signal_interval: Duration::from_secs(10),
            check_signal_before_start: false,
        }
    }

    #[test]
    fn test_resolve_source_local_command() {
        let mut options = base_options();
        options.command = vec!["/bin/echo".to_string(), "hi".to_string()];

        let source = resolve_source(&options).unwrap();
        match source {
            ExecSource::Local { program, args } => {
                assert_eq!(program, PathBuf::from("/bin/echo"));
                assert_eq!(args, vec!["hi".to_string()]);
            }
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_source_remote_script() {
        let mut options = base_options();
        options.script = Some(ObjectAddress::new("scripts", "run.sh"));

        let source = resolve_source(&options).unwrap();
        assert!(matches!(source, ExecSource::Remote { .. }));
    }

    #[test]
    fn test_resolve_source_rejects_both_and_neither() {
        let options = base_options();
        assert!(matches!(
            resolve_source(&options),
            Err(RunError::InvalidOptions(_))
        ));

        let mut options = base_options();
        options.script = Some(ObjectAddress::new("scripts", "run.sh"));
        options.command = vec!["/bin/true".to_string()];
        assert!(matches!(
            resolve_source(&options),
            Err(RunError::InvalidOptions(_))
        ));
    }
}
