use clap::error::ErrorKind;
use clap::Parser;
use remex::cli::run::{self, ChunkOutputOptions, Options, AGENT_EXIT_CODE};
use remex::config::parse_duration;
use remex::remote::ObjectAddress;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "remex")]
#[command(about = "Runs a command and ships its output to a remote log stream", long_about = None)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log group the command's output is shipped to.
    #[arg(long)]
    output_log_group: String,

    /// Log stream name; defaults to the instance id.
    #[arg(long)]
    output_log_stream: Option<String>,

    /// Bucket polled for the signal marker object.
    #[arg(long)]
    signal_bucket: String,

    /// Key polled for the signal marker object.
    #[arg(long)]
    signal_key: String,

    /// Bucket holding the script to fetch and run, instead of a local command.
    #[arg(long, requires = "script_key")]
    script_bucket: Option<String>,

    #[arg(long, requires = "script_bucket")]
    script_key: Option<String>,

    /// Bucket the termination result object is written to.
    #[arg(long, requires = "result_key")]
    result_bucket: Option<String>,

    #[arg(long, requires = "result_bucket")]
    result_key: Option<String>,

    /// Ship output as size-capped chunk objects into this bucket instead of
    /// a log stream.
    #[arg(long, requires = "output_key_prefix")]
    output_bucket: Option<String>,

    #[arg(long, requires = "output_bucket")]
    output_key_prefix: Option<String>,

    /// Roll to a new chunk object once the current one reaches this size.
    #[arg(long, default_value_t = 5 * 1024 * 1024)]
    max_chunk_size: usize,

    /// How often buffered output is flushed upstream.
    #[arg(long, default_value = "10s", value_parser = parse_duration_arg)]
    upload_interval: Duration,

    /// How often the signal marker object is polled.
    #[arg(long, default_value = "10s", value_parser = parse_duration_arg)]
    signal_interval: Duration,

    /// Check for an existing signal marker before starting the command and
    /// abort the run if one is present.
    #[arg(long)]
    check_signal_before_start: bool,

    /// Local command and arguments to run (omit when using --script-bucket).
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remex=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Flag and validation errors are agent failures, not command failures,
    // and report the agent sentinel code; help and version stay exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => AGENT_EXIT_CODE,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    let config_path = resolve_config_path(cli.config);

    let options = Options {
        config_path,
        log_group: cli.output_log_group,
        log_stream: cli.output_log_stream,
        signal: ObjectAddress::new(cli.signal_bucket, cli.signal_key),
        script: match (cli.script_bucket, cli.script_key) {
            (Some(bucket), Some(key)) => Some(ObjectAddress::new(bucket, key)),
            _ => None,
        },
        command: cli.command,
        result: match (cli.result_bucket, cli.result_key) {
            (Some(bucket), Some(key)) => Some(ObjectAddress::new(bucket, key)),
            _ => None,
        },
        chunk_output: match (cli.output_bucket, cli.output_key_prefix) {
            (Some(bucket), Some(key_prefix)) => Some(ChunkOutputOptions {
                bucket,
                key_prefix,
                max_chunk_size: cli.max_chunk_size,
            }),
            _ => None,
        },
        upload_interval: cli.upload_interval,
        signal_interval: cli.signal_interval,
        check_signal_before_start: cli.check_signal_before_start,
    };

    let code = match run::run(options).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Agent failed");
            AGENT_EXIT_CODE
        }
    };
    std::process::exit(code);
}

fn resolve_config_path(explicit_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path);
    }

    // Check ~/.config/remex/config.yml
    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/remex/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    // Check /etc/remex/config.yml
    let system_config = PathBuf::from("/etc/remex/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}
