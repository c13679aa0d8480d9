pub mod exit;

use crate::remote::{ObjectAddress, ObjectStore, ObjectStoreError};
use crate::shipper::sink::OutputWriter;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to fetch script from {address}: {source}")]
    ScriptFetch {
        address: ObjectAddress,
        source: ObjectStoreError,
    },

    #[error("script not found at {0}")]
    ScriptNotFound(ObjectAddress),

    #[error("failed to stage script: {0}")]
    ScriptStage(#[from] std::io::Error),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("spawned process has no pid")]
    MissingPid,

    #[error("invalid signal number {0}")]
    InvalidSignal(i32),

    #[error("failed to deliver signal {signal} to pid {pid}: {errno}")]
    SignalDelivery {
        signal: i32,
        pid: i32,
        errno: nix::errno::Errno,
    },
}

/// What to execute: a program already on this host, or a script fetched from
/// the object store.
#[derive(Debug, Clone)]
pub enum ExecSource {
    Local { program: PathBuf, args: Vec<String> },
    Remote { address: ObjectAddress },
}

/// Result of waiting on the child, decided once at the OS boundary so no
/// later code inspects raw wait errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled,
    /// The platform reported termination without an interpretable status.
    Unknown,
    /// Waiting itself failed.
    WaitFailed(String),
}

fn wait_outcome(result: std::io::Result<ExitStatus>) -> WaitOutcome {
    match result {
        Ok(status) => match status.code() {
            Some(code) => WaitOutcome::Exited(code),
            None if status.signal().is_some() => WaitOutcome::Signaled,
            None => WaitOutcome::Unknown,
        },
        Err(e) => WaitOutcome::WaitFailed(e.to_string()),
    }
}

pub struct CommandRunner {
    store: Arc<dyn ObjectStore>,
    source: ExecSource,
    writer: OutputWriter,
}

/// Handle to the spawned command: signal delivery plus the single
/// termination event.
pub struct RunningCommand {
    pid: i32,
    wait_rx: oneshot::Receiver<WaitOutcome>,
}

impl CommandRunner {
    pub fn new(store: Arc<dyn ObjectStore>, source: ExecSource, writer: OutputWriter) -> Self {
        Self {
            store,
            source,
            writer,
        }
    }

    /// Resolves the executable, spawns it with stdout and stderr routed into
    /// the output sink, and returns a handle yielding exactly one
    /// termination outcome. Any failure before the process is running is
    /// fatal: the command never ran, so there is nothing to report.
    pub async fn start(self) -> Result<RunningCommand, CommandError> {
        let CommandRunner {
            store,
            source,
            writer,
        } = self;

        let (program, args, staged) = match source {
            ExecSource::Local { program, args } => (program, args, None),
            ExecSource::Remote { address } => {
                let path = stage_script(store.as_ref(), &address).await?;
                (path.to_path_buf(), Vec::new(), Some(path))
            }
        };

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(program = %program.display(), "Starting command");
        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id().ok_or(CommandError::MissingPid)? as i32;

        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_output(stdout, writer.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_output(stderr, writer.clone())));
        }

        let (wait_tx, wait_rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = wait_outcome(child.wait().await);
            // The pipes can outlive the child (inherited by grandchildren);
            // the outcome is reported only once both pumps reach EOF, so no
            // output can arrive at the sink after the exit marker.
            for pump in pumps {
                let _ = pump.await;
            }
            debug!(?outcome, "Command wait completed");
            // Dropping the staged temp path removes the script file.
            drop(staged);
            let _ = wait_tx.send(outcome);
        });

        Ok(RunningCommand { pid, wait_rx })
    }
}

/// Downloads the script to a private temp file and marks it
/// user-executable. The write handle is closed before spawning so the
/// kernel does not refuse to exec a file held open for writing.
async fn stage_script(
    store: &dyn ObjectStore,
    address: &ObjectAddress,
) -> Result<tempfile::TempPath, CommandError> {
    info!(address = %address, "Downloading script");
    let body = store
        .get(address)
        .await
        .map_err(|source| CommandError::ScriptFetch {
            address: address.clone(),
            source,
        })?
        .ok_or_else(|| CommandError::ScriptNotFound(address.clone()))?;

    let mut file = tempfile::Builder::new().prefix("remex-script-").tempfile()?;
    file.write_all(&body)?;
    file.flush()?;

    let mut perms = file.as_file().metadata()?.permissions();
    perms.set_mode(0o700);
    file.as_file().set_permissions(perms)?;

    debug!(path = %file.path().display(), bytes = body.len(), "Staged script");
    Ok(file.into_temp_path())
}

impl RunningCommand {
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Delivers an OS signal to the running process. Once the process has
    /// been reaped this fails, which callers treat as a dropped signal.
    pub fn signal(&self, signal: i32) -> Result<(), CommandError> {
        let sig = nix::sys::signal::Signal::try_from(signal)
            .map_err(|_| CommandError::InvalidSignal(signal))?;

        info!(signal = signal, pid = self.pid, "Sending signal to command");
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(self.pid), sig).map_err(|errno| {
            CommandError::SignalDelivery {
                signal,
                pid: self.pid,
                errno,
            }
        })
    }

    /// The single termination event, usable inside `select!`.
    pub fn wait_event(&mut self) -> &mut oneshot::Receiver<WaitOutcome> {
        &mut self.wait_rx
    }
}

/// Copies a child output pipe into the sink in arbitrary chunk sizes; line
/// reassembly happens inside the sink.
async fn pump_output<R>(mut reader: R, writer: OutputWriter)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => writer.write(&chunk[..n]),
            Err(e) => {
                warn!(error = %e, "Reading command output failed");
                break;
            }
        }
    }
}
