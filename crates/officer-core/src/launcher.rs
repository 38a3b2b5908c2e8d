//! Launching the `ssh` connection process
//!
//! The worker only sees the [`Launcher`] and [`TunnelProcess`] traits, so tests
//! can script process behaviour without spawning anything.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::tunnel::{Direction, TunnelSpec};

/// Address both ends of a reverse forward bind to
pub const LOOPBACK: &str = "127.0.0.1";

/// Exit code reported when a process was ended by a signal
pub const SIGNALLED_EXIT_CODE: i32 = -1;

const OUTPUT_SETTLE_TIMEOUT: Duration = Duration::from_millis(500);

/// Launch errors
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Process output is not available")]
    MissingOutput,
}

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Build the `ssh` invocation for a tunnel.
    ///
    /// Batch mode keeps `ssh` from prompting, `accept-new` trusts a host key on
    /// first use, and `ExitOnForwardFailure` turns a busy port into an exit
    /// instead of a half-working connection.
    pub fn for_tunnel(program: &str, spec: &TunnelSpec) -> Self {
        let forward = match spec.direction {
            Direction::Forward => vec![
                "-L".to_string(),
                format!(
                    "{}:{}:{}",
                    spec.local_port, spec.remote_host, spec.remote_port
                ),
            ],
            Direction::Reverse => vec![
                "-R".to_string(),
                format!(
                    "{}:{}:{}:{}",
                    LOOPBACK, spec.remote_port, LOOPBACK, spec.local_port
                ),
            ],
        };

        let mut args = vec![
            "-i".to_string(),
            spec.ssh_key.clone(),
            "-N".to_string(),
        ];
        args.extend(forward);
        args.extend([
            format!("{}@{}", spec.user, spec.host),
            "-p".to_string(),
            spec.port.to_string(),
        ]);
        for option in [
            "ConnectTimeout=10",
            "ServerAliveInterval=30",
            "ServerAliveCountMax=3",
            "BatchMode=yes",
            "StrictHostKeyChecking=accept-new",
            "ExitOnForwardFailure=yes",
            "IdentitiesOnly=yes",
        ] {
            args.push("-o".to_string());
            args.push(option.to_string());
        }

        Self {
            program: program.to_string(),
            args,
        }
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Starts connection processes
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, command: &LaunchCommand) -> Result<Box<dyn TunnelProcess>, LaunchError>;
}

/// A running connection process with merged stdout/stderr
#[async_trait]
pub trait TunnelProcess: Send {
    /// Output lines buffered so far, without waiting for more
    fn drain_output(&mut self) -> Vec<String>;

    /// Wait for the process to exit and return its exit code.
    ///
    /// Must be cancel-safe: the worker races it against timers.
    async fn wait(&mut self) -> io::Result<i32>;

    /// Kill the process and reap it
    async fn terminate(&mut self) -> io::Result<()>;
}

/// Launches real processes with `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct SshLauncher;

impl SshLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for SshLauncher {
    async fn launch(&self, command: &LaunchCommand) -> Result<Box<dyn TunnelProcess>, LaunchError> {
        debug!("Executing: {}", command);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(LaunchError::MissingOutput)?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingOutput)?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let readers = vec![
            spawn_line_reader(stdout, output_tx.clone()),
            spawn_line_reader(stderr, output_tx),
        ];

        Ok(Box::new(SshProcess {
            child,
            output_rx,
            readers,
        }))
    }
}

fn spawn_line_reader<R>(stream: R, output_tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if output_tx.send(line).is_err() {
                break;
            }
        }
    })
}

struct SshProcess {
    child: Child,
    output_rx: mpsc::UnboundedReceiver<String>,
    readers: Vec<JoinHandle<()>>,
}

impl SshProcess {
    /// Give the readers a moment to forward whatever the process wrote last
    async fn settle_output(&mut self) {
        for reader in std::mem::take(&mut self.readers) {
            let _ = tokio::time::timeout(OUTPUT_SETTLE_TIMEOUT, reader).await;
        }
    }
}

#[async_trait]
impl TunnelProcess for SshProcess {
    fn drain_output(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.output_rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    async fn wait(&mut self) -> io::Result<i32> {
        // Child caches its exit status, so a cancelled wait can be retried.
        let status = self.child.wait().await?;
        self.settle_output().await;
        Ok(status.code().unwrap_or(SIGNALLED_EXIT_CODE))
    }

    async fn terminate(&mut self) -> io::Result<()> {
        match self.child.kill().await {
            Err(e) if e.kind() != io::ErrorKind::InvalidInput => Err(e),
            _ => Ok(()),
        }
    }
}
