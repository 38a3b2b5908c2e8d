//! Per-tunnel supervision loop
//!
//! ```text
//! Stopped → Starting → Running → {Reconnecting | Error | AuthError | PortError}
//!                                        → Starting | Stopped
//! ```
//!
//! The worker polls `should_run` and the global supervision flag at the top of
//! every iteration. The controller's cancel signal only shortens the exit wait
//! and the backoff sleep; the worker always terminates its own process.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::classifier::{classify, Category, Classification};
use crate::event_log::EventLog;
use crate::launcher::{LaunchCommand, Launcher, TunnelProcess, SIGNALLED_EXIT_CODE};
use crate::registry::Registry;
use crate::tunnel::{Direction, TunnelSpec, TunnelStatus};

/// Timing knobs shared by all workers
#[derive(Debug, Clone)]
pub struct WorkerTiming {
    /// Grace probe for forward tunnels
    pub forward_grace: Duration,
    /// Grace probe for reverse tunnels; the listener is remote and slower to come up
    pub reverse_grace: Duration,
}

impl Default for WorkerTiming {
    fn default() -> Self {
        Self {
            forward_grace: Duration::from_secs(2),
            reverse_grace: Duration::from_secs(5),
        }
    }
}

impl WorkerTiming {
    pub fn grace_for(&self, direction: Direction) -> Duration {
        match direction {
            Direction::Forward => self.forward_grace,
            Direction::Reverse => self.reverse_grace,
        }
    }
}

/// What the grace probe observed
struct Probe {
    output: String,
    exit_code: Option<i32>,
}

/// How an attempt ended
enum Outcome {
    /// Retry after the backoff with this status
    Retry(TunnelStatus),
    /// Intent is gone; leave the loop
    Stop,
}

pub(crate) struct SupervisorWorker {
    registry: Arc<Registry>,
    launcher: Arc<dyn Launcher>,
    spec: TunnelSpec,
    program: String,
    timing: WorkerTiming,
    log: EventLog,
    cancel_rx: mpsc::Receiver<()>,
    cancelled: bool,
    restart_count: u32,
}

impl SupervisorWorker {
    pub(crate) fn new(
        registry: Arc<Registry>,
        launcher: Arc<dyn Launcher>,
        spec: TunnelSpec,
        program: String,
        timing: WorkerTiming,
        log: EventLog,
        cancel_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            launcher,
            spec,
            program,
            timing,
            log,
            cancel_rx,
            cancelled: false,
            restart_count: 0,
        }
    }

    fn name(&self) -> &str {
        &self.spec.name
    }

    fn event(&mut self, message: &str) {
        self.log.record(self.restart_count, message);
    }

    /// Run until intent is withdrawn, then hand the event log back
    pub(crate) async fn run(mut self) -> EventLog {
        while self.registry.should_continue(self.name()) {
            let Some(count) = self.registry.begin_attempt(&self.spec.name) else {
                break;
            };
            self.restart_count = count;
            self.event("🚀 Starting SSH tunnel");

            match self.attempt().await {
                Outcome::Retry(status) => {
                    if !self.registry.settle(&self.spec.name, status) {
                        break;
                    }
                    self.backoff().await;
                }
                Outcome::Stop => break,
            }
        }

        self.registry
            .set_status(&self.spec.name, TunnelStatus::Stopped);
        self.event("👋 Tunnel worker exiting");
        self.log
    }

    async fn attempt(&mut self) -> Outcome {
        let command = LaunchCommand::for_tunnel(&self.program, &self.spec);
        debug!(tunnel = %self.spec.name, "Executing: {}", command);
        self.event("📡 Executing SSH command");

        let mut process = match self.launcher.launch(&command).await {
            Ok(process) => process,
            Err(e) => {
                self.event(&format!("❌ Failed to start SSH process: {}", e));
                return Outcome::Retry(TunnelStatus::Error);
            }
        };

        let probe = self.grace_probe(process.as_mut()).await;

        if let Some(code) = probe.exit_code {
            return self.conclude(code, &probe.output);
        }

        let verdict = classify(&probe.output, None);
        if verdict.category.is_terminal() {
            self.report(verdict);
            if let Err(e) = process.terminate().await {
                warn!(tunnel = %self.spec.name, "Failed to terminate ssh: {}", e);
            }
            return Outcome::Retry(status_for(verdict.category));
        }

        if !self.registry.should_continue(self.name()) {
            if let Err(e) = process.terminate().await {
                warn!(tunnel = %self.spec.name, "Failed to terminate ssh: {}", e);
            }
            self.event("🛑 Tunnel stopped by user");
            return Outcome::Stop;
        }

        self.registry
            .set_status(&self.spec.name, TunnelStatus::Running);
        self.event("✅ Tunnel established successfully");

        let code = self.wait_for_exit(process.as_mut()).await;
        let output = process.drain_output().join("\n");
        self.conclude(code, &output)
    }

    /// Wait out the grace period, returning early if the process exits
    async fn grace_probe(&mut self, process: &mut dyn TunnelProcess) -> Probe {
        let grace = self.timing.grace_for(self.spec.direction);

        let exit_code = tokio::select! {
            result = process.wait() => Some(result.unwrap_or(SIGNALLED_EXIT_CODE)),
            _ = tokio::time::sleep(grace) => None,
        };

        Probe {
            output: process.drain_output().join("\n"),
            exit_code,
        }
    }

    /// Block until the process exits or the controller asks us to stop
    async fn wait_for_exit(&mut self, process: &mut dyn TunnelProcess) -> i32 {
        let stop_requested = tokio::select! {
            result = process.wait() => {
                return result.unwrap_or_else(|e| {
                    warn!(tunnel = %self.spec.name, "Failed to wait for ssh: {}", e);
                    SIGNALLED_EXIT_CODE
                });
            }
            _ = self.cancel_rx.recv(), if !self.cancelled => true,
        };

        if stop_requested {
            self.cancelled = true;
            if let Err(e) = process.terminate().await {
                warn!(tunnel = %self.spec.name, "Failed to terminate ssh: {}", e);
            }
        }
        process.wait().await.unwrap_or(SIGNALLED_EXIT_CODE)
    }

    /// Decide what an exited attempt means
    fn conclude(&mut self, exit_code: i32, output: &str) -> Outcome {
        if !self.registry.should_continue(self.name()) {
            self.event("🛑 Tunnel stopped by user");
            return Outcome::Stop;
        }

        let verdict = classify(output, Some(exit_code));
        match verdict.category {
            Category::None => {
                self.event("💔 Tunnel died, reconnecting...");
                Outcome::Retry(TunnelStatus::Reconnecting)
            }
            category => {
                self.report(verdict);
                self.event(&format!("💔 SSH exited with code {}", exit_code));
                Outcome::Retry(status_for(category))
            }
        }
    }

    fn report(&mut self, verdict: Classification) {
        let message = match verdict.marker {
            Some(marker) => format!(
                "❌ {} ('{}'): {}",
                verdict.category,
                marker,
                verdict.category.remediation()
            ),
            None => format!(
                "❌ {}: {}",
                verdict.category,
                verdict.category.remediation()
            ),
        };
        self.event(&message);
    }

    /// Sleep for the reconnect delay, waking early on a stop request
    async fn backoff(&mut self) {
        let delay = Duration::from_secs(self.spec.reconnect_delay);
        if self.cancelled {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel_rx.recv() => self.cancelled = true,
        }
    }
}

fn status_for(category: Category) -> TunnelStatus {
    match category {
        Category::None => TunnelStatus::Reconnecting,
        Category::GenericError => TunnelStatus::Error,
        Category::AuthError => TunnelStatus::AuthError,
        Category::PortError => TunnelStatus::PortError,
    }
}
