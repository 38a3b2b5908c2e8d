//! Interactive command loop
//!
//! Reads one command per line, dispatches it to the controller and prints the
//! outcome. The loop ends on `quit`, end of input, or a shutdown request; the
//! caller is responsible for shutting supervision down afterwards.

use anyhow::{Context, Result};
use officer_core::{
    probe_local_port, CommandError, ControlCommand, Direction, PortProbe, Registry,
    StartOutcome, StatusReporter, StopOutcome, SupervisionController, SupervisorError,
    TunnelSpec, DEFAULT_PROBE_TIMEOUT,
};
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::render::{self, ProbeLine, StatusBoard};
use crate::tunnel_store::TunnelStore;

/// Refresh period of `watch`
pub const WATCH_INTERVAL: Duration = Duration::from_secs(2);

enum Flow {
    Continue,
    Quit,
}

pub struct Console<R, W> {
    controller: Arc<SupervisionController>,
    store: TunnelStore,
    input: Lines<R>,
    out: W,
    shutdown: watch::Receiver<bool>,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(
        controller: Arc<SupervisionController>,
        store: TunnelStore,
        input: R,
        out: W,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            controller,
            store,
            input: input.lines(),
            out,
            shutdown,
        }
    }

    /// Run until `quit`, end of input or shutdown
    pub async fn run(&mut self) -> Result<()> {
        self.show_status()?;
        writeln!(self.out, "{}", render::COMMANDS_HINT)?;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            write!(self.out, "tunnel> ")?;
            self.out.flush()?;

            let line = tokio::select! {
                line = self.input.next_line() => line.context("Failed to read command")?,
                _ = shutdown_requested(&mut self.shutdown) => break,
            };
            let Some(line) = line else {
                writeln!(self.out)?;
                break;
            };

            match ControlCommand::from_str(&line) {
                Ok(command) => {
                    debug!("Console command: {:?}", command);
                    if let Flow::Quit = self.execute(command).await? {
                        break;
                    }
                }
                Err(CommandError::CommandNotRecognized(input)) => writeln!(
                    self.out,
                    "❌ Unknown command: {} (type 'help' for commands)\n",
                    input
                )?,
                Err(e) => writeln!(self.out, "❌ {}", e)?,
            }
        }

        Ok(())
    }

    async fn execute(&mut self, command: ControlCommand) -> Result<Flow> {
        match command {
            ControlCommand::Status => self.show_status()?,
            ControlCommand::Start(None) => {
                writeln!(self.out, "⚡ Starting all tunnels...")?;
                let report = self.controller.start_all().await;
                for e in &report.failed {
                    writeln!(self.out, "❌ {}", e)?;
                }
                writeln!(
                    self.out,
                    "✅ All tunnels started ({} started, {} already running)\n",
                    report.started.len(),
                    report.already_running.len()
                )?;
            }
            ControlCommand::Start(Some(name)) => self.start_tunnel(&name).await?,
            ControlCommand::Stop(None) => {
                writeln!(self.out, "🛑 Stopping all tunnels...")?;
                let joined = self.controller.stop_all().await;
                writeln!(self.out, "✅ All tunnels stopped ({} worker(s) joined)\n", joined)?;
            }
            ControlCommand::Stop(Some(name)) => match self.controller.stop_by_name(&name).await {
                Ok(StopOutcome::Stopped) => writeln!(self.out, "🛑 Stopped tunnel '{}'", name)?,
                Ok(StopOutcome::NotRunning) => {
                    writeln!(self.out, "⚠️  Tunnel '{}' is not running", name)?
                }
                Err(e) => writeln!(self.out, "❌ {}", e)?,
            },
            ControlCommand::Reset(name) => match self.controller.reset_by_name(&name).await {
                Ok(()) => writeln!(self.out, "🔄 Reset tunnel '{}'", name)?,
                Err(e) => writeln!(self.out, "❌ {}", e)?,
            },
            ControlCommand::Add => self.add_tunnel().await?,
            ControlCommand::Test(name) => self.test_ports(name.as_deref()).await?,
            ControlCommand::Watch => self.watch().await?,
            ControlCommand::Help => writeln!(self.out, "{}", render::HELP)?,
            ControlCommand::Quit => {
                writeln!(self.out, "👋 Tunnel Officer signing off...")?;
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    fn show_status(&mut self) -> Result<()> {
        let snapshot = StatusReporter::snapshot(self.controller.registry());
        write!(self.out, "{}", StatusBoard(&snapshot))?;
        writeln!(self.out)?;
        Ok(())
    }

    async fn start_tunnel(&mut self, name: &str) -> Result<()> {
        match self.controller.start_by_name(name).await {
            Ok(StartOutcome::Started) => writeln!(self.out, "🚀 Started tunnel '{}'", name)?,
            Ok(StartOutcome::AlreadyRunning) => {
                writeln!(self.out, "⚠️  Tunnel '{}' is already running", name)?
            }
            Err(e) => writeln!(self.out, "❌ {}", e)?,
        }
        Ok(())
    }

    /// Print `label` and read one answer; `None` on end of input or shutdown
    async fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        write!(self.out, "{}", label)?;
        self.out.flush()?;

        let line = tokio::select! {
            line = self.input.next_line() => line.context("Failed to read input")?,
            _ = shutdown_requested(&mut self.shutdown) => None,
        };
        Ok(line.map(|l| l.trim().to_string()))
    }

    async fn add_tunnel(&mut self) -> Result<()> {
        writeln!(self.out, "\n📝 Adding new tunnel - Interactive Setup")?;
        writeln!(self.out, "{}\n", "─".repeat(41))?;

        let registry = self.controller.registry().clone();
        if registry.is_full() {
            writeln!(
                self.out,
                "❌ {}",
                SupervisorError::CapacityExceeded(registry.capacity())
            )?;
            return Ok(());
        }

        let Some(answers) = self.read_answers().await? else {
            writeln!(self.out, "\n❌ Input ended. Tunnel not added.")?;
            return Ok(());
        };
        let spec = match answers.into_spec() {
            Ok(spec) => spec,
            Err(reason) => {
                writeln!(self.out, "❌ Invalid input ({}). Tunnel not added.", reason)?;
                return Ok(());
            }
        };

        let name = spec.name.clone();
        if let Err(e) = self.controller.add_tunnel(spec) {
            writeln!(self.out, "❌ {}", e)?;
            return Ok(());
        }

        match self.store.save(&registry.specs()) {
            Ok(()) => writeln!(
                self.out,
                "💾 Configuration saved to {}",
                self.store.path().display()
            )?,
            Err(e) => {
                warn!("{}", e);
                writeln!(self.out, "❌ {}", e)?;
            }
        }
        writeln!(self.out, "\n✅ Tunnel '{}' added successfully!", name)?;

        let answer = self.prompt("Start tunnel now? [y/N]: ").await?;
        if matches!(answer.as_deref(), Some("y" | "Y" | "yes")) {
            self.start_tunnel(&name).await?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    async fn read_answers(&mut self) -> Result<Option<WizardAnswers>> {
        let mut fields = Vec::with_capacity(WIZARD_PROMPTS.len());
        for label in WIZARD_PROMPTS {
            match self.prompt(label).await? {
                Some(value) => fields.push(value),
                None => return Ok(None),
            }
        }
        Ok(Some(WizardAnswers(fields)))
    }

    async fn test_ports(&mut self, name: Option<&str>) -> Result<()> {
        let results = match probe_tunnels(self.controller.registry(), name).await {
            Ok(results) => results,
            Err(e) => {
                writeln!(self.out, "❌ {}", e)?;
                return Ok(());
            }
        };

        writeln!(self.out, "🧪 Tested {} tunnel(s):", results.len())?;
        for (spec, probe) in &results {
            writeln!(
                self.out,
                "   {}",
                ProbeLine {
                    name: &spec.name,
                    port: spec.local_port,
                    probe,
                }
            )?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    async fn watch(&mut self) -> Result<()> {
        writeln!(self.out, "🔄 Entering watch mode (press Enter to exit)...\n")?;

        loop {
            write!(self.out, "{}{}", render::CLEAR_SCREEN, render::banner())?;
            self.show_status()?;
            writeln!(
                self.out,
                "Refreshing in {} seconds... (press Enter to exit watch mode)",
                WATCH_INTERVAL.as_secs()
            )?;
            self.out.flush()?;

            tokio::select! {
                _ = tokio::time::sleep(WATCH_INTERVAL) => {}
                line = self.input.next_line() => {
                    line.context("Failed to read input")?;
                    break;
                }
                _ = shutdown_requested(&mut self.shutdown) => break,
            }
        }
        Ok(())
    }
}

const WIZARD_PROMPTS: [&str; 10] = [
    "Tunnel name: ",
    "SSH user: ",
    "SSH host: ",
    "SSH port [22]: ",
    "SSH private key path: ",
    "Direction (forward/reverse) [forward]: ",
    "Local port: ",
    "Remote host: ",
    "Remote port: ",
    "Reconnect delay (s) [5]: ",
];

/// Raw wizard answers, in `WIZARD_PROMPTS` order
struct WizardAnswers(Vec<String>);

impl WizardAnswers {
    fn into_spec(self) -> Result<TunnelSpec, String> {
        let [name, user, host, port, ssh_key, direction, local_port, remote_host, remote_port, delay]: [String; 10] =
            self.0
                .try_into()
                .map_err(|_| "incomplete answers".to_string())?;

        let spec = TunnelSpec {
            name,
            host,
            port: number_or(&port, "SSH port", 22)?,
            user,
            ssh_key,
            direction: direction.parse::<Direction>()?,
            local_port: number_or(&local_port, "local port", 0)?,
            remote_host,
            remote_port: number_or(&remote_port, "remote port", 0)?,
            reconnect_delay: number_or(&delay, "reconnect delay", 5)?,
        };
        spec.validate().map_err(|e| e.to_string())?;
        Ok(spec)
    }
}

/// Parse `value`, using `default` for an empty answer
fn number_or<T: FromStr>(value: &str, field: &str, default: T) -> Result<T, String> {
    if value.is_empty() {
        return Ok(default);
    }
    value
        .parse()
        .map_err(|_| format!("{} '{}' is not a valid number", field, value))
}

/// Resolves once shutdown has been requested; never if the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Probe the local port of one tunnel, or of every tunnel when `name` is `None`.
/// Probes run concurrently; results keep registry order.
pub async fn probe_tunnels(
    registry: &Registry,
    name: Option<&str>,
) -> Result<Vec<(TunnelSpec, PortProbe)>, SupervisorError> {
    let specs = match name {
        Some(name) => vec![registry.find(name)?.spec],
        None => registry.specs(),
    };

    let handles: Vec<_> = specs
        .into_iter()
        .map(|spec| {
            tokio::spawn(async move {
                let probe = probe_local_port(spec.local_port, DEFAULT_PROBE_TIMEOUT).await;
                (spec, probe)
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => warn!("Port probe task failed: {}", e),
        }
    }
    Ok(results)
}
