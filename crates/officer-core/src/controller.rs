//! Start/stop/reset orchestration
//!
//! Controller operations are serialised by an async gate that workers never
//! touch, so a join can be awaited while holding it. The registry lock is
//! only taken around the short sections that read or flip record fields and
//! is always released before awaiting a worker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::error::SupervisorError;
use crate::event_log::EventLog;
use crate::launcher::Launcher;
use crate::registry::{Registry, TunnelRecord, WorkerSlot};
use crate::tunnel::{TunnelSpec, TunnelStatus};
use crate::worker::{SupervisorWorker, WorkerTiming};

/// Settings applied to every worker
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Program used to open tunnels
    pub ssh_program: String,
    /// Directory for per-tunnel event logs; `None` logs through tracing only
    pub log_dir: Option<PathBuf>,
    pub timing: WorkerTiming,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            log_dir: Some(PathBuf::from("logs")),
            timing: WorkerTiming::default(),
        }
    }
}

/// Result of starting a single tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Result of stopping a single tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Per-tunnel results of `start_all`
#[derive(Debug, Default, Clone)]
pub struct StartAllReport {
    pub started: Vec<String>,
    pub already_running: Vec<String>,
    pub failed: Vec<SupervisorError>,
}

pub struct SupervisionController {
    registry: Arc<Registry>,
    launcher: Arc<dyn Launcher>,
    settings: SupervisorSettings,
    gate: Mutex<()>,
}

impl SupervisionController {
    pub fn new(
        registry: Arc<Registry>,
        launcher: Arc<dyn Launcher>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            registry,
            launcher,
            settings,
            gate: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Register a new, stopped tunnel and open its event log
    pub fn add_tunnel(&self, spec: TunnelSpec) -> Result<(), SupervisorError> {
        spec.validate()?;
        if self.registry.contains(&spec.name) {
            return Err(SupervisorError::DuplicateName(spec.name));
        }
        if self.registry.is_full() {
            return Err(SupervisorError::CapacityExceeded(self.registry.capacity()));
        }

        let log = EventLog::open_or_disabled(self.settings.log_dir.as_deref(), &spec.name);
        let name = spec.name.clone();
        self.registry.add(spec, log)?;
        info!(tunnel = %name, "Tunnel added");
        Ok(())
    }

    /// Start every tunnel that has no worker yet
    pub async fn start_all(&self) -> StartAllReport {
        let _gate = self.gate.lock().await;

        self.reap_finished(None).await;
        let active = self.registry.supervision_active();
        let mut logs = self.reopen_logs(None, active);

        let mut report = StartAllReport::default();
        self.registry.for_each_record(|record| {
            let name = record.spec.name.clone();
            let log = logs.remove(&name);
            match self.spawn_worker(record, active, log) {
                Ok(StartOutcome::Started) => report.started.push(name),
                Ok(StartOutcome::AlreadyRunning) => report.already_running.push(name),
                Err(e) => {
                    error!(tunnel = %name, "{}", e);
                    report.failed.push(e);
                }
            }
        });
        report
    }

    /// Withdraw intent from every tunnel and wait for all workers to finish.
    /// Returns the number of workers joined.
    pub async fn stop_all(&self) -> usize {
        let _gate = self.gate.lock().await;

        let mut slots = Vec::new();
        self.registry.for_each_record(|record| {
            record.should_run = false;
            if let Some(slot) = record.worker.take() {
                slots.push((record.spec.name.clone(), slot));
            }
        });

        for (_, slot) in &slots {
            let _ = slot.cancel_tx.try_send(());
        }

        let joined = slots.len();
        for (name, slot) in slots {
            self.join(&name, slot).await;
        }
        joined
    }

    pub async fn start_by_name(&self, name: &str) -> Result<StartOutcome, SupervisorError> {
        let _gate = self.gate.lock().await;
        self.start_one(name).await
    }

    pub async fn stop_by_name(&self, name: &str) -> Result<StopOutcome, SupervisorError> {
        let _gate = self.gate.lock().await;
        self.stop_one(name).await
    }

    /// Stop, clear the restart counter, start again
    pub async fn reset_by_name(&self, name: &str) -> Result<(), SupervisorError> {
        let _gate = self.gate.lock().await;

        self.stop_one(name).await?;
        self.registry.with_record(name, |record| record.restart_count = 0)?;
        self.start_one(name).await?;
        info!(tunnel = %name, "Tunnel reset");
        Ok(())
    }

    /// Stop supervising: clear the global flag, drain all workers, close logs
    pub async fn shutdown(&self) {
        self.registry.set_supervision_active(false);
        let joined = self.stop_all().await;
        self.registry.close_logs();
        info!("Supervision stopped ({} worker(s) joined)", joined);
    }

    async fn start_one(&self, name: &str) -> Result<StartOutcome, SupervisorError> {
        self.reap_finished(Some(name)).await;
        let active = self.registry.supervision_active();
        let log = self.reopen_logs(Some(name), active).remove(name);

        let outcome = self
            .registry
            .with_record(name, |record| self.spawn_worker(record, active, log))??;
        match outcome {
            StartOutcome::Started => info!(tunnel = %name, "Tunnel started"),
            StartOutcome::AlreadyRunning => warn!(tunnel = %name, "Tunnel is already running"),
        }
        Ok(outcome)
    }

    async fn stop_one(&self, name: &str) -> Result<StopOutcome, SupervisorError> {
        let slot = self.registry.with_record(name, |record| {
            record.should_run = false;
            record.worker.take()
        })?;

        match slot {
            Some(slot) => {
                let _ = slot.cancel_tx.try_send(());
                self.join(name, slot).await;
                info!(tunnel = %name, "Tunnel stopped");
                Ok(StopOutcome::Stopped)
            }
            None => Ok(StopOutcome::NotRunning),
        }
    }

    /// Join workers whose task ended without being stopped (a panic, for one)
    async fn reap_finished(&self, only: Option<&str>) {
        let mut finished = Vec::new();
        self.registry.for_each_record(|record| {
            if only.is_some_and(|name| name != record.spec.name) {
                return;
            }
            if record.worker.as_ref().is_some_and(|slot| !slot.is_live()) {
                if let Some(slot) = record.worker.take() {
                    finished.push((record.spec.name.clone(), slot));
                }
            }
        });

        for (name, slot) in finished {
            warn!(tunnel = %name, "Reaping finished worker");
            self.join(&name, slot).await;
        }
    }

    /// Open event logs for idle records that lost theirs. Runs before the
    /// registry lock is taken for spawning.
    fn reopen_logs(&self, only: Option<&str>, active: bool) -> HashMap<String, EventLog> {
        if !active {
            return HashMap::new();
        }
        let missing: Vec<String> = self.registry.inspect(|records| {
            records
                .iter()
                .filter(|r| only.map_or(true, |name| r.spec.name == name))
                .filter(|r| r.worker.is_none() && r.event_log.is_none())
                .map(|r| r.spec.name.clone())
                .collect()
        });

        missing
            .into_iter()
            .map(|name| {
                let log = EventLog::open_or_disabled(self.settings.log_dir.as_deref(), &name);
                (name, log)
            })
            .collect()
    }

    /// Called with the registry lock held
    fn spawn_worker(
        &self,
        record: &mut TunnelRecord,
        active: bool,
        log: Option<EventLog>,
    ) -> Result<StartOutcome, SupervisorError> {
        match &record.worker {
            Some(slot) if slot.is_live() => return Ok(StartOutcome::AlreadyRunning),
            Some(_) => {
                warn!(tunnel = %record.spec.name, "Replacing finished worker");
                record.worker = None;
            }
            None => {}
        }

        if !active {
            record.should_run = false;
            return Err(SupervisorError::SpawnFailure {
                name: record.spec.name.clone(),
                reason: "supervision has been shut down".to_string(),
            });
        }

        record.should_run = true;
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                record.should_run = false;
                return Err(SupervisorError::SpawnFailure {
                    name: record.spec.name.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let log = record
            .event_log
            .take()
            .or(log)
            .unwrap_or_else(|| EventLog::disabled(&record.spec.name));
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        let worker = SupervisorWorker::new(
            self.registry.clone(),
            self.launcher.clone(),
            record.spec.clone(),
            self.settings.ssh_program.clone(),
            self.settings.timing.clone(),
            log,
            cancel_rx,
        );
        let task = runtime.spawn(worker.run());
        record.worker = Some(WorkerSlot { task, cancel_tx });
        Ok(StartOutcome::Started)
    }

    /// Wait for a worker to finish and take its event log back
    async fn join(&self, name: &str, slot: WorkerSlot) {
        let log = match slot.task.await {
            Ok(log) => log,
            Err(e) => {
                error!(tunnel = %name, "Worker task failed: {}", e);
                EventLog::open_or_disabled(self.settings.log_dir.as_deref(), name)
            }
        };

        let _ = self.registry.with_record(name, |record| {
            record.should_run = false;
            record.status = TunnelStatus::Stopped;
            if record.event_log.is_none() {
                record.event_log = Some(log);
            }
        });
    }
}
