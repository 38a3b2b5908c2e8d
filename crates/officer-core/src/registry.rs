//! Tunnel registry
//!
//! One mutex guards the whole collection: duplicate checks, capacity and
//! per-record updates all happen under it. The lock is never held across an
//! `.await`.

use chrono::{DateTime, Local};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SupervisorError;
use crate::event_log::EventLog;
use crate::tunnel::{TunnelSpec, TunnelStatus};

/// Default maximum number of tunnels
pub const DEFAULT_CAPACITY: usize = 32;

/// Handle to the worker task currently assigned to a record
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    /// Resolves to the event log once the worker exits
    pub(crate) task: JoinHandle<EventLog>,
    /// Wakes the worker out of its exit wait or backoff
    pub(crate) cancel_tx: mpsc::Sender<()>,
}

impl WorkerSlot {
    /// False once the task has returned or panicked
    pub(crate) fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Configuration plus runtime state of one tunnel
#[derive(Debug)]
pub struct TunnelRecord {
    pub spec: TunnelSpec,
    pub status: TunnelStatus,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Local>>,
    /// Operator intent; `status` is what was observed
    pub should_run: bool,
    pub(crate) worker: Option<WorkerSlot>,
    pub(crate) event_log: Option<EventLog>,
}

impl TunnelRecord {
    fn new(spec: TunnelSpec, event_log: EventLog) -> Self {
        Self {
            spec,
            status: TunnelStatus::Stopped,
            restart_count: 0,
            last_restart: None,
            should_run: false,
            worker: None,
            event_log: Some(event_log),
        }
    }

    fn has_live_worker(&self) -> bool {
        self.worker.as_ref().is_some_and(WorkerSlot::is_live)
    }

    fn view(&self) -> RecordView {
        RecordView {
            spec: self.spec.clone(),
            status: self.status,
            restart_count: self.restart_count,
            last_restart: self.last_restart,
            should_run: self.should_run,
            has_worker: self.has_live_worker(),
        }
    }
}

/// Copy of a record's observable fields
#[derive(Debug, Clone, PartialEq)]
pub struct RecordView {
    pub spec: TunnelSpec,
    pub status: TunnelStatus,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Local>>,
    pub should_run: bool,
    pub has_worker: bool,
}

impl RecordView {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

#[derive(Debug)]
struct RegistryState {
    records: Vec<TunnelRecord>,
    supervision_active: bool,
}

impl RegistryState {
    fn record_mut(&mut self, name: &str) -> Option<&mut TunnelRecord> {
        self.records.iter_mut().find(|r| r.spec.name == name)
    }
}

/// Ordered, locked collection of tunnel records
#[derive(Debug)]
pub struct Registry {
    state: Mutex<RegistryState>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                records: Vec::new(),
                supervision_active: true,
            }),
            capacity,
        }
    }

    // Critical sections never leave the state half-updated; poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new tunnel in the `Stopped` state
    pub fn add(&self, spec: TunnelSpec, event_log: EventLog) -> Result<(), SupervisorError> {
        spec.validate()?;

        let mut state = self.lock();
        if state.records.iter().any(|r| r.spec.name == spec.name) {
            return Err(SupervisorError::DuplicateName(spec.name));
        }
        if state.records.len() >= self.capacity {
            return Err(SupervisorError::CapacityExceeded(self.capacity));
        }
        state.records.push(TunnelRecord::new(spec, event_log));
        Ok(())
    }

    pub fn find(&self, name: &str) -> Result<RecordView, SupervisorError> {
        self.lock()
            .records
            .iter()
            .find(|r| r.spec.name == name)
            .map(TunnelRecord::view)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().records.iter().any(|r| r.spec.name == name)
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Static configuration of every tunnel, in registration order
    pub fn specs(&self) -> Vec<TunnelSpec> {
        self.lock().records.iter().map(|r| r.spec.clone()).collect()
    }

    /// Copy every record's observable fields, then release the lock
    pub fn snapshot(&self) -> Vec<RecordView> {
        self.lock().records.iter().map(TunnelRecord::view).collect()
    }

    /// Run `f` against every record while holding the lock
    pub fn inspect<R>(&self, f: impl FnOnce(&[TunnelRecord]) -> R) -> R {
        f(&self.lock().records)
    }

    pub fn active_workers(&self) -> usize {
        self.lock()
            .records
            .iter()
            .filter(|r| r.has_live_worker())
            .count()
    }

    pub fn supervision_active(&self) -> bool {
        self.lock().supervision_active
    }

    pub fn set_supervision_active(&self, active: bool) {
        self.lock().supervision_active = active;
    }

    /// Drop every event log sink
    pub fn close_logs(&self) {
        for record in self.lock().records.iter_mut() {
            record.event_log = None;
        }
    }

    pub(crate) fn with_record<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut TunnelRecord) -> R,
    ) -> Result<R, SupervisorError> {
        let mut state = self.lock();
        state
            .record_mut(name)
            .map(f)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    pub(crate) fn for_each_record(&self, mut f: impl FnMut(&mut TunnelRecord)) {
        for record in self.lock().records.iter_mut() {
            f(record);
        }
    }

    /// Whether the worker for `name` should start another attempt
    pub(crate) fn should_continue(&self, name: &str) -> bool {
        let mut state = self.lock();
        let active = state.supervision_active;
        state
            .record_mut(name)
            .map(|r| r.should_run && active)
            .unwrap_or(false)
    }

    pub(crate) fn set_status(&self, name: &str, status: TunnelStatus) {
        if let Some(record) = self.lock().record_mut(name) {
            record.status = status;
        }
    }

    /// Enter `Starting`: bump the restart counter and stamp the attempt
    pub(crate) fn begin_attempt(&self, name: &str) -> Option<u32> {
        self.lock().record_mut(name).map(|record| {
            record.status = TunnelStatus::Starting;
            record.restart_count += 1;
            record.last_restart = Some(Local::now());
            record.restart_count
        })
    }

    /// Settle after an exit: `Stopped` once intent is gone, `fallback` otherwise.
    /// Returns whether the worker should keep going.
    pub(crate) fn settle(&self, name: &str, fallback: TunnelStatus) -> bool {
        let mut state = self.lock();
        let active = state.supervision_active;
        match state.record_mut(name) {
            Some(record) if record.should_run && active => {
                record.status = fallback;
                true
            }
            Some(record) => {
                record.status = TunnelStatus::Stopped;
                false
            }
            None => false,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::test_spec;

    fn registry_with(names: &[&str]) -> Registry {
        let registry = Registry::default();
        for name in names {
            registry
                .add(test_spec(name), EventLog::disabled(name))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_add_and_find() {
        let registry = registry_with(&["db", "web"]);

        assert_eq!(registry.len(), 2);
        let view = registry.find("web").unwrap();
        assert_eq!(view.status, TunnelStatus::Stopped);
        assert_eq!(view.restart_count, 0);
        assert!(!view.should_run);
        assert!(!view.has_worker);
    }

    #[test]
    fn test_add_duplicate() {
        let registry = registry_with(&["db"]);
        let result = registry.add(test_spec("db"), EventLog::disabled("db"));
        assert_eq!(
            result,
            Err(SupervisorError::DuplicateName("db".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_over_capacity() {
        let registry = Registry::new(2);
        registry.add(test_spec("a"), EventLog::disabled("a")).unwrap();
        registry.add(test_spec("b"), EventLog::disabled("b")).unwrap();

        assert!(registry.is_full());
        let result = registry.add(test_spec("c"), EventLog::disabled("c"));
        assert_eq!(result, Err(SupervisorError::CapacityExceeded(2)));
    }

    #[test]
    fn test_add_invalid_name() {
        let registry = Registry::default();
        let result = registry.add(test_spec("bad name"), EventLog::disabled("bad"));
        assert!(matches!(result, Err(SupervisorError::InvalidTunnel(_))));
    }

    #[test]
    fn test_find_not_found() {
        let registry = registry_with(&["db"]);
        assert_eq!(
            registry.find("nope"),
            Err(SupervisorError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let registry = registry_with(&["zeta", "alpha", "mid"]);
        let names: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|v| v.name().to_string())
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_begin_attempt_increments() {
        let registry = registry_with(&["db"]);

        assert_eq!(registry.begin_attempt("db"), Some(1));
        assert_eq!(registry.begin_attempt("db"), Some(2));
        let view = registry.find("db").unwrap();
        assert_eq!(view.status, TunnelStatus::Starting);
        assert!(view.last_restart.is_some());
        assert_eq!(registry.begin_attempt("missing"), None);
    }

    #[test]
    fn test_should_continue_honours_global_flag() {
        let registry = registry_with(&["db"]);
        assert!(!registry.should_continue("db"));

        registry.with_record("db", |r| r.should_run = true).unwrap();
        assert!(registry.should_continue("db"));

        registry.set_supervision_active(false);
        assert!(!registry.should_continue("db"));
    }

    #[test]
    fn test_settle() {
        let registry = registry_with(&["db"]);
        registry.with_record("db", |r| r.should_run = true).unwrap();

        assert!(registry.settle("db", TunnelStatus::Reconnecting));
        assert_eq!(registry.find("db").unwrap().status, TunnelStatus::Reconnecting);

        registry.with_record("db", |r| r.should_run = false).unwrap();
        assert!(!registry.settle("db", TunnelStatus::Reconnecting));
        assert_eq!(registry.find("db").unwrap().status, TunnelStatus::Stopped);
    }

    #[test]
    fn test_close_logs() {
        let registry = registry_with(&["db", "web"]);
        registry.close_logs();
        registry.inspect(|records| {
            assert!(records.iter().all(|r| r.event_log.is_none()));
        });
    }
}
