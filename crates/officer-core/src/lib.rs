//! Tunnel supervision core
//!
//! Keeps a fleet of `ssh` port forwards alive: one worker task per tunnel
//! launches the connection process, classifies failures from its output and
//! exit status, and restarts it after the tunnel's reconnect delay. All
//! runtime state lives in a single locked [`Registry`] that the
//! [`SupervisionController`] and the [`StatusReporter`] share with the workers.

pub mod classifier;
pub mod command;
pub mod controller;
pub mod error;
pub mod event_log;
pub mod launcher;
pub mod probe;
pub mod registry;
pub mod reporter;
pub mod tunnel;
pub mod worker;

pub use classifier::{classify, Category, Classification};
pub use command::{CommandError, ControlCommand};
pub use controller::{
    StartAllReport, StartOutcome, StopOutcome, SupervisionController, SupervisorSettings,
};
pub use error::SupervisorError;
pub use event_log::EventLog;
pub use launcher::{LaunchCommand, LaunchError, Launcher, SshLauncher, TunnelProcess};
pub use probe::{probe_local_port, PortProbe, DEFAULT_PROBE_TIMEOUT};
pub use registry::{RecordView, Registry, TunnelRecord, DEFAULT_CAPACITY};
pub use reporter::{StatusReporter, StatusSnapshot, TunnelStatusView};
pub use tunnel::{validate_name, Direction, TunnelSpec, TunnelStatus};
pub use worker::WorkerTiming;
