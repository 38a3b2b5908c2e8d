//! Supervisor error types

use thiserror::Error;

/// Errors surfaced to the operator by the registry and the controller.
///
/// None of these are fatal to the process: a failing tunnel never affects the
/// others, and operator mistakes leave the registry untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Tunnel '{0}' not found")]
    NotFound(String),

    #[error("Tunnel with name '{0}' already exists")]
    DuplicateName(String),

    #[error("Maximum tunnels reached ({0}/{0})")]
    CapacityExceeded(usize),

    #[error("Invalid tunnel definition: {0}")]
    InvalidTunnel(String),

    #[error("Failed to spawn worker for tunnel '{name}': {reason}")]
    SpawnFailure { name: String, reason: String },
}
