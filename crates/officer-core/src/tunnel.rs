//! Tunnel definitions and the status type

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SupervisorError;

/// Longest accepted tunnel name
pub const MAX_NAME_LEN: usize = 63;

/// Reconnect delay applied when the configuration omits one
pub const DEFAULT_RECONNECT_DELAY: u64 = 5;

/// Direction of a port forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Expose a remote service on a local port
    #[default]
    Forward,
    /// Expose a local service on a port opened on the remote host
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "forward" | "f" | "l" => Ok(Direction::Forward),
            "reverse" | "r" => Ok(Direction::Reverse),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_reconnect_delay() -> u64 {
    DEFAULT_RECONNECT_DELAY
}

/// Static configuration of one tunnel, as stored in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    /// Unique tunnel name
    pub name: String,
    /// SSH host
    pub host: String,
    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// SSH user
    pub user: String,
    /// Private key file passed to `ssh -i`
    pub ssh_key: String,
    /// Forward (`-L`) or reverse (`-R`)
    #[serde(default)]
    pub direction: Direction,
    /// Local endpoint port
    pub local_port: u16,
    /// Target host, as seen from the SSH host
    pub remote_host: String,
    /// Target port
    pub remote_port: u16,
    /// Seconds to wait between attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
}

impl TunnelSpec {
    /// Check the definition for values `ssh` cannot work with
    pub fn validate(&self) -> Result<(), SupervisorError> {
        validate_name(&self.name)?;

        let required = [
            ("user", &self.user),
            ("host", &self.host),
            ("ssh_key", &self.ssh_key),
            ("remote_host", &self.remote_host),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SupervisorError::InvalidTunnel(format!(
                    "'{}': {} cannot be empty",
                    self.name, field
                )));
            }
        }

        let ports = [
            ("port", self.port),
            ("local_port", self.local_port),
            ("remote_port", self.remote_port),
        ];
        for (field, value) in ports {
            if value == 0 {
                return Err(SupervisorError::InvalidTunnel(format!(
                    "'{}': {} must be between 1 and 65535",
                    self.name, field
                )));
            }
        }

        Ok(())
    }

    /// Human-readable endpoint mapping, e.g. `localhost:5432 → db:5432`
    pub fn endpoints(&self) -> String {
        match self.direction {
            Direction::Forward => format!(
                "localhost:{} → {}:{}",
                self.local_port, self.remote_host, self.remote_port
            ),
            Direction::Reverse => format!(
                "{}:{} ← localhost:{}",
                self.host, self.remote_port, self.local_port
            ),
        }
    }
}

/// Validate tunnel name (alphanumeric, hyphens, underscores only)
pub fn validate_name(name: &str) -> Result<(), SupervisorError> {
    if name.is_empty() {
        return Err(SupervisorError::InvalidTunnel(
            "tunnel name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(SupervisorError::InvalidTunnel(format!(
            "tunnel name '{}' is longer than {} characters",
            name, MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SupervisorError::InvalidTunnel(format!(
            "tunnel name '{}' must contain only alphanumeric characters, hyphens, and underscores",
            name
        )));
    }
    Ok(())
}

/// Observed state of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    Stopped,
    Starting,
    Running,
    Reconnecting,
    Error,
    AuthError,
    PortError,
}

impl TunnelStatus {
    /// Every status, in display order
    pub const ALL: [TunnelStatus; 7] = [
        TunnelStatus::Stopped,
        TunnelStatus::Starting,
        TunnelStatus::Running,
        TunnelStatus::Reconnecting,
        TunnelStatus::Error,
        TunnelStatus::AuthError,
        TunnelStatus::PortError,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TunnelStatus::Stopped => "STOPPED",
            TunnelStatus::Starting => "STARTING",
            TunnelStatus::Running => "RUNNING",
            TunnelStatus::Reconnecting => "RECONNECTING",
            TunnelStatus::Error => "ERROR",
            TunnelStatus::AuthError => "AUTH_ERROR",
            TunnelStatus::PortError => "PORT_ERROR",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            TunnelStatus::Stopped => "○",
            TunnelStatus::Starting => "◐",
            TunnelStatus::Running => "●",
            TunnelStatus::Reconnecting => "⟳",
            TunnelStatus::Error => "✗",
            TunnelStatus::AuthError => "🔑",
            TunnelStatus::PortError => "⛔",
        }
    }

    /// Whether this status reports a failed attempt
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TunnelStatus::Error | TunnelStatus::AuthError | TunnelStatus::PortError
        )
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol(), self.label())
    }
}

#[cfg(test)]
pub(crate) fn test_spec(name: &str) -> TunnelSpec {
    TunnelSpec {
        name: name.to_string(),
        host: "bastion.example.com".to_string(),
        port: 22,
        user: "deploy".to_string(),
        ssh_key: "/home/deploy/.ssh/id_ed25519".to_string(),
        direction: Direction::Forward,
        local_port: 5432,
        remote_host: "db.internal".to_string(),
        remote_port: 5432,
        reconnect_delay: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("db-prod").is_ok());
        assert!(validate_name("api_test_2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("web/dev").is_err());
        assert!(validate_name("a.b").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut spec = test_spec("db");
        spec.local_port = 0;
        assert!(matches!(
            spec.validate(),
            Err(SupervisorError::InvalidTunnel(_))
        ));
    }

    #[test]
    fn test_validate_rejects_blank_host() {
        let mut spec = test_spec("db");
        spec.host = "  ".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_defaults_applied_on_deserialize() {
        let json = r#"{
            "name": "db",
            "host": "bastion",
            "user": "deploy",
            "ssh_key": "/tmp/key",
            "local_port": 15432,
            "remote_host": "db.internal",
            "remote_port": 5432
        }"#;
        let spec: TunnelSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.port, 22);
        assert_eq!(spec.direction, Direction::Forward);
        assert_eq!(spec.reconnect_delay, DEFAULT_RECONNECT_DELAY);
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("reverse".parse::<Direction>().unwrap(), Direction::Reverse);
        assert_eq!("".parse::<Direction>().unwrap(), Direction::Forward);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_status_labels_are_distinct() {
        let mut labels: Vec<_> = TunnelStatus::ALL.iter().map(|s| s.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), TunnelStatus::ALL.len());
        assert!(TunnelStatus::AuthError.is_failure());
        assert!(!TunnelStatus::Reconnecting.is_failure());
    }
}
