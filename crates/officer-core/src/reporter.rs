//! Status snapshots for the console

use chrono::{DateTime, Local};
use std::collections::BTreeMap;

use crate::registry::Registry;
use crate::tunnel::{Direction, TunnelStatus};

/// One tunnel's row in a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelStatusView {
    pub name: String,
    pub direction: Direction,
    pub user: String,
    pub host: String,
    pub port: u16,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub endpoints: String,
    pub status: TunnelStatus,
    pub restart_count: u32,
    pub reconnect_delay: u64,
    /// Seconds since the last launch attempt, if there was one
    pub since_last_restart: Option<i64>,
}

/// Point-in-time copy of the registry
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub taken_at: DateTime<Local>,
    pub tunnels: Vec<TunnelStatusView>,
    pub counts: BTreeMap<TunnelStatus, usize>,
}

impl StatusSnapshot {
    pub fn total(&self) -> usize {
        self.tunnels.len()
    }

    pub fn count(&self, status: TunnelStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Tunnels whose last attempt failed, across all error categories
    pub fn failing(&self) -> usize {
        TunnelStatus::ALL
            .iter()
            .filter(|s| s.is_failure())
            .map(|s| self.count(*s))
            .sum()
    }
}

pub struct StatusReporter;

impl StatusReporter {
    /// Copy the observable fields under the registry lock, aggregate after release
    pub fn snapshot(registry: &Registry) -> StatusSnapshot {
        let now = Local::now();

        let tunnels: Vec<TunnelStatusView> = registry.inspect(|records| {
            records
                .iter()
                .map(|record| TunnelStatusView {
                    name: record.spec.name.clone(),
                    direction: record.spec.direction,
                    user: record.spec.user.clone(),
                    host: record.spec.host.clone(),
                    port: record.spec.port,
                    local_port: record.spec.local_port,
                    remote_host: record.spec.remote_host.clone(),
                    remote_port: record.spec.remote_port,
                    endpoints: record.spec.endpoints(),
                    status: record.status,
                    restart_count: record.restart_count,
                    reconnect_delay: record.spec.reconnect_delay,
                    since_last_restart: record
                        .last_restart
                        .map(|at| (now - at).num_seconds().max(0)),
                })
                .collect()
        });

        let mut counts = BTreeMap::new();
        for tunnel in &tunnels {
            *counts.entry(tunnel.status).or_insert(0) += 1;
        }

        StatusSnapshot {
            taken_at: now,
            tunnels,
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventLog;
    use crate::tunnel::test_spec;

    #[test]
    fn test_snapshot_counts() {
        let registry = Registry::default();
        for name in ["a", "b", "c", "d"] {
            registry.add(test_spec(name), EventLog::disabled(name)).unwrap();
        }
        registry.set_status("a", TunnelStatus::Running);
        registry.set_status("b", TunnelStatus::Running);
        registry.set_status("c", TunnelStatus::AuthError);

        let snapshot = StatusReporter::snapshot(&registry);

        assert_eq!(snapshot.total(), 4);
        assert_eq!(snapshot.count(TunnelStatus::Running), 2);
        assert_eq!(snapshot.count(TunnelStatus::Stopped), 1);
        assert_eq!(snapshot.count(TunnelStatus::PortError), 0);
        assert_eq!(snapshot.failing(), 1);
    }

    #[test]
    fn test_snapshot_tracks_last_restart() {
        let registry = Registry::default();
        registry.add(test_spec("db"), EventLog::disabled("db")).unwrap();

        let before = StatusReporter::snapshot(&registry);
        assert_eq!(before.tunnels[0].since_last_restart, None);

        registry.begin_attempt("db");
        let after = StatusReporter::snapshot(&registry);
        let row = &after.tunnels[0];
        assert_eq!(row.status, TunnelStatus::Starting);
        assert_eq!(row.restart_count, 1);
        assert!(row.since_last_restart.unwrap() <= 1);
        assert_eq!(row.endpoints, "localhost:5432 → db.internal:5432");
    }
}
