//! Best-effort connectivity check of a tunnel's local endpoint

use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Connect timeout used by the `test` command
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of a TCP connect to `127.0.0.1:<port>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortProbe {
    Reachable { latency: Duration },
    Refused { reason: String },
    TimedOut,
}

impl PortProbe {
    pub fn is_reachable(&self) -> bool {
        matches!(self, PortProbe::Reachable { .. })
    }
}

pub async fn probe_local_port(port: u16, timeout: Duration) -> PortProbe {
    let started = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(Ok(_stream)) => PortProbe::Reachable {
            latency: started.elapsed(),
        },
        Ok(Err(e)) => PortProbe::Refused {
            reason: e.to_string(),
        },
        Err(_) => PortProbe::TimedOut,
    }
}
