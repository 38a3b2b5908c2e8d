//! Per-tunnel append-only event log
//!
//! Each tunnel gets `<log-dir>/<name>.log` with lines of the form
//! `[2024-05-01 12:00:00] [Restart #3] Starting SSH tunnel`. Every event is
//! also emitted through `tracing`. The sink has a single owner: the registry
//! record while the tunnel is idle, the worker while it runs.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug)]
pub struct EventLog {
    tunnel: String,
    file: Option<File>,
}

impl EventLog {
    /// Open (or create) the log file for a tunnel in `dir`
    pub fn open(dir: &Path, tunnel: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", tunnel));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            tunnel: tunnel.to_string(),
            file: Some(file),
        })
    }

    /// Open the log file, falling back to a tracing-only sink on failure
    pub fn open_or_disabled(dir: Option<&Path>, tunnel: &str) -> Self {
        match dir {
            Some(dir) => Self::open(dir, tunnel).unwrap_or_else(|e| {
                warn!(tunnel = %tunnel, "Cannot open log file: {}", e);
                Self::disabled(tunnel)
            }),
            None => Self::disabled(tunnel),
        }
    }

    /// A sink that only forwards to tracing
    pub fn disabled(tunnel: &str) -> Self {
        Self {
            tunnel: tunnel.to_string(),
            file: None,
        }
    }

    /// Append one event
    pub fn record(&mut self, restart_count: u32, message: &str) {
        info!(tunnel = %self.tunnel, restarts = restart_count, "{}", message);

        if let Some(file) = self.file.as_mut() {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            let line = format!("[{}] [Restart #{}] {}\n", timestamp, restart_count, message);
            if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
                warn!(tunnel = %self.tunnel, "Failed to write event log: {}", e);
                self.file = None;
            }
        }
    }
}
