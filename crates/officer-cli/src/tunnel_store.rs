//! Tunnel configuration file
//!
//! A single JSON document of the form `{"tunnels": [ ... ]}`. Entries that do
//! not describe a usable tunnel are skipped with a warning; a document that
//! cannot be read at all is fatal.

use officer_core::{TunnelSpec, DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot open config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid JSON in config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("'tunnels' must be an array")]
    NotAnArray,

    #[error("Too many tunnels ({count}, max {max})")]
    TooManyTunnels { count: usize, max: usize },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write config file '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Serialize)]
struct ConfigDocument<'a> {
    tunnels: &'a [TunnelSpec],
}

/// Reads and rewrites the configuration file
#[derive(Debug, Clone)]
pub struct TunnelStore {
    path: PathBuf,
    capacity: usize,
}

impl TunnelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Override the entry limit (defaults to the registry capacity)
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every valid tunnel definition, in file order
    pub fn load(&self) -> Result<Vec<TunnelSpec>, ConfigError> {
        let json = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        self.parse(&json)
    }

    fn parse(&self, json: &str) -> Result<Vec<TunnelSpec>, ConfigError> {
        let document: Value = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let entries = document
            .get("tunnels")
            .and_then(Value::as_array)
            .ok_or(ConfigError::NotAnArray)?;

        if entries.len() > self.capacity {
            return Err(ConfigError::TooManyTunnels {
                count: entries.len(),
                max: self.capacity,
            });
        }

        let mut tunnels = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let spec = match TunnelSpec::deserialize(entry) {
                Ok(spec) => spec,
                Err(reason) => {
                    warn!("Invalid tunnel configuration at index {}: {}", index, reason);
                    continue;
                }
            };
            if let Err(e) = spec.validate() {
                warn!("Invalid tunnel configuration at index {}: {}", index, e);
                continue;
            }
            tunnels.push(spec);
        }

        debug!(
            "Loaded {} of {} tunnel(s) from {}",
            tunnels.len(),
            entries.len(),
            self.path.display()
        );
        Ok(tunnels)
    }

    /// Rewrite the file with the given definitions, pretty-printed
    pub fn save(&self, tunnels: &[TunnelSpec]) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(&ConfigDocument { tunnels })
            .map_err(ConfigError::Serialize)?;

        fs::write(&self.path, json + "\n").map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
