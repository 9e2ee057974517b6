//! Engine and panel configuration
//!
//! Everything the engine needs is passed in explicitly; there are no
//! built-in device rosters. `PanelConfig` bundles the link, engine tuning
//! and the roster an adapter layer exposes, and round-trips through JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{
    DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, DEFAULT_REPLY_TIMEOUT_MS, MAX_LINE_LENGTH,
};

/// Errors loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// File that was opened
        path: String,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// Config file could not be written
    #[error("Failed to write config {path}: {source}")]
    Write {
        /// File that was written
        path: String,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// JSON did not match the config layout
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Timing and framing knobs for the protocol engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transport read timeout; bounds how long `close` waits for the reader
    pub read_timeout_ms: u64,
    /// How long a query waits for its reply
    pub reply_timeout_ms: u64,
    /// Frames longer than this without a CR are cut
    pub max_line_length: usize,
    /// Re-dispatch `^G` results as load change events (level 99 or 0)
    pub bulk_load_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            max_line_length: MAX_LINE_LENGTH,
            bulk_load_events: true,
        }
    }
}

impl EngineConfig {
    /// Read timeout, never zero
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    /// How long queries wait for an answer
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub port_name: String,
    /// Panels ship at 19200
    pub baud_rate: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Devices an adapter layer exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceRoster {
    /// Load numbers to expose
    pub loads: Vec<u16>,
    /// Switch numbers to expose
    pub switches: Vec<u16>,
    /// Scene number to display name
    pub scenes: BTreeMap<u16, String>,
    /// Devices whose name starts with any of these prefixes are skipped
    pub exclude_names: Vec<String>,
}

impl Default for DeviceRoster {
    fn default() -> Self {
        Self {
            loads: (1..=48).collect(),
            switches: (1..=96).collect(),
            scenes: BTreeMap::new(),
            exclude_names: Vec::new(),
        }
    }
}

impl DeviceRoster {
    /// Default name for a load, e.g. "L001"
    pub fn load_name(id: u16) -> String {
        format!("L{:03}", id)
    }

    /// Default name for a switch, e.g. "SW001"
    pub fn switch_name(id: u16) -> String {
        format!("SW{:03}", id)
    }

    /// Configured scene name, or "SC001" style when unnamed
    pub fn scene_name(&self, id: u16) -> String {
        self.scenes
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("SC{:03}", id))
    }

    /// Check a device name against the exclusion prefixes
    pub fn is_ignored(&self, name: &str) -> bool {
        self.exclude_names
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Loads whose default name is not excluded
    pub fn active_loads(&self) -> Vec<u16> {
        self.loads
            .iter()
            .copied()
            .filter(|&id| !self.is_ignored(&Self::load_name(id)))
            .collect()
    }

    /// Switches whose default name is not excluded
    pub fn active_switches(&self) -> Vec<u16> {
        self.switches
            .iter()
            .copied()
            .filter(|&id| !self.is_ignored(&Self::switch_name(id)))
            .collect()
    }

    /// Scenes whose name is not excluded, with their names
    pub fn active_scenes(&self) -> Vec<(u16, String)> {
        self.scenes
            .iter()
            .filter(|(_, name)| !self.is_ignored(name))
            .map(|(&id, name)| (id, name.clone()))
            .collect()
    }
}

/// Complete configuration for one panel link
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Where the panel is attached
    pub link: LinkConfig,
    /// Engine timing and framing
    pub engine: EngineConfig,
    /// Devices to expose
    pub roster: DeviceRoster,
}

impl PanelConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse from a JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Save as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}
