//! Configuration resolution for wordrelay.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.wordrelay/relay.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
}

/// Listener and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    /// Largest frame a client may send, length prefix excluded.
    pub max_frame_bytes: usize,
    /// Per-connection outbound queue depth; a full queue counts as a failed
    /// send.
    pub send_queue_depth: usize,
    /// How often room status is summarised in the log (seconds, 0 = never).
    pub status_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:10997".to_string(),
            database_path: None,
            log_level: "info".to_string(),
            max_frame_bytes: 4096,
            send_queue_depth: 64,
            status_interval_secs: 300,
        }
    }
}

/// Per-room protocol timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Heartbeat interval advertised to clients; a host silent for longer is
    /// treated as gone.
    pub heartbeat_secs: u16,
    /// How long a room may sit below quota before its sockets are dropped.
    pub all_connected_secs: u64,
    /// How long a freshly connected host has to acknowledge its response.
    pub device_ack_secs: u64,
    /// Artificial delay before each forwarded message (testing aid).
    pub send_delay_millis: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 60,
            all_connected_secs: 300,
            device_ack_secs: 30,
            send_delay_millis: 0,
        }
    }
}

impl SessionConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(u64::from(self.heartbeat_secs))
    }

    pub const fn all_connected_timeout(&self) -> Duration {
        Duration::from_secs(self.all_connected_secs)
    }

    pub const fn device_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.device_ack_secs)
    }

    pub const fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_millis)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            config = load_config_file(&global_path)?;
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        config = load_config_file(path)?;
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("relay.json"))
}

/// Default location of the relay database.
pub fn database_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("relay.db"))
}

fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".wordrelay"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `WORDRELAY_*` overrides. `lookup` is `std::env::var` in production.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("WORDRELAY_LISTEN") {
        config.server.listen_addr = val;
    }
    if let Some(val) = lookup("WORDRELAY_DB_PATH") {
        config.server.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("WORDRELAY_LOG_LEVEL") {
        config.server.log_level = val;
    }
    if let Some(n) = lookup("WORDRELAY_HEARTBEAT_SECS").and_then(|v| v.parse().ok()) {
        config.sessions.heartbeat_secs = n;
    }
    if let Some(n) = lookup("WORDRELAY_ALLCONN_SECS").and_then(|v| v.parse().ok()) {
        config.sessions.all_connected_secs = n;
    }
    if let Some(n) = lookup("WORDRELAY_DEVACK_SECS").and_then(|v| v.parse().ok()) {
        config.sessions.device_ack_secs = n;
    }
    if let Some(n) = lookup("WORDRELAY_SEND_DELAY_MILLIS").and_then(|v| v.parse().ok()) {
        config.sessions.send_delay_millis = n;
    }
}
