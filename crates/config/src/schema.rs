//! Config schema for the coordinator process.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub coordinator: CoordinatorConfig,
    pub routing: RoutingConfig,
    pub voice: VoiceConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Directory holding `switchboard.lock` and the per-process markers.
    pub lock_dir: PathBuf,
    /// Unix socket path, or named pipe name on Windows.
    pub socket_path: PathBuf,
    /// Persistent state (disabled channel set).
    pub state_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub lock_retries: u32,
    pub lock_min_backoff_ms: u64,
    pub lock_max_backoff_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_dir: std::env::temp_dir().join("switchboard-locks"),
            socket_path: default_socket_path(),
            state_dir: crate::loader::data_dir(),
            request_timeout_secs: 15,
            lock_retries: 3,
            lock_min_backoff_ms: 100,
            lock_max_backoff_ms: 500,
        }
    }
}

impl CoordinatorConfig {
    pub fn disabled_channels_path(&self) -> PathBuf {
        self.state_dir.join("disabled-channels.json")
    }
}

#[cfg(unix)]
fn default_socket_path() -> PathBuf {
    std::env::temp_dir()
        .join("switchboard")
        .join("coordinator.sock")
}

#[cfg(windows)]
fn default_socket_path() -> PathBuf {
    PathBuf::from(r"\\.\pipe\switchboard-coordinator")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Upper bound on how often one pending emission is pushed back by an
    /// active cooldown before it is dropped.
    pub max_cooldown_reschedules: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_cooldown_reschedules: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Delay before an empty voice channel is left.
    pub idle_grace_secs: u64,
    pub default_recordings_dir: PathBuf,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            idle_grace_secs: 5,
            default_recordings_dir: PathBuf::from("./recordings"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}
