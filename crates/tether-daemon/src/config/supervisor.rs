use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::constants::{DEFAULT_TERMINATE_TIMEOUT_SECS, DEFAULT_TICK_INTERVAL_SECS};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub tick_interval_secs: u64,
    /// Responsiveness probe executable. Defaults to `tether-probe` next to
    /// the running binary.
    pub probe_path: Option<PathBuf>,
    pub probe_grace_secs: u64,
    pub terminate_timeout_secs: u64,
    /// Command spawned when a process exhausts its relaunch attempts.
    pub prompt_command: Vec<String>,
    /// Defaults to `<data_dir>/process_state.json`.
    pub state_file: Option<PathBuf>,
    pub record_retention_days: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            probe_path: None,
            probe_grace_secs: tether_types::PROBE_GRACE_PERIOD_SECS,
            terminate_timeout_secs: DEFAULT_TERMINATE_TIMEOUT_SECS,
            prompt_command: Vec::new(),
            state_file: None,
            record_retention_days: 7,
        }
    }
}

impl SupervisorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }

    pub fn record_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.record_retention_days as i64)
    }

    pub fn resolved_probe_path(&self) -> PathBuf {
        if let Some(ref path) = self.probe_path {
            return path.clone();
        }
        let name = if cfg!(windows) { "tether-probe.exe" } else { "tether-probe" };
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
            .unwrap_or_else(|| PathBuf::from(name))
    }
}
