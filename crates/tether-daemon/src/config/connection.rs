use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::constants::*;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub control_plane_url: String,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub fatal_backoff_secs: u64,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub watchdog_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub reachability_endpoints: Vec<String>,
    pub reachability_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub metrics_interval_secs: u64,
    pub command_poll_interval_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            control_plane_url: "https://control.tether.local/api/v1".to_string(),
            base_backoff_secs: DEFAULT_BASE_BACKOFF_SECS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
            fatal_backoff_secs: DEFAULT_FATAL_BACKOFF_SECS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout_secs: DEFAULT_RECOVERY_TIMEOUT_SECS,
            watchdog_interval_secs: DEFAULT_WATCHDOG_INTERVAL_SECS,
            shutdown_timeout_secs: 5,
            reachability_endpoints: DEFAULT_REACHABILITY_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            reachability_timeout_secs: 3,
            request_timeout_secs: 30,
            heartbeat_interval_secs: 60,
            metrics_interval_secs: 300,
            command_poll_interval_secs: 15,
        }
    }
}

impl ConnectionConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_secs(self.base_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn fatal_backoff(&self) -> Duration {
        Duration::from_secs(self.fatal_backoff_secs)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
