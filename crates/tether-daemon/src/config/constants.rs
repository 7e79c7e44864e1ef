pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_STATE_FILE: &str = "process_state.json";

pub const DEFAULT_BASE_BACKOFF_SECS: u64 = 30;
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 3600;
pub const DEFAULT_FATAL_BACKOFF_SECS: u64 = 1800;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 30;

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_TERMINATE_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_REACHABILITY_ENDPOINTS: &[&str] = &["1.1.1.1:53", "8.8.8.8:53"];
