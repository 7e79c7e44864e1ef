#![forbid(unsafe_code)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::fmt;

mod error;

pub use error::{TetherError, TetherResult};

/// Seconds after launch during which a process is never reported as hung.
pub const PROBE_GRACE_PERIOD_SECS: u64 = 60;

pub const DEFAULT_MAX_RELAUNCH_ATTEMPTS: u32 = 3;

pub const DEFAULT_TIME_TO_INIT_SECS: u64 = 10;

/// Lifecycle of a supervised OS process as recorded in the state store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Queued,
    Launching,
    Running,
    Stalled,
    Killed,
    Inactive,
}

impl ProcessStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Launching | Self::Running | Self::Stalled)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Queued => write!(f, "QUEUED"),
            ProcessStatus::Launching => write!(f, "LAUNCHING"),
            ProcessStatus::Running => write!(f, "RUNNING"),
            ProcessStatus::Stalled => write!(f, "STALLED"),
            ProcessStatus::Killed => write!(f, "KILLED"),
            ProcessStatus::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// Control-plane link state. `FatalError` is reserved: the connection
/// manager keeps retrying remote rejections instead of entering it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Backoff,
    FatalError,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Reconnecting => write!(f, "RECONNECTING"),
            ConnectionState::Backoff => write!(f, "BACKOFF"),
            ConnectionState::FatalError => write!(f, "FATAL_ERROR"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(pub String);

impl MachineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
