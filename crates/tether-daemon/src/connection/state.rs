use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tether_types::ConnectionState;

pub const STATE_HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub old: ConnectionState,
    pub new: ConnectionState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

pub type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(super) u64);

#[derive(Debug, Default)]
pub(super) struct StateHistory {
    entries: VecDeque<StateChange>,
}

impl StateHistory {
    pub(super) fn push(&mut self, change: StateChange) {
        if self.entries.len() == STATE_HISTORY_LIMIT {
            self.entries.pop_front();
        }
        self.entries.push_back(change);
    }

    pub(super) fn recent(&self, n: usize) -> Vec<StateChange> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub current_backoff_secs: u64,
    pub circuit_open: bool,
    pub circuit_remaining_secs: u64,
    pub supervision_enabled: bool,
    pub reconnecting: bool,
    pub workers: Vec<super::registry::WorkerStatus>,
    pub recent: Vec<StateChange>,
}

impl ConnectionSnapshot {
    pub fn current_backoff(&self) -> Duration {
        Duration::from_secs(self.current_backoff_secs)
    }
}
