use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tether_types::ProcessStatus;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Runtime status of one OS process, keyed by PID in the state file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessRuntimeRecord {
    pub spec_id: String,
    pub name: String,
    pub launch_timestamp: DateTime<Utc>,
    pub status: ProcessStatus,
    #[serde(default = "default_responsive")]
    pub responsive: bool,
    #[serde(default)]
    pub hung_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_probe: Option<DateTime<Utc>>,
    /// PID of the process that replaced this one for the same spec.
    #[serde(default)]
    pub superseded_by: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

fn default_responsive() -> bool {
    true
}

impl ProcessRuntimeRecord {
    pub fn new(spec_id: &str, name: &str, status: ProcessStatus, now: DateTime<Utc>) -> Self {
        Self {
            spec_id: spec_id.to_string(),
            name: name.to_string(),
            launch_timestamp: now,
            status,
            responsive: true,
            hung_since: None,
            last_probe: None,
            superseded_by: None,
            updated_at: now,
        }
    }

    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.launch_timestamp)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    #[serde(default)]
    pub records: BTreeMap<String, ProcessRuntimeRecord>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
            records: BTreeMap::new(),
        }
    }
}

impl StateFile {
    pub fn get(&self, pid: u32) -> Option<&ProcessRuntimeRecord> {
        self.records.get(&pid.to_string())
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut ProcessRuntimeRecord> {
        self.records.get_mut(&pid.to_string())
    }

    /// Most recently launched, non-superseded record for a spec.
    pub fn latest_for_spec(&self, spec_id: &str) -> Option<(u32, &ProcessRuntimeRecord)> {
        self.records
            .iter()
            .filter(|(_, r)| r.spec_id == spec_id && r.is_current())
            .filter_map(|(pid, r)| pid.parse::<u32>().ok().map(|pid| (pid, r)))
            .max_by_key(|(_, r)| r.launch_timestamp)
    }
}

/// Edge reported by the probe when responsiveness changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeTransition {
    BecameUnresponsive,
    BecameResponsive,
}
