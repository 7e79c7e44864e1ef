use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_types::{ConnectionState, MachineId, ProcessStatus};

use crate::supervisor::{CommandReply, SupervisorCommand};

#[derive(Clone, Debug, Serialize)]
pub struct SessionRequest {
    pub machine_id: MachineId,
    pub hostname: Option<String>,
    pub agent_version: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SessionResponse {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub pid: u32,
    pub id: String,
    pub name: String,
    pub status: ProcessStatus,
    pub responsive: bool,
    pub hung_since: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Heartbeat {
    pub machine_id: MachineId,
    pub timestamp: DateTime<Utc>,
    pub connection: ConnectionState,
    pub uptime_secs: u64,
    pub processes: Vec<ProcessReport>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcessUsage {
    pub pid: u32,
    pub id: String,
    pub status: ProcessStatus,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct MetricsReport {
    pub machine_id: MachineId,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub system_uptime_secs: u64,
    pub processes: Vec<ProcessUsage>,
}

/// A pending command as listed by the control plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteCommand {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RemoteCommand {
    pub fn to_command(&self) -> Result<SupervisorCommand, String> {
        let params = if self.params.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            self.params.clone()
        };
        serde_json::from_value(serde_json::json!({ "type": self.kind, "params": params }))
            .map_err(|e| format!("Unsupported command '{}': {}", self.kind, e))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
}

impl From<CommandReply> for CommandResult {
    fn from(reply: CommandReply) -> Self {
        match reply {
            Ok(message) => Self {
                success: true,
                message,
            },
            Err(message) => Self {
                success: false,
                message,
            },
        }
    }
}
