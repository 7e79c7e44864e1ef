use serde::Serialize;
use tether_types::ProcessStatus;

#[derive(Clone, Debug, Default, Serialize)]
pub struct SupervisorStats {
    pub ticks: u64,
    pub launches: u64,
    pub launch_failures: u64,
    pub adopted: u64,
    pub stalls: u64,
    pub escalations: u64,
    pub probes_dispatched: u64,
    pub commands_handled: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcessView {
    pub id: String,
    pub name: String,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub autolaunch: bool,
    pub relaunch_attempts: u32,
}
