#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod control_plane;
pub mod probe;
pub mod storage;
pub mod supervisor;
pub mod workers;

pub use config::{AgentConfig, ConnectionConfig, ProcessSpec, SupervisorConfig};
pub use connection::{ConnectionManager, ConnectionSettings, ControlPlaneLink, ReachabilityCheck};
pub use control_plane::{ControlPlaneApi, HttpControlPlane};
pub use probe::{ProbeVerdict, ResponsivenessProbe};
pub use storage::{ProcessRuntimeRecord, StateStore};
pub use supervisor::{ProcessControl, ProcessSupervisor, SupervisorCommand, SupervisorHandle};
