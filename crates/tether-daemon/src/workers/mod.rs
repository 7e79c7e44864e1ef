mod command_listener;
mod heartbeat;
mod metrics;

use std::sync::{Arc, Weak};
use std::time::Duration;
use tether_types::{MachineId, TetherError, TetherResult};

use crate::config::ConnectionConfig;
use crate::connection::ConnectionManager;
use crate::control_plane::ControlPlaneApi;
use crate::storage::StateStore;
use crate::supervisor::SupervisorHandle;

pub use command_listener::run_command_listener;
pub use heartbeat::{collect_process_reports, run_heartbeat};
pub use metrics::{run_metrics, SystemSampler};

pub const HEARTBEAT_WORKER: &str = "heartbeat";
pub const METRICS_WORKER: &str = "metrics";
pub const COMMAND_LISTENER_WORKER: &str = "command_listener";

#[derive(Clone, Debug)]
pub struct WorkerIntervals {
    pub heartbeat: Duration,
    pub metrics: Duration,
    pub command_poll: Duration,
}

impl From<&ConnectionConfig> for WorkerIntervals {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            heartbeat: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            metrics: Duration::from_secs(config.metrics_interval_secs.max(1)),
            command_poll: Duration::from_secs(config.command_poll_interval_secs.max(1)),
        }
    }
}

/// Everything a worker body needs. Holds the manager weakly since the
/// manager owns the worker factories.
#[derive(Clone)]
pub struct WorkerContext {
    pub api: Arc<dyn ControlPlaneApi>,
    pub machine_id: MachineId,
    pub store: StateStore,
    pub supervisor: SupervisorHandle,
    pub intervals: WorkerIntervals,
    manager: Weak<ConnectionManager>,
}

impl WorkerContext {
    pub fn new(
        api: Arc<dyn ControlPlaneApi>,
        machine_id: MachineId,
        store: StateStore,
        supervisor: SupervisorHandle,
        intervals: WorkerIntervals,
        manager: &Arc<ConnectionManager>,
    ) -> Self {
        Self {
            api,
            machine_id,
            store,
            supervisor,
            intervals,
            manager: Arc::downgrade(manager),
        }
    }

    pub fn report_error(&self, error: &TetherError, context: &str) {
        if let Some(manager) = self.manager.upgrade() {
            manager.report_error(&error.to_string(), context);
        }
    }

    pub fn report_success(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.report_success();
        }
    }

    pub fn connection_state(&self) -> tether_types::ConnectionState {
        self.manager
            .upgrade()
            .map(|m| m.state())
            .unwrap_or(tether_types::ConnectionState::Disconnected)
    }
}

pub fn register_workers(manager: &Arc<ConnectionManager>, ctx: WorkerContext) -> TetherResult<()> {
    let heartbeat_ctx = ctx.clone();
    manager.register_thread(HEARTBEAT_WORKER, move |cancel| {
        run_heartbeat(heartbeat_ctx.clone(), cancel)
    })?;

    let metrics_ctx = ctx.clone();
    manager.register_thread(METRICS_WORKER, move |cancel| {
        run_metrics(metrics_ctx.clone(), cancel)
    })?;

    manager.register_thread(COMMAND_LISTENER_WORKER, move |cancel| {
        run_command_listener(ctx.clone(), cancel)
    })?;

    Ok(())
}
