use chrono::Utc;
use std::time::Instant;
use tether_types::TetherResult;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::WorkerContext;
use crate::connection::CancellationToken;
use crate::control_plane::{Heartbeat, ProcessReport};
use crate::storage::StateStore;

/// Current (non-superseded) records from the state store.
pub fn collect_process_reports(store: &StateStore) -> TetherResult<Vec<ProcessReport>> {
    let state = store.load()?;
    Ok(state
        .records
        .iter()
        .filter(|(_, record)| record.is_current())
        .filter_map(|(pid, record)| {
            Some(ProcessReport {
                pid: pid.parse().ok()?,
                id: record.spec_id.clone(),
                name: record.name.clone(),
                status: record.status,
                responsive: record.responsive,
                hung_since: record.hung_since,
            })
        })
        .collect())
}

pub async fn run_heartbeat(ctx: WorkerContext, mut cancel: CancellationToken) -> TetherResult<()> {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(ctx.intervals.heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return Ok(()),
        }

        let processes = ctx
            .store
            .blocking(|store| collect_process_reports(store))
            .await
            .unwrap_or_else(|e| {
                warn!("Heartbeat without process list: {}", e);
                Vec::new()
            });
        let report = Heartbeat {
            machine_id: ctx.machine_id.clone(),
            timestamp: Utc::now(),
            connection: ctx.connection_state(),
            uptime_secs: started.elapsed().as_secs(),
            processes,
        };

        if let Err(e) = ctx.api.heartbeat(&report).await {
            ctx.report_error(&e, "heartbeat");
            return Err(e);
        }
        debug!("Heartbeat sent ({} processes)", report.processes.len());
    }
}
