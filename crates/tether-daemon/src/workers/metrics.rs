use chrono::Utc;
use sysinfo::{Pid, System};
use tether_types::{MachineId, TetherResult};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::heartbeat::collect_process_reports;
use super::WorkerContext;
use crate::connection::CancellationToken;
use crate::control_plane::{MetricsReport, ProcessReport, ProcessUsage};

pub struct SystemSampler {
    system: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }

    pub fn sample(&mut self, machine_id: &MachineId, processes: &[ProcessReport]) -> MetricsReport {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let usage = processes
            .iter()
            .map(|p| {
                let pid = Pid::from_u32(p.pid);
                self.system.refresh_process(pid);
                let (cpu, memory) = self
                    .system
                    .process(pid)
                    .map(|process| (process.cpu_usage(), process.memory()))
                    .unwrap_or((0.0, 0));
                ProcessUsage {
                    pid: p.pid,
                    id: p.id.clone(),
                    status: p.status,
                    cpu_percent: cpu,
                    memory_bytes: memory,
                }
            })
            .collect();

        MetricsReport {
            machine_id: machine_id.clone(),
            timestamp: Utc::now(),
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            memory_used_bytes: self.system.used_memory(),
            memory_total_bytes: self.system.total_memory(),
            system_uptime_secs: System::uptime(),
            processes: usage,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run_metrics(ctx: WorkerContext, mut cancel: CancellationToken) -> TetherResult<()> {
    let mut sampler = SystemSampler::new();
    let mut ticker = tokio::time::interval(ctx.intervals.metrics);
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
                warn!("Metrics without process list: {}", e);
                Vec::new()
            });
        let report = sampler.sample(&ctx.machine_id, &processes);

        if let Err(e) = ctx.api.upload_metrics(&report).await {
            ctx.report_error(&e, "metrics");
            return Err(e);
        }
        debug!(
            "Metrics uploaded (cpu {:.1}%, {} processes)",
            report.cpu_percent,
            report.processes.len()
        );
    }
}
