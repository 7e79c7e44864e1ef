use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tether_types::{ProcessStatus, TetherResult};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::commands::{CommandReceiver, CommandReply, SupervisorCommand};
use super::control::ProcessControl;
use super::escalation::EscalationPrompt;
use super::relaunch::{GateDecision, RelaunchGate};
use super::stats::{ProcessView, SupervisorStats};
use crate::config::{validate_processes, ProcessSpec, SupervisorConfig};
use crate::connection::CancellationToken;
use crate::storage::StateStore;

const COMPACTION_INTERVAL_SECS: i64 = 3600;

fn secs(n: u64) -> chrono::Duration {
    chrono::Duration::seconds(n.min(i64::MAX as u64) as i64)
}

struct Tracked {
    pid: u32,
    launched_at: DateTime<Utc>,
}

struct ProcessEntry {
    spec: ProcessSpec,
    tracked: Option<Tracked>,
    status: ProcessStatus,
    /// Session flag, seeded from the spec and changed by commands.
    autolaunch: bool,
    launched_once: bool,
    last_launch: Option<DateTime<Utc>>,
}

impl ProcessEntry {
    fn new(spec: ProcessSpec) -> Self {
        Self {
            autolaunch: spec.autolaunch,
            spec,
            tracked: None,
            status: ProcessStatus::Queued,
            launched_once: false,
            last_launch: None,
        }
    }
}

/// Keeps the configured processes running. Ticks and commands run on the
/// same task, so entries are never touched concurrently.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    store: StateStore,
    control: Box<dyn ProcessControl>,
    prompt: Box<dyn EscalationPrompt>,
    gate: RelaunchGate,
    entries: Vec<ProcessEntry>,
    started_at: DateTime<Utc>,
    adoption_done: bool,
    last_compaction: Option<DateTime<Utc>>,
    stats: SupervisorStats,
}

impl ProcessSupervisor {
    pub fn new(
        config: SupervisorConfig,
        processes: Vec<ProcessSpec>,
        store: StateStore,
        control: Box<dyn ProcessControl>,
        prompt: Box<dyn EscalationPrompt>,
    ) -> Self {
        Self {
            config,
            store,
            control,
            prompt,
            gate: RelaunchGate::new(),
            entries: processes.into_iter().map(ProcessEntry::new).collect(),
            started_at: Utc::now(),
            adoption_done: false,
            last_compaction: None,
            stats: SupervisorStats::default(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    pub fn relaunch_attempts(&self, name: &str) -> u32 {
        self.gate.count(name)
    }

    pub fn processes(&self) -> Vec<ProcessView> {
        self.entries
            .iter()
            .map(|e| ProcessView {
                id: e.spec.id.clone(),
                name: e.spec.name.clone(),
                pid: e.tracked.as_ref().map(|t| t.pid),
                status: e.status,
                autolaunch: e.autolaunch,
                relaunch_attempts: self.gate.count(&e.spec.name),
            })
            .collect()
    }

    pub async fn run(mut self, mut commands: CommandReceiver, mut shutdown: CancellationToken) {
        info!(
            "Process supervisor started ({} processes, tick {}s)",
            self.entries.len(),
            self.config.tick_interval_secs
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                Some(envelope) = commands.recv() => {
                    let reply = self.handle_command(envelope.command).await;
                    if let Err(ref e) = reply {
                        warn!("Command failed: {}", e);
                    }
                    let _ = envelope.reply.send(reply);
                }
                _ = shutdown.cancelled() => break,
            }
        }

        info!(
            "Process supervisor stopped after {} ticks ({} launches, {} escalations)",
            self.stats.ticks, self.stats.launches, self.stats.escalations
        );
    }

    pub async fn tick(&mut self) {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&mut self, now: DateTime<Utc>) {
        self.stats.ticks += 1;
        let adopt = !self.adoption_done;
        self.adoption_done = true;

        for idx in 0..self.entries.len() {
            if let Err(e) = self.tick_process(idx, now, adopt).await {
                warn!("Supervising {} failed: {}", self.entries[idx].spec.name, e);
            }
        }

        self.maybe_compact(now).await;
    }

    pub async fn handle_command(&mut self, command: SupervisorCommand) -> CommandReply {
        self.handle_command_at(command, Utc::now()).await
    }

    /// Single entry point for remote commands. Uses the same launch and
    /// terminate primitives as the tick loop.
    pub async fn handle_command_at(
        &mut self,
        command: SupervisorCommand,
        now: DateTime<Utc>,
    ) -> CommandReply {
        self.stats.commands_handled += 1;
        info!("Handling {} command", command.kind());

        match command {
            SupervisorCommand::Restart { process } => {
                let idx = self.find(&process)?;
                let previous = self.entries[idx].tracked.take();
                if let Some(tracked) = previous {
                    if self.control.is_alive(tracked.pid) {
                        self.control
                            .terminate(tracked.pid, self.config.terminate_timeout())
                            .await
                            .map_err(|e| e.to_string())?;
                    }
                }
                let name = self.entries[idx].spec.name.clone();
                self.gate.reset(&name);
                let pid = self.launch(idx, now).await.map_err(|e| e.to_string())?;
                Ok(format!("Restarted {} (pid {})", name, pid))
            }
            SupervisorCommand::Kill { process } => {
                let idx = self.find(&process)?;
                let name = self.entries[idx].spec.name.clone();
                let previous = self.entries[idx].tracked.take();
                let message = match previous {
                    Some(tracked) => {
                        if self.control.is_alive(tracked.pid) {
                            self.control
                                .terminate(tracked.pid, self.config.terminate_timeout())
                                .await
                                .map_err(|e| e.to_string())?;
                        }
                        let pid = tracked.pid;
                        let recorded = self
                            .store
                            .blocking(move |store| store.set_status(pid, ProcessStatus::Killed))
                            .await;
                        if let Err(e) = recorded {
                            warn!("Failed to record kill of pid {}: {}", pid, e);
                        }
                        format!("Killed {} (pid {})", name, pid)
                    }
                    None => format!("{} was not running", name),
                };
                let entry = &mut self.entries[idx];
                entry.autolaunch = false;
                entry.status = ProcessStatus::Killed;
                Ok(message)
            }
            SupervisorCommand::ToggleAutolaunch { process, enabled } => {
                let idx = self.find(&process)?;
                let entry = &mut self.entries[idx];
                let enabled = enabled.unwrap_or(!entry.autolaunch);
                entry.autolaunch = enabled;
                let name = entry.spec.name.clone();
                if enabled {
                    self.gate.reset(&name);
                }
                Ok(format!(
                    "Autolaunch for {} {}",
                    name,
                    if enabled { "enabled" } else { "disabled" }
                ))
            }
            SupervisorCommand::UpdateConfig { processes } => {
                validate_processes(&processes).map_err(|e| e.to_string())?;
                let count = processes.len();
                self.apply_processes(processes);
                Ok(format!("Configuration updated ({} processes)", count))
            }
        }
    }

    fn find(&self, key: &str) -> Result<usize, String> {
        self.entries
            .iter()
            .position(|e| e.spec.id == key || e.spec.name == key)
            .ok_or_else(|| format!("Unknown process: {}", key))
    }

    fn apply_processes(&mut self, processes: Vec<ProcessSpec>) {
        let mut previous: HashMap<String, ProcessEntry> = self
            .entries
            .drain(..)
            .map(|e| (e.spec.id.clone(), e))
            .collect();

        self.entries = processes
            .into_iter()
            .map(|spec| match previous.remove(&spec.id) {
                Some(mut entry) => {
                    if entry.spec.autolaunch != spec.autolaunch {
                        entry.autolaunch = spec.autolaunch;
                    }
                    entry.spec = spec;
                    entry
                }
                None => ProcessEntry::new(spec),
            })
            .collect();

        for (_, entry) in previous {
            info!("No longer supervising {}", entry.spec.name);
            self.gate.reset(&entry.spec.name);
        }
    }

    async fn tick_process(&mut self, idx: usize, now: DateTime<Utc>, adopt: bool) -> TetherResult<()> {
        if !self.entries[idx].autolaunch {
            self.mark(idx, ProcessStatus::Inactive).await;
            return Ok(());
        }

        if adopt && self.entries[idx].tracked.is_none() && self.try_adopt(idx).await? {
            return Ok(());
        }

        let tracked = self.entries[idx]
            .tracked
            .as_ref()
            .map(|t| (t.pid, t.launched_at));
        match tracked {
            Some((pid, launched_at)) if self.control.is_alive(pid) => {
                self.check_running(idx, pid, launched_at, now).await
            }
            Some((pid, _)) => {
                info!(
                    "{} (pid {}) is no longer running",
                    self.entries[idx].spec.name, pid
                );
                self.entries[idx].tracked = None;
                self.relaunch_if_due(idx, now).await
            }
            None => self.relaunch_if_due(idx, now).await,
        }
    }

    /// A live, non-superseded PID from an earlier session is taken over
    /// instead of launching a duplicate.
    async fn try_adopt(&mut self, idx: usize) -> TetherResult<bool> {
        let spec_id = self.entries[idx].spec.id.clone();
        let latest = self
            .store
            .blocking(move |store| store.latest_for_spec(&spec_id))
            .await?;
        let Some((pid, record)) = latest else {
            return Ok(false);
        };
        if record.status == ProcessStatus::Killed || !self.control.is_alive(pid) {
            return Ok(false);
        }

        let entry = &mut self.entries[idx];
        info!("Adopting {} (pid {}) from a previous session", entry.spec.name, pid);
        entry.tracked = Some(Tracked {
            pid,
            launched_at: record.launch_timestamp,
        });
        entry.launched_once = true;
        entry.last_launch = Some(record.launch_timestamp);
        entry.status = ProcessStatus::Running;
        self.store
            .blocking(move |store| store.set_status(pid, ProcessStatus::Running))
            .await?;
        self.stats.adopted += 1;
        Ok(true)
    }

    async fn check_running(
        &mut self,
        idx: usize,
        pid: u32,
        launched_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TetherResult<()> {
        let time_to_init = secs(self.entries[idx].spec.time_to_init);
        if now.signed_duration_since(launched_at) < time_to_init {
            self.mark(idx, ProcessStatus::Launching).await;
            return Ok(());
        }

        let responsive = self
            .store
            .blocking(move |store| store.get(pid))
            .await?
            .map(|record| record.responsive)
            .unwrap_or(true);
        if !responsive {
            warn!(
                "{} (pid {}) is not responding",
                self.entries[idx].spec.name, pid
            );
            self.stats.stalls += 1;
            self.mark(idx, ProcessStatus::Stalled).await;
            return self.kill_and_relaunch(idx, now).await;
        }

        self.mark(idx, ProcessStatus::Running).await;
        match self.control.dispatch_probe(pid).await {
            Ok(()) => self.stats.probes_dispatched += 1,
            Err(e) => warn!("{}", e),
        }
        Ok(())
    }

    async fn relaunch_if_due(&mut self, idx: usize, now: DateTime<Utc>) -> TetherResult<()> {
        let entry = &self.entries[idx];
        if now.signed_duration_since(self.started_at) < secs(entry.spec.time_delay) {
            self.mark(idx, ProcessStatus::Queued).await;
            return Ok(());
        }

        if let Some(last) = entry.last_launch {
            if now.signed_duration_since(last) < secs(entry.spec.time_to_init) {
                debug!("{} launched recently, waiting", entry.spec.name);
                return Ok(());
            }
        }

        if entry.launched_once && !self.pass_gate(idx) {
            return Ok(());
        }

        if let Err(e) = self.launch(idx, now).await {
            error!("{}", e);
        }
        Ok(())
    }

    /// Graceful terminate then immediate relaunch, counted against the gate.
    async fn kill_and_relaunch(&mut self, idx: usize, now: DateTime<Utc>) -> TetherResult<()> {
        let previous = self.entries[idx].tracked.take();
        if let Some(tracked) = previous {
            if let Err(e) = self
                .control
                .terminate(tracked.pid, self.config.terminate_timeout())
                .await
            {
                warn!("Failed to terminate pid {}: {}", tracked.pid, e);
            }
        }

        if self.pass_gate(idx) {
            if let Err(e) = self.launch(idx, now).await {
                error!("{}", e);
            }
        }
        Ok(())
    }

    fn pass_gate(&mut self, idx: usize) -> bool {
        let decision = self
            .gate
            .check(&self.entries[idx].spec, &mut *self.prompt);
        if decision == GateDecision::Escalated {
            self.stats.escalations += 1;
        }
        decision.is_allowed()
    }

    async fn launch(&mut self, idx: usize, now: DateTime<Utc>) -> TetherResult<u32> {
        {
            let entry = &mut self.entries[idx];
            entry.launched_once = true;
            entry.last_launch = Some(now);
        }

        let result = self.control.launch(&self.entries[idx].spec).await;
        let pid = match result {
            Ok(pid) => pid,
            Err(e) => {
                self.stats.launch_failures += 1;
                return Err(e);
            }
        };

        let entry = &mut self.entries[idx];
        entry.tracked = Some(Tracked {
            pid,
            launched_at: now,
        });
        entry.status = ProcessStatus::Launching;
        self.stats.launches += 1;
        info!("Launched {} (pid {})", entry.spec.name, pid);

        let spec_id = entry.spec.id.clone();
        let name = entry.spec.name.clone();
        let recorded = self
            .store
            .blocking(move |store| {
                store.record_launch(pid, &spec_id, &name, ProcessStatus::Launching, now)
            })
            .await;
        if let Err(e) = recorded {
            warn!("Failed to record launch of pid {}: {}", pid, e);
        }
        Ok(pid)
    }

    async fn mark(&mut self, idx: usize, status: ProcessStatus) {
        let entry = &mut self.entries[idx];
        if entry.status == status {
            return;
        }
        debug!("{}: {} -> {}", entry.spec.name, entry.status, status);
        entry.status = status;
        if let Some(pid) = entry.tracked.as_ref().map(|t| t.pid) {
            let recorded = self
                .store
                .blocking(move |store| store.set_status(pid, status))
                .await;
            if let Err(e) = recorded {
                warn!("Failed to record status of pid {}: {}", pid, e);
            }
        }
    }

    async fn maybe_compact(&mut self, now: DateTime<Utc>) {
        let due = self
            .last_compaction
            .map(|last| now.signed_duration_since(last).num_seconds() >= COMPACTION_INTERVAL_SECS)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_compaction = Some(now);
        let retention = self.config.record_retention();
        let compacted = self
            .store
            .blocking(move |store| store.compact(retention, now))
            .await;
        if let Err(e) = compacted {
            warn!("Process record compaction failed: {}", e);
        }
    }
}
