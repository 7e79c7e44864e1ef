//! One-shot responsiveness evaluation, run by the `tether-probe` binary.

mod inspector;

pub use inspector::{ProcessCondition, ProcessInspector, SysinfoInspector};

use chrono::{DateTime, Utc};
use std::time::Duration;
use tether_types::{TetherResult, PROBE_GRACE_PERIOD_SECS};
use tracing::{debug, info, warn};

use crate::storage::{ProbeTransition, StateStore};

pub const DEFAULT_SAMPLES: u32 = 3;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 250;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeVerdict {
    Responsive,
    Unresponsive,
    /// Launched too recently to be judged; recorded as responsive.
    WithinGrace,
    /// No record for the PID in the state store.
    NotTracked,
    /// The process exited while being sampled.
    Gone,
}

pub struct ResponsivenessProbe<I: ProcessInspector> {
    store: StateStore,
    inspector: I,
    grace: chrono::Duration,
    samples: u32,
    sample_interval: Duration,
}

impl<I: ProcessInspector> ResponsivenessProbe<I> {
    pub fn new(store: StateStore, inspector: I) -> Self {
        Self {
            store,
            inspector,
            grace: chrono::Duration::seconds(PROBE_GRACE_PERIOD_SECS as i64),
            samples: DEFAULT_SAMPLES,
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = chrono::Duration::from_std(grace).unwrap_or(self.grace);
        self
    }

    pub fn with_sampling(mut self, samples: u32, interval: Duration) -> Self {
        self.samples = samples.max(1);
        self.sample_interval = interval;
        self
    }

    pub fn evaluate(&mut self, pid: u32, now: DateTime<Utc>) -> TetherResult<ProbeVerdict> {
        let record = match self.store.get(pid)? {
            Some(record) => record,
            None => {
                debug!("pid {} is not tracked, nothing to probe", pid);
                return Ok(ProbeVerdict::NotTracked);
            }
        };

        if record.age(now) < self.grace {
            self.store.record_probe(pid, true, now)?;
            debug!("pid {} ({}) is inside the startup grace period", pid, record.name);
            return Ok(ProbeVerdict::WithinGrace);
        }

        let mut blocked_samples = 0;
        for i in 0..self.samples {
            if i > 0 && !self.sample_interval.is_zero() {
                std::thread::sleep(self.sample_interval);
            }
            match self.inspector.sample(pid) {
                Some(ProcessCondition::Blocked) => blocked_samples += 1,
                Some(ProcessCondition::Active) => {}
                None => {
                    debug!("pid {} exited during probe", pid);
                    return Ok(ProbeVerdict::Gone);
                }
            }
        }

        let responsive = blocked_samples < self.samples;
        match self.store.record_probe(pid, responsive, now)? {
            Some(ProbeTransition::BecameUnresponsive) => {
                warn!("{} (pid {}) stopped responding", record.name, pid);
            }
            Some(ProbeTransition::BecameResponsive) => {
                info!("{} (pid {}) is responding again", record.name, pid);
            }
            None => {}
        }

        Ok(if responsive {
            ProbeVerdict::Responsive
        } else {
            ProbeVerdict::Unresponsive
        })
    }
}
