use std::collections::HashMap;
use tracing::{error, info, warn};

use super::escalation::EscalationPrompt;
use crate::config::ProcessSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed { attempt: u32, max: u32 },
    /// Attempts exhausted: the prompt was raised and the counter reset.
    Escalated,
    /// A prompt is already up; nothing happens until it is dismissed.
    Suppressed,
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Consecutive relaunch attempts per process name for this session.
#[derive(Debug, Default)]
pub struct RelaunchGate {
    counters: HashMap<String, u32>,
}

impl RelaunchGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, spec: &ProcessSpec, prompt: &mut dyn EscalationPrompt) -> GateDecision {
        if prompt.is_active() {
            return GateDecision::Suppressed;
        }

        let max = spec.max_relaunch_attempts;
        let count = self.counters.entry(spec.name.clone()).or_insert(0);
        if max == 0 || *count < max {
            *count += 1;
            if max == 0 {
                info!("Relaunching {} (attempt {})", spec.name, count);
            } else {
                info!("Relaunching {} (attempt {} of {})", spec.name, count, max);
            }
            return GateDecision::Allowed {
                attempt: *count,
                max,
            };
        }

        *count = 0;
        match prompt.show(spec) {
            Ok(true) => warn!(
                "{} failed {} relaunch attempts, restart prompt raised",
                spec.name, max
            ),
            Ok(false) => {}
            Err(e) => error!("{}: {}", spec.name, e),
        }
        GateDecision::Escalated
    }

    pub fn reset(&mut self, name: &str) {
        self.counters.remove(name);
    }

    pub fn count(&self, name: &str) -> u32 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}
