use std::process::{Child, Command, Stdio};
use tether_types::{TetherError, TetherResult};
use tracing::{error, warn};

use crate::config::ProcessSpec;

/// Operator-facing "restart imminent" notice shown when a process keeps
/// failing. Only one may be up at a time.
pub trait EscalationPrompt: Send {
    fn is_active(&mut self) -> bool;

    /// Returns false when a prompt is already showing.
    fn show(&mut self, spec: &ProcessSpec) -> TetherResult<bool>;
}

/// Runs a configured command, with `{name}` and `{id}` substituted, and
/// treats it as active until it exits.
pub struct CommandPrompt {
    command: Vec<String>,
    active: Option<Child>,
}

impl CommandPrompt {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            active: None,
        }
    }
}

impl EscalationPrompt for CommandPrompt {
    fn is_active(&mut self) -> bool {
        let Some(child) = self.active.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => {
                self.active = None;
                false
            }
            Err(e) => {
                error!("Lost track of restart prompt: {}", e);
                self.active = None;
                false
            }
        }
    }

    fn show(&mut self, spec: &ProcessSpec) -> TetherResult<bool> {
        if self.is_active() {
            return Ok(false);
        }

        let Some((program, args)) = self.command.split_first() else {
            warn!(
                "Restart imminent for {}: relaunch attempts exhausted (no prompt configured)",
                spec.name
            );
            return Ok(true);
        };

        let args: Vec<String> = args
            .iter()
            .map(|a| a.replace("{name}", &spec.name).replace("{id}", &spec.id))
            .collect();
        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| TetherError::Process(format!("Failed to show restart prompt: {}", e)))?;

        self.active = Some(child);
        Ok(true)
    }
}
