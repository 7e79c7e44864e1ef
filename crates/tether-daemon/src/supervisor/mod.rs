mod commands;
mod control;
mod core;
mod escalation;
mod relaunch;
mod stats;

pub use commands::{
    command_channel, CommandEnvelope, CommandReceiver, CommandReply, SupervisorCommand,
    SupervisorHandle,
};
pub use control::{OsProcessControl, ProcessControl};
pub use self::core::ProcessSupervisor;
pub use escalation::{CommandPrompt, EscalationPrompt};
pub use relaunch::{GateDecision, RelaunchGate};
pub use stats::{ProcessView, SupervisorStats};

#[cfg(test)]
mod tests;
