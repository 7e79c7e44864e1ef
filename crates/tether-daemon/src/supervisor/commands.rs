use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::config::ProcessSpec;

/// `{type, params}` command as delivered by the control plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum SupervisorCommand {
    Restart {
        process: String,
    },
    Kill {
        process: String,
    },
    ToggleAutolaunch {
        process: String,
        #[serde(default)]
        enabled: Option<bool>,
    },
    UpdateConfig {
        processes: Vec<ProcessSpec>,
    },
}

impl SupervisorCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Restart { .. } => "restart",
            Self::Kill { .. } => "kill",
            Self::ToggleAutolaunch { .. } => "toggle_autolaunch",
            Self::UpdateConfig { .. } => "update_config",
        }
    }
}

pub type CommandReply = Result<String, String>;

pub struct CommandEnvelope {
    pub command: SupervisorCommand,
    pub reply: oneshot::Sender<CommandReply>,
}

pub type CommandReceiver = mpsc::Receiver<CommandEnvelope>;

/// Cloneable sender side; commands are executed inside the supervisor loop.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<CommandEnvelope>,
}

impl SupervisorHandle {
    pub async fn send(&self, command: SupervisorCommand) -> CommandReply {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CommandEnvelope { command, reply })
            .await
            .map_err(|_| "process supervisor is not running".to_string())?;
        rx.await
            .map_err(|_| "process supervisor dropped the command".to_string())?
    }
}

pub fn command_channel(capacity: usize) -> (SupervisorHandle, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (SupervisorHandle { tx }, rx)
}
