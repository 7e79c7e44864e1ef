use thiserror::Error;

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Remote rejected machine: {0}")]
    FatalRemote(String),

    #[error("Failed to launch '{process}': {reason}")]
    Launch { process: String, reason: String },

    #[error("Probe timed out for pid {0}")]
    ProbeTimeout(u32),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("State store locked by another process after {attempts} attempts")]
    StoreLocked { attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TetherError {
    pub fn launch(process: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Launch {
            process: process.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error came from the remote side of the link rather than
    /// from this machine.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Connection(_) | Self::FatalRemote(_)
        )
    }
}

impl From<std::io::Error> for TetherError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type TetherResult<T> = Result<T, TetherError>;
