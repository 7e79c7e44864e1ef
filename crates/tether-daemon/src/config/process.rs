use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tether_types::{
    TetherError, TetherResult, DEFAULT_MAX_RELAUNCH_ATTEMPTS, DEFAULT_TIME_TO_INIT_SECS,
};

use super::types::{Priority, Visibility};

/// One application the agent keeps running.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSpec {
    pub id: String,
    pub name: String,
    pub exe_path: PathBuf,
    pub args: Vec<String>,
    /// Document or file handed to the executable ahead of `args`.
    pub file_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub priority: Priority,
    pub visibility: Visibility,
    /// Seconds after supervisor start before the first launch.
    pub time_delay: u64,
    /// Seconds a fresh process is given before it is probed or relaunched.
    pub time_to_init: u64,
    /// 0 means unlimited.
    pub max_relaunch_attempts: u32,
    pub autolaunch: bool,
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            exe_path: PathBuf::new(),
            args: Vec::new(),
            file_path: None,
            working_dir: None,
            priority: Priority::Normal,
            visibility: Visibility::Normal,
            time_delay: 0,
            time_to_init: DEFAULT_TIME_TO_INIT_SECS,
            max_relaunch_attempts: DEFAULT_MAX_RELAUNCH_ATTEMPTS,
            autolaunch: true,
        }
    }
}

impl ProcessSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, exe_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            exe_path: exe_path.into(),
            ..Default::default()
        }
    }

    pub fn time_delay(&self) -> Duration {
        Duration::from_secs(self.time_delay)
    }

    pub fn time_to_init(&self) -> Duration {
        Duration::from_secs(self.time_to_init)
    }

    /// Full argument vector: `file_path` first, then `args`.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        if let Some(ref file) = self.file_path {
            args.push(file.to_string_lossy().into_owned());
        }
        args.extend(self.args.iter().cloned());
        args
    }

    pub fn resolved_working_dir(&self) -> Option<PathBuf> {
        self.working_dir
            .clone()
            .or_else(|| self.exe_path.parent().filter(|p| !p.as_os_str().is_empty()).map(|p| p.to_path_buf()))
    }
}

/// Ids and names must be unique and every spec needs an executable.
pub fn validate_processes(processes: &[ProcessSpec]) -> TetherResult<()> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for spec in processes {
        if spec.id.trim().is_empty() {
            return Err(TetherError::Config(format!(
                "Process '{}' has an empty id",
                spec.name
            )));
        }
        if spec.exe_path.as_os_str().is_empty() {
            return Err(TetherError::Config(format!(
                "Process '{}' has no exe_path",
                spec.id
            )));
        }
        if !ids.insert(spec.id.as_str()) {
            return Err(TetherError::Config(format!("Duplicate process id: {}", spec.id)));
        }
        if !names.insert(spec.name.as_str()) {
            return Err(TetherError::Config(format!(
                "Duplicate process name: {}",
                spec.name
            )));
        }
    }
    Ok(())
}
