use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tether_types::{MachineId, TetherError, TetherResult};
use tracing::{info, warn};

use super::connection::ConnectionConfig;
use super::constants::DEFAULT_STATE_FILE;
use super::logging::LoggingConfig;
use super::process::{validate_processes, ProcessSpec};
use super::supervisor::SupervisorConfig;
use super::types::LogLevel;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub data_dir: PathBuf,
    pub machine_id: MachineId,
    pub logging: LoggingConfig,
    pub connection: ConnectionConfig,
    pub supervisor: SupervisorConfig,
    pub processes: Vec<ProcessSpec>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/var/lib/tether"));
        let machine_id = sysinfo::System::host_name()
            .map(MachineId::new)
            .unwrap_or_else(|| MachineId::new("unnamed-machine"));

        Self {
            data_dir: home.join(".tether"),
            machine_id,
            logging: LoggingConfig::default(),
            connection: ConnectionConfig::default(),
            supervisor: SupervisorConfig::default(),
            processes: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: impl AsRef<Path>) -> TetherResult<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| TetherError::Config(format!("Failed to read config: {}", e)))?;

            toml::from_str(&contents)
                .map_err(|e| TetherError::Config(format!("Failed to parse config: {}", e)))?
        } else {
            info!("Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> TetherResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TetherError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TetherError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path.as_ref(), contents)
            .map_err(|e| TetherError::Config(format!("Failed to write config: {}", e)))?;

        info!("Configuration saved to {:?}", path.as_ref());
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TETHER_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(id) = std::env::var("TETHER_MACHINE_ID") {
            self.machine_id = MachineId::new(id);
        }

        if let Ok(url) = std::env::var("TETHER_CONTROL_PLANE_URL") {
            self.connection.control_plane_url = url;
        }

        if let Ok(level) = std::env::var("TETHER_LOG_LEVEL") {
            self.logging.level = LogLevel::parse_lossy(&level);
        }

        if std::env::var("TETHER_LOG_JSON").is_ok() {
            self.logging.json = true;
        }
    }

    pub fn validate(&self) -> TetherResult<()> {
        if self.machine_id.is_empty() {
            return Err(TetherError::Config("machine_id cannot be empty".into()));
        }

        let conn = &self.connection;
        if conn.base_backoff_secs == 0 {
            return Err(TetherError::Config("base_backoff_secs must be at least 1".into()));
        }

        if conn.max_backoff_secs < conn.base_backoff_secs {
            return Err(TetherError::Config(
                "max_backoff_secs cannot be smaller than base_backoff_secs".into(),
            ));
        }

        if conn.failure_threshold == 0 {
            return Err(TetherError::Config("failure_threshold must be at least 1".into()));
        }

        if conn.watchdog_interval_secs == 0 {
            return Err(TetherError::Config("watchdog_interval_secs cannot be 0".into()));
        }

        if conn.reachability_endpoints.is_empty() {
            warn!("No reachability endpoints configured - network checks are skipped");
        }

        if self.supervisor.tick_interval_secs == 0 {
            return Err(TetherError::Config("tick_interval_secs cannot be 0".into()));
        }

        validate_processes(&self.processes)?;

        if !self.supervisor.prompt_command.is_empty()
            && self.supervisor.prompt_command[0].trim().is_empty()
        {
            return Err(TetherError::Config("prompt_command program is empty".into()));
        }

        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        self.supervisor
            .state_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DEFAULT_STATE_FILE))
    }

    pub fn autolaunch_count(&self) -> usize {
        self.processes.iter().filter(|p| p.autolaunch).count()
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            machine_id: self.machine_id.clone(),
            data_dir: self.data_dir.clone(),
            control_plane_url: self.connection.control_plane_url.clone(),
            state_file: self.state_file(),
            tick_interval_secs: self.supervisor.tick_interval_secs,
            processes: self
                .processes
                .iter()
                .map(|p| (p.id.clone(), p.name.clone(), p.autolaunch))
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct ConfigSummary {
    pub machine_id: MachineId,
    pub data_dir: PathBuf,
    pub control_plane_url: String,
    pub state_file: PathBuf,
    pub tick_interval_secs: u64,
    pub processes: Vec<(String, String, bool)>,
}

impl std::fmt::Display for ConfigSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Tether Agent Configuration")?;
        writeln!(f, "==========================")?;
        writeln!(f, "Machine: {}", self.machine_id)?;
        writeln!(f, "Data dir: {:?}", self.data_dir)?;
        writeln!(f, "Control plane: {}", self.control_plane_url)?;
        writeln!(f, "State file: {:?}", self.state_file)?;
        writeln!(f, "Tick interval: {}s", self.tick_interval_secs)?;
        writeln!(f, "Processes:")?;
        for (id, name, autolaunch) in &self.processes {
            writeln!(
                f,
                "  {} ({}): autolaunch {}",
                name,
                id,
                if *autolaunch { "ON" } else { "OFF" }
            )?;
        }
        Ok(())
    }
}
