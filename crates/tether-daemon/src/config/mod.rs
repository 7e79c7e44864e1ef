mod agent;
mod connection;
mod constants;
mod logging;
mod process;
mod supervisor;
mod types;

pub use agent::{AgentConfig, ConfigSummary};
pub use connection::ConnectionConfig;
pub use constants::*;
pub use logging::LoggingConfig;
pub use process::{validate_processes, ProcessSpec};
pub use supervisor::SupervisorConfig;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn editor_spec() -> ProcessSpec {
        ProcessSpec::new("editor", "Editor", "/opt/editor/bin/editor")
    }

    #[test]
    fn test_default_config_validation() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = AgentConfig::default();
        config.connection.base_backoff_secs = 60;
        config.connection.max_backoff_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_threshold() {
        let mut config = AgentConfig::default();
        config.connection.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_tick_interval() {
        let mut config = AgentConfig::default();
        config.supervisor.tick_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_process_ids() {
        let mut config = AgentConfig::default();
        let mut other = editor_spec();
        other.name = "Second Editor".into();
        config.processes = vec![editor_spec(), other];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_exe_path() {
        let mut config = AgentConfig::default();
        config.processes = vec![ProcessSpec::new("viewer", "Viewer", "")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_process_spec_defaults() {
        let spec: ProcessSpec = toml::from_str(
            r#"
            id = "kiosk"
            name = "Kiosk"
            exe_path = "/usr/bin/kiosk"
            "#,
        )
        .unwrap();
        assert!(spec.autolaunch);
        assert_eq!(spec.max_relaunch_attempts, 3);
        assert_eq!(spec.time_to_init, 10);
        assert_eq!(spec.priority, Priority::Normal);
        assert_eq!(spec.visibility, Visibility::Normal);
    }

    #[test]
    fn test_launch_args_put_file_first() {
        let mut spec = editor_spec();
        spec.args = vec!["--fullscreen".into()];
        spec.file_path = Some(PathBuf::from("/srv/show/deck.odp"));
        assert_eq!(spec.launch_args(), vec!["/srv/show/deck.odp", "--fullscreen"]);
    }

    #[test]
    fn test_working_dir_falls_back_to_exe_dir() {
        let spec = editor_spec();
        assert_eq!(spec.resolved_working_dir(), Some(PathBuf::from("/opt/editor/bin")));

        let bare = ProcessSpec::new("bare", "Bare", "editor");
        assert_eq!(bare.resolved_working_dir(), None);
    }

    #[test]
    fn test_state_file_default() {
        let mut config = AgentConfig::default();
        config.data_dir = PathBuf::from("/var/lib/tether");
        assert_eq!(config.state_file(), PathBuf::from("/var/lib/tether/process_state.json"));
    }

    #[test]
    fn test_priority_nice_values() {
        assert_eq!(Priority::Normal.nice_value(), 0);
        assert!(Priority::Idle.nice_value() > 0);
        assert!(Priority::High.nice_value() < 0);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = AgentConfig::default();
        config.processes.push(editor_spec());
        let toml_str = toml::to_string_pretty(&config).expect("Failed to serialize");
        let parsed: AgentConfig = toml::from_str(&toml_str).expect("Failed to parse");
        assert_eq!(parsed.processes, config.processes);
        assert_eq!(parsed.connection.base_backoff_secs, 30);
    }

    #[test]
    fn test_summary_lists_processes() {
        let mut config = AgentConfig::default();
        config.processes.push(editor_spec());
        let text = config.summary().to_string();
        assert!(text.contains("Editor (editor): autolaunch ON"));
    }
}
