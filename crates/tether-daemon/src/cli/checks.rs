use super::commands::OutputFormat;
use super::utils::Paths;
use anyhow::{bail, Result};
use serde::Serialize;
use tether_daemon::config::AgentConfig;
use tether_daemon::storage::StateStore;

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum Outcome {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Serialize)]
struct CheckLine {
    name: &'static str,
    outcome: Outcome,
    detail: String,
}

impl CheckLine {
    fn new(name: &'static str, outcome: Outcome, detail: impl Into<String>) -> Self {
        Self { name, outcome, detail: detail.into() }
    }
}

/// Reports the configuration load result, then inspects the paths the agent will use.
pub fn run_checks(paths: &Paths, loaded: Result<&AgentConfig, String>, format: OutputFormat) -> Result<()> {
    let mut lines = Vec::new();

    match &loaded {
        Ok(_) if paths.config.exists() => {
            lines.push(CheckLine::new("configuration", Outcome::Ok, format!("{:?}", paths.config)))
        }
        Ok(_) => lines.push(CheckLine::new(
            "configuration",
            Outcome::Warn,
            "file not found, using defaults (run: tether init)",
        )),
        Err(e) => lines.push(CheckLine::new("configuration", Outcome::Fail, e.clone())),
    }

    let config = loaded.as_ref().ok().copied();
    if let Some(config) = config {
        lines.extend(check_config(config));
    }

    let failed = lines.iter().filter(|l| l.outcome == Outcome::Fail).count();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&lines)?),
        OutputFormat::Text => {
            println!("\x1b[38;5;46mTether Agent Diagnostics\x1b[0m");
            println!("\x1b[38;5;245m{}\x1b[0m", "=".repeat(50));
            let total = lines.len();
            for (i, line) in lines.iter().enumerate() {
                let tag = match line.outcome {
                    Outcome::Ok => "\x1b[38;5;46mOK\x1b[0m",
                    Outcome::Warn => "\x1b[38;5;226mWARN\x1b[0m",
                    Outcome::Fail => "\x1b[38;5;196mFAIL\x1b[0m",
                };
                println!("[{}/{}] {:<16} {} {}", i + 1, total, line.name, tag, line.detail);
            }
            if let Some(config) = config {
                println!();
                print!("{}", config.summary());
            }
        }
    }

    if failed > 0 {
        bail!("{} check(s) failed", failed);
    }
    Ok(())
}

fn check_config(config: &AgentConfig) -> Vec<CheckLine> {
    let mut lines = Vec::new();

    let data_dir = &config.data_dir;
    lines.push(if data_dir.is_dir() {
        CheckLine::new("data directory", Outcome::Ok, format!("{:?}", data_dir))
    } else if data_dir.exists() {
        CheckLine::new("data directory", Outcome::Fail, "not a directory")
    } else {
        CheckLine::new("data directory", Outcome::Warn, "will be created on start")
    });

    let state_file = config.state_file();
    lines.push(if !state_file.exists() {
        CheckLine::new("process state", Outcome::Warn, "no state recorded yet")
    } else {
        match StateStore::at(&state_file).and_then(|s| s.load()) {
            Ok(state) => CheckLine::new(
                "process state",
                Outcome::Ok,
                format!("{} record(s)", state.records.len()),
            ),
            Err(e) => CheckLine::new("process state", Outcome::Fail, e.to_string()),
        }
    });

    let probe = config.supervisor.resolved_probe_path();
    lines.push(if probe.exists() {
        CheckLine::new("probe", Outcome::Ok, format!("{:?}", probe))
    } else {
        CheckLine::new("probe", Outcome::Warn, format!("{:?} not found, hang detection disabled", probe))
    });

    for spec in &config.processes {
        let exists = spec.exe_path.exists() || !spec.exe_path.is_absolute();
        lines.push(if exists {
            CheckLine::new("process", Outcome::Ok, format!("{} ({:?})", spec.name, spec.exe_path))
        } else {
            CheckLine::new("process", Outcome::Warn, format!("{}: {:?} not found", spec.name, spec.exe_path))
        });
    }

    if config.processes.is_empty() {
        lines.push(CheckLine::new("process", Outcome::Warn, "no processes configured"));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_daemon::config::ProcessSpec;

    #[test]
    fn test_missing_absolute_exe_warns() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.processes.push(ProcessSpec::new("ghost", "Ghost", "/nonexistent/ghost"));

        let lines = check_config(&config);
        assert_eq!(lines[0].outcome, Outcome::Ok);
        let ghost = lines.iter().find(|l| l.detail.contains("Ghost")).unwrap();
        assert_eq!(ghost.outcome, Outcome::Warn);
    }

    #[test]
    fn test_invalid_config_fails() {
        let paths = Paths {
            data_dir: "/tmp".into(),
            config: "/tmp/does-not-matter.toml".into(),
        };
        let result = run_checks(&paths, Err("tick_interval_secs cannot be 0".into()), OutputFormat::Json);
        assert!(result.is_err());
    }
}
