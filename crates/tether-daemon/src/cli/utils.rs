use super::commands::Cli;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tether_daemon::config::{LoggingConfig, DEFAULT_CONFIG_FILE};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Data directory and config file resolved from flags, env and defaults.
#[derive(Clone, Debug)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub config: PathBuf,
}

impl Paths {
    pub fn resolve(cli: &Cli) -> Self {
        let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
        let config = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join(DEFAULT_CONFIG_FILE));
        Self { data_dir, config }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".tether"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/tether"))
}

/// `RUST_LOG` wins. Otherwise `-v`/`--quiet`, falling back to the configured level.
pub fn filter_directive(cli: &Cli, logging: &LoggingConfig) -> String {
    if cli.quiet {
        return "warn".to_string();
    }
    match cli.verbose {
        0 => logging.level.to_string(),
        1 => "info,tether_daemon=debug".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

pub fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(cli, logging)));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    let log_file = cli.log_file.clone().or_else(|| logging.file.clone());
    if let Some(ref path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        let writer = std::sync::Mutex::new(file);
        if logging.json {
            subscriber.with(fmt::layer().json().with_writer(writer)).init();
        } else {
            subscriber
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
        }
    } else if logging.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(cli.verbose >= 2))
            .init();
    }

    Ok(())
}

pub fn print_banner() {
    println!("\x1b[38;5;46mtether\x1b[0m \x1b[38;5;245mv{}\x1b[0m", BUILD_VERSION);
    println!();
}

pub fn show_version() {
    print_banner();
    println!("  Version:   \x1b[38;5;51m{}\x1b[0m", BUILD_VERSION);
    println!("  Profile:   \x1b[38;5;245m{}\x1b[0m", if cfg!(debug_assertions) { "debug" } else { "release" });
    println!("  Platform:  \x1b[38;5;245m{}/{}\x1b[0m", std::env::consts::OS, std::env::consts::ARCH);
}
