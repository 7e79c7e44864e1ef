mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{init_config, init_logging, run_agent, run_checks, show_status, show_version, Cli, Commands, Paths};
use tether_daemon::config::{AgentConfig, DEFAULT_STATE_FILE};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::resolve(&cli);

    let loaded = AgentConfig::load(&paths.config).map(|mut config| {
        if cli.data_dir.is_some() {
            config.data_dir = paths.data_dir.clone();
        }
        config
    });

    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(&cli, &logging)?;

    match cli.command {
        Commands::Run { ref pid_file, systemd } => {
            run_agent(loaded?, pid_file.clone(), systemd).await?;
        }
        Commands::Status => {
            let state_file = loaded
                .as_ref()
                .map(|c| c.state_file())
                .unwrap_or_else(|_| paths.data_dir.join(DEFAULT_STATE_FILE));
            show_status(&state_file, cli.format)?;
        }
        Commands::Check => {
            run_checks(&paths, loaded.as_ref().map_err(|e| e.to_string()), cli.format)?;
        }
        Commands::Init { force } => {
            init_config(&paths, force)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}
