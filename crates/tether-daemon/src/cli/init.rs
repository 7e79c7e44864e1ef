use super::utils::Paths;
use anyhow::{Context, Result};
use tether_daemon::config::{AgentConfig, ProcessSpec};

pub fn init_config(paths: &Paths, force: bool) -> Result<()> {
    println!("\x1b[38;5;46mInitializing tether agent...\x1b[0m");
    println!();

    if paths.config.exists() && !force {
        println!("\x1b[38;5;226mConfiguration already exists at {:?}\x1b[0m", paths.config);
        println!("Use --force to overwrite");
        return Ok(());
    }

    std::fs::create_dir_all(&paths.data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", paths.data_dir))?;

    let config = default_config(paths);
    config.save(&paths.config)?;

    println!("  Config: \x1b[38;5;51m{:?}\x1b[0m", paths.config);
    println!("  Data:   \x1b[38;5;51m{:?}\x1b[0m", paths.data_dir);
    println!();
    println!("\x1b[38;5;226mNext steps:\x1b[0m");
    println!("  1. Add [[processes]] entries to the config");
    println!("  2. Set connection.control_plane_url");
    println!("  3. Validate: \x1b[38;5;51mtether check\x1b[0m");
    println!("  4. Start the agent: \x1b[38;5;51mtether run\x1b[0m");

    Ok(())
}

fn default_config(paths: &Paths) -> AgentConfig {
    let mut example = ProcessSpec::new("example", "Example App", "/usr/bin/example-app");
    example.autolaunch = false;

    AgentConfig {
        data_dir: paths.data_dir.clone(),
        processes: vec![example],
        ..AgentConfig::default()
    }
}
