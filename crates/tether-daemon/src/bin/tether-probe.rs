use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tether_daemon::probe::{ProbeVerdict, ResponsivenessProbe, SysinfoInspector};
use tether_daemon::storage::StateStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tether-probe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Check whether a supervised process is responsive and record the verdict")]
struct Args {
    #[arg(value_name = "PID")]
    pid: u32,

    #[arg(long, value_name = "FILE", help = "Process state file")]
    store: Option<PathBuf>,

    #[arg(long, value_name = "SECS", default_value_t = tether_types::PROBE_GRACE_PERIOD_SECS)]
    grace: u64,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(ProbeVerdict::Unresponsive) => ExitCode::from(2),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tether-probe: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ProbeVerdict> {
    let store_path = args.store.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .map(|h| h.join(".tether"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/tether"))
            .join(tether_daemon::config::DEFAULT_STATE_FILE)
    });

    let store = StateStore::at(&store_path)
        .with_context(|| format!("opening state store {:?}", store_path))?;

    let mut probe = ResponsivenessProbe::new(store, SysinfoInspector::new())
        .with_grace(Duration::from_secs(args.grace));

    probe
        .evaluate(args.pid, chrono::Utc::now())
        .with_context(|| format!("probing pid {}", args.pid))
}
