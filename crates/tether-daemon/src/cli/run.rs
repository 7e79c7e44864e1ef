use super::utils::{print_banner, BUILD_VERSION};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether_daemon::config::AgentConfig;
use tether_daemon::connection::{ConnectionManager, ConnectionSettings, ShutdownSignal, TcpReachability};
use tether_daemon::control_plane::HttpControlPlane;
use tether_daemon::storage::StateStore;
use tether_daemon::supervisor::{command_channel, CommandPrompt, OsProcessControl, ProcessSupervisor};
use tether_daemon::workers::{register_workers, WorkerContext, WorkerIntervals};
use tether_types::ConnectionState;
use tracing::{info, warn};

const COMMAND_QUEUE_CAPACITY: usize = 32;

pub async fn run_agent(config: AgentConfig, pid_file: Option<PathBuf>, systemd: bool) -> Result<()> {
    print_banner();
    info!("Starting tether agent v{}", BUILD_VERSION);
    info!("Machine: {}", config.machine_id);
    info!("Data directory: {:?}", config.data_dir);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;

    if let Some(ref pid_path) = pid_file {
        std::fs::write(pid_path, std::process::id().to_string())
            .with_context(|| format!("Failed to write PID file {:?}", pid_path))?;
        info!("PID file written: {:?}", pid_path);
    }

    let state_file = config.state_file();
    let store = StateStore::at(&state_file)
        .with_context(|| format!("Failed to open process state {:?}", state_file))?;
    info!("Process state: {:?}", state_file);

    let control = OsProcessControl::new(
        config.supervisor.resolved_probe_path(),
        state_file.clone(),
        config.supervisor.probe_grace_secs,
    );
    let prompt = CommandPrompt::new(config.supervisor.prompt_command.clone());
    let supervisor = ProcessSupervisor::new(
        config.supervisor.clone(),
        config.processes.clone(),
        store.clone(),
        Box::new(control),
        Box::new(prompt),
    );
    let (handle, commands) = command_channel(COMMAND_QUEUE_CAPACITY);
    let (supervisor_shutdown, supervisor_token) = ShutdownSignal::new();
    let supervisor_task = tokio::spawn(supervisor.run(commands, supervisor_token));
    info!(
        "Process supervisor started ({} of {} processes on autolaunch)",
        config.autolaunch_count(),
        config.processes.len()
    );

    let client = Arc::new(HttpControlPlane::new(
        &config.connection.control_plane_url,
        config.machine_id.clone(),
        Duration::from_secs(config.connection.request_timeout_secs),
    )?);
    let reachability = Arc::new(TcpReachability::new(
        config.connection.reachability_endpoints.clone(),
        Duration::from_secs(config.connection.reachability_timeout_secs),
    ));
    let manager = ConnectionManager::new(
        ConnectionSettings::from(&config.connection),
        client.clone(),
        reachability,
    );
    manager.add_state_listener(|change| {
        if change.new == ConnectionState::Backoff {
            warn!("Control plane unreachable: {}", change.reason);
        }
    });

    let ctx = WorkerContext::new(
        client,
        config.machine_id.clone(),
        store,
        handle,
        WorkerIntervals::from(&config.connection),
        &manager,
    );
    register_workers(&manager, ctx)?;
    manager.enable_thread_supervision();
    manager.start_watchdog();

    if manager.connect().await {
        info!("Connected to control plane at {}", config.connection.control_plane_url);
    } else {
        warn!("Initial connection failed, retrying in the background");
    }

    if systemd {
        notify_systemd_ready();
    }

    wait_for_shutdown().await;

    info!("Shutting down...");
    supervisor_shutdown.cancel();
    manager.shutdown().await;
    match tokio::time::timeout(config.connection.shutdown_timeout(), supervisor_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Process supervisor task failed: {}", e),
        Err(_) => warn!("Process supervisor did not stop in time"),
    }

    if let Some(ref pid_path) = pid_file {
        let _ = std::fs::remove_file(pid_path);
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => { info!("Received SIGTERM"); }
                    _ = sigint.recv() => { info!("Received SIGINT"); }
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers: {}, falling back to Ctrl+C", e);
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
    }
}

fn notify_systemd_ready() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(socket_path) = std::env::var("NOTIFY_SOCKET") {
            use std::os::unix::net::UnixDatagram;
            if let Ok(socket) = UnixDatagram::unbound() {
                let _ = socket.send_to(b"READY=1", &socket_path);
                tracing::debug!("Notified systemd: READY=1");
            }
        }
    }
}
