use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus as OsStatus, System};
use tether_types::{TetherError, TetherResult};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::{Priority, ProcessSpec, Visibility};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// OS-facing primitives shared by the tick loop and the command handler.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn launch(&self, spec: &ProcessSpec) -> TetherResult<u32>;

    /// Ask the process to exit, then force it after `timeout`.
    async fn terminate(&self, pid: u32, timeout: Duration) -> TetherResult<()>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Start one probe run for `pid` without waiting for it.
    async fn dispatch_probe(&self, pid: u32) -> TetherResult<()>;
}

pub struct OsProcessControl {
    probe_path: PathBuf,
    store_path: PathBuf,
    probe_grace_secs: u64,
    children: Mutex<HashMap<u32, Child>>,
    system: Mutex<System>,
}

impl OsProcessControl {
    pub fn new(probe_path: PathBuf, store_path: PathBuf, probe_grace_secs: u64) -> Self {
        Self {
            probe_path,
            store_path,
            probe_grace_secs,
            children: Mutex::new(HashMap::new()),
            system: Mutex::new(System::new()),
        }
    }

    fn build_command(spec: &ProcessSpec) -> Command {
        let args = spec.launch_args();

        #[cfg(unix)]
        let mut cmd = if spec.priority != Priority::Normal {
            let mut cmd = Command::new("nice");
            cmd.arg("-n")
                .arg(spec.priority.nice_value().to_string())
                .arg(&spec.exe_path)
                .args(&args);
            cmd
        } else {
            let mut cmd = Command::new(&spec.exe_path);
            cmd.args(&args);
            cmd
        };

        #[cfg(not(unix))]
        let mut cmd = {
            let mut cmd = Command::new(&spec.exe_path);
            cmd.args(&args);
            cmd
        };

        if let Some(dir) = spec.resolved_working_dir() {
            cmd.current_dir(dir);
        }

        match spec.visibility {
            Visibility::Hidden => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
            }
            Visibility::Minimized => {
                cmd.stdin(Stdio::null());
            }
            Visibility::Normal => {}
        }

        cmd
    }

    fn os_alive(&self, pid: u32) -> bool {
        let os_pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        if !system.refresh_process(os_pid) {
            return false;
        }
        system
            .process(os_pid)
            .map(|p| !matches!(p.status(), OsStatus::Zombie | OsStatus::Dead))
            .unwrap_or(false)
    }

    #[cfg(unix)]
    fn signal(&self, pid: u32, force: bool) -> TetherResult<bool> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid as NixPid;

        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        match kill(NixPid::from_raw(pid as i32), signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(TetherError::Process(format!(
                "Failed to send {:?} to pid {}: {}",
                signal, pid, e
            ))),
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, pid: u32, _force: bool) -> TetherResult<bool> {
        let os_pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        if !system.refresh_process(os_pid) {
            return Ok(false);
        }
        Ok(system.process(os_pid).map(|p| p.kill()).unwrap_or(false))
    }
}

#[async_trait]
impl ProcessControl for OsProcessControl {
    async fn launch(&self, spec: &ProcessSpec) -> TetherResult<u32> {
        if !spec.exe_path.exists() {
            return Err(TetherError::launch(
                &spec.name,
                format!("executable not found: {}", spec.exe_path.display()),
            ));
        }

        let child = Self::build_command(spec)
            .spawn()
            .map_err(|e| TetherError::launch(&spec.name, e))?;
        let pid = child
            .id()
            .ok_or_else(|| TetherError::launch(&spec.name, "exited before reporting a pid"))?;

        self.children.lock().insert(pid, child);
        debug!("Spawned {} as pid {}", spec.exe_path.display(), pid);
        Ok(pid)
    }

    async fn terminate(&self, pid: u32, timeout: Duration) -> TetherResult<()> {
        if !self.signal(pid, false)? {
            self.children.lock().remove(&pid);
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !self.is_alive(pid) {
                info!("pid {} exited after termination request", pid);
                return Ok(());
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }

        warn!("pid {} still running after {}s, killing", pid, timeout.as_secs());
        self.signal(pid, true)?;

        let child = self.children.lock().remove(&pid);
        if let Some(mut child) = child {
            let _ = tokio::time::timeout(timeout, child.wait()).await;
        }
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        {
            let mut children = self.children.lock();
            if let Some(child) = children.get_mut(&pid) {
                match child.try_wait() {
                    Ok(None) => return true,
                    Ok(Some(status)) => {
                        debug!("pid {} exited with {}", pid, status);
                        children.remove(&pid);
                        return false;
                    }
                    Err(e) => debug!("try_wait for pid {} failed: {}", pid, e),
                }
            }
        }
        self.os_alive(pid)
    }

    async fn dispatch_probe(&self, pid: u32) -> TetherResult<()> {
        let mut child = Command::new(&self.probe_path)
            .arg(pid.to_string())
            .arg("--store")
            .arg(&self.store_path)
            .arg("--grace")
            .arg(self.probe_grace_secs.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                TetherError::Process(format!(
                    "Failed to start probe {}: {}",
                    self.probe_path.display(),
                    e
                ))
            })?;

        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }
}
