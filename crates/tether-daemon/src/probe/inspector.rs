use sysinfo::{Pid, ProcessStatus as OsStatus, System};

/// What a single OS-level sample says about a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessCondition {
    Active,
    /// Stopped, zombie, dead or stuck in uninterruptible sleep.
    Blocked,
}

pub trait ProcessInspector {
    /// `None` when the process no longer exists.
    fn sample(&mut self, pid: u32) -> Option<ProcessCondition>;
}

pub struct SysinfoInspector {
    system: System,
}

impl SysinfoInspector {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for SysinfoInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInspector for SysinfoInspector {
    fn sample(&mut self, pid: u32) -> Option<ProcessCondition> {
        let os_pid = Pid::from_u32(pid);
        if !self.system.refresh_process(os_pid) {
            return None;
        }
        let process = self.system.process(os_pid)?;

        let blocked = matches!(
            process.status(),
            OsStatus::Stop | OsStatus::Zombie | OsStatus::Dead
        ) || in_uninterruptible_sleep(pid);

        Some(if blocked {
            ProcessCondition::Blocked
        } else {
            ProcessCondition::Active
        })
    }
}

#[cfg(target_os = "linux")]
fn in_uninterruptible_sleep(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat, after the parenthesised command name.
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            stat.rfind(')')
                .and_then(|idx| stat[idx + 1..].split_whitespace().next().map(|s| s == "D"))
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn in_uninterruptible_sleep(_pid: u32) -> bool {
    false
}
