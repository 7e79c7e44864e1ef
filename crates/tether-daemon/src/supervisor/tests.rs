use super::*;
use crate::config::{ProcessSpec, SupervisorConfig};
use crate::connection::ShutdownSignal;
use crate::storage::StateStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tether_types::{ProcessStatus, TetherError, TetherResult};

#[derive(Default)]
struct FakeOs {
    next_pid: u32,
    alive: HashSet<u32>,
    launch_attempts: u32,
    launched: Vec<(String, u32)>,
    terminated: Vec<u32>,
    probes: Vec<u32>,
    fail_launch: bool,
}

#[derive(Clone, Default)]
struct FakeControl {
    os: Arc<Mutex<FakeOs>>,
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn launch(&self, spec: &ProcessSpec) -> TetherResult<u32> {
        let mut os = self.os.lock();
        os.launch_attempts += 1;
        if os.fail_launch {
            return Err(TetherError::launch(&spec.name, "executable not found"));
        }
        os.next_pid += 1;
        let pid = 1000 + os.next_pid;
        os.alive.insert(pid);
        os.launched.push((spec.id.clone(), pid));
        Ok(pid)
    }

    async fn terminate(&self, pid: u32, _timeout: Duration) -> TetherResult<()> {
        let mut os = self.os.lock();
        os.alive.remove(&pid);
        os.terminated.push(pid);
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.os.lock().alive.contains(&pid)
    }

    async fn dispatch_probe(&self, pid: u32) -> TetherResult<()> {
        self.os.lock().probes.push(pid);
        Ok(())
    }
}

#[derive(Default)]
struct PromptState {
    active: bool,
    shown: u32,
}

#[derive(Clone, Default)]
struct FakePrompt {
    state: Arc<Mutex<PromptState>>,
}

impl EscalationPrompt for FakePrompt {
    fn is_active(&mut self) -> bool {
        self.state.lock().active
    }

    fn show(&mut self, _spec: &ProcessSpec) -> TetherResult<bool> {
        let mut state = self.state.lock();
        if state.active {
            return Ok(false);
        }
        state.active = true;
        state.shown += 1;
        Ok(true)
    }
}

struct Harness {
    _dir: TempDir,
    store: StateStore,
    control: FakeControl,
    prompt: FakePrompt,
    supervisor: ProcessSupervisor,
}

impl Harness {
    fn new(specs: Vec<ProcessSpec>) -> Self {
        let dir = TempDir::new().unwrap();
        let store = StateStore::at(dir.path().join("process_state.json")).unwrap();
        Self::with_store(dir, store, specs)
    }

    fn with_store(dir: TempDir, store: StateStore, specs: Vec<ProcessSpec>) -> Self {
        let control = FakeControl::default();
        let prompt = FakePrompt::default();
        let supervisor = ProcessSupervisor::new(
            SupervisorConfig::default(),
            specs,
            store.clone(),
            Box::new(control.clone()),
            Box::new(prompt.clone()),
        );
        Self {
            _dir: dir,
            store,
            control,
            prompt,
            supervisor,
        }
    }

    fn at(&self, secs: i64) -> DateTime<Utc> {
        self.supervisor.started_at() + ChronoDuration::seconds(secs)
    }

    fn launched(&self) -> Vec<(String, u32)> {
        self.control.os.lock().launched.clone()
    }

    fn last_pid(&self) -> u32 {
        self.launched().last().map(|(_, pid)| *pid).unwrap()
    }

    fn crash(&self, pid: u32) {
        self.control.os.lock().alive.remove(&pid);
    }

    fn view(&self, id: &str) -> ProcessView {
        self.supervisor
            .processes()
            .into_iter()
            .find(|p| p.id == id)
            .unwrap()
    }
}

fn editor() -> ProcessSpec {
    let mut spec = ProcessSpec::new("editor", "Editor", "/opt/editor/bin/editor");
    spec.time_to_init = 10;
    spec.max_relaunch_attempts = 3;
    spec
}

#[tokio::test]
async fn test_first_tick_launches_and_records() {
    let mut h = Harness::new(vec![editor()]);
    h.supervisor.tick_at(h.at(0)).await;

    assert_eq!(h.launched().len(), 1);
    let (pid, record) = h.store.latest_for_spec("editor").unwrap().unwrap();
    assert_eq!(pid, h.last_pid());
    assert_eq!(record.status, ProcessStatus::Launching);
    assert_eq!(h.view("editor").status, ProcessStatus::Launching);
}

#[tokio::test]
async fn test_gate_escalates_once_then_suppresses() {
    let mut h = Harness::new(vec![editor()]);
    h.supervisor.tick_at(h.at(0)).await;

    for k in 1..=3 {
        h.crash(h.last_pid());
        h.supervisor.tick_at(h.at(20 * k)).await;
        assert_eq!(h.supervisor.relaunch_attempts("Editor"), k as u32);
    }
    assert_eq!(h.launched().len(), 4);
    assert_eq!(h.prompt.state.lock().shown, 0);

    h.crash(h.last_pid());
    h.supervisor.tick_at(h.at(80)).await;
    assert_eq!(h.prompt.state.lock().shown, 1);
    assert_eq!(h.launched().len(), 4);
    assert_eq!(h.supervisor.relaunch_attempts("Editor"), 0);
    assert_eq!(h.supervisor.stats().escalations, 1);

    h.supervisor.tick_at(h.at(100)).await;
    assert_eq!(h.prompt.state.lock().shown, 1);
    assert_eq!(h.launched().len(), 4);

    h.prompt.state.lock().active = false;
    h.supervisor.tick_at(h.at(120)).await;
    assert_eq!(h.launched().len(), 5);
    assert_eq!(h.supervisor.relaunch_attempts("Editor"), 1);
}

#[tokio::test]
async fn test_young_process_never_stalled() {
    let mut h = Harness::new(vec![editor()]);
    h.supervisor.tick_at(h.at(0)).await;
    let pid = h.last_pid();
    h.store.record_probe(pid, false, h.at(1)).unwrap();

    h.supervisor.tick_at(h.at(5)).await;
    assert_eq!(h.view("editor").status, ProcessStatus::Launching);
    assert!(h.control.os.lock().terminated.is_empty());
    assert!(h.control.os.lock().probes.is_empty());

    h.supervisor.tick_at(h.at(15)).await;
    assert_eq!(h.control.os.lock().terminated, vec![pid]);
    assert_eq!(h.launched().len(), 2);

    let old = h.store.get(pid).unwrap().unwrap();
    assert_eq!(old.status, ProcessStatus::Stalled);
    assert_eq!(old.superseded_by, Some(h.last_pid()));
    assert_eq!(h.supervisor.stats().stalls, 1);
}

#[tokio::test]
async fn test_responsive_process_gets_probed() {
    let mut h = Harness::new(vec![editor()]);
    h.supervisor.tick_at(h.at(0)).await;
    let pid = h.last_pid();

    h.supervisor.tick_at(h.at(15)).await;
    assert_eq!(h.control.os.lock().probes, vec![pid]);
    assert_eq!(h.view("editor").status, ProcessStatus::Running);
    assert_eq!(h.store.get(pid).unwrap().unwrap().status, ProcessStatus::Running);
}

#[tokio::test]
async fn test_surviving_pid_adopted() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::at(dir.path().join("process_state.json")).unwrap();
    let earlier = Utc::now() - ChronoDuration::hours(1);
    store
        .record_launch(4242, "editor", "Editor", ProcessStatus::Running, earlier)
        .unwrap();

    let mut h = Harness::with_store(dir, store, vec![editor()]);
    h.control.os.lock().alive.insert(4242);

    h.supervisor.tick_at(h.at(0)).await;
    assert!(h.launched().is_empty());
    let view = h.view("editor");
    assert_eq!(view.pid, Some(4242));
    assert_eq!(view.status, ProcessStatus::Running);
    assert_eq!(h.supervisor.stats().adopted, 1);

    h.supervisor.tick_at(h.at(10)).await;
    assert!(h.launched().is_empty());
    assert_eq!(h.control.os.lock().probes, vec![4242]);
}

#[tokio::test]
async fn test_dead_stored_pid_not_adopted() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::at(dir.path().join("process_state.json")).unwrap();
    store
        .record_launch(4343, "editor", "Editor", ProcessStatus::Running, Utc::now())
        .unwrap();

    let mut h = Harness::with_store(dir, store, vec![editor()]);
    h.supervisor.tick_at(h.at(0)).await;
    assert_eq!(h.launched().len(), 1);
    assert_eq!(h.supervisor.stats().adopted, 0);
}

#[tokio::test]
async fn test_time_delay_queues_first_launch() {
    let mut spec = editor();
    spec.time_delay = 30;
    let mut h = Harness::new(vec![spec]);

    h.supervisor.tick_at(h.at(0)).await;
    assert!(h.launched().is_empty());
    assert_eq!(h.view("editor").status, ProcessStatus::Queued);

    h.supervisor.tick_at(h.at(31)).await;
    assert_eq!(h.launched().len(), 1);
}

#[tokio::test]
async fn test_autolaunch_off_is_inactive() {
    let mut spec = editor();
    spec.autolaunch = false;
    let mut h = Harness::new(vec![spec]);

    h.supervisor.tick_at(h.at(0)).await;
    assert!(h.launched().is_empty());
    assert_eq!(h.view("editor").status, ProcessStatus::Inactive);
}

#[tokio::test]
async fn test_launch_failure_not_retried_same_tick() {
    let mut h = Harness::new(vec![editor()]);
    h.control.os.lock().fail_launch = true;

    h.supervisor.tick_at(h.at(0)).await;
    assert_eq!(h.control.os.lock().launch_attempts, 1);
    assert_eq!(h.supervisor.stats().launch_failures, 1);

    h.supervisor.tick_at(h.at(5)).await;
    assert_eq!(h.control.os.lock().launch_attempts, 1);

    h.supervisor.tick_at(h.at(20)).await;
    assert_eq!(h.control.os.lock().launch_attempts, 2);
    assert_eq!(h.supervisor.relaunch_attempts("Editor"), 1);
}

#[tokio::test]
async fn test_kill_suppresses_autolaunch_until_toggled() {
    let mut h = Harness::new(vec![editor()]);
    h.supervisor.tick_at(h.at(0)).await;
    let pid = h.last_pid();

    let reply = h
        .supervisor
        .handle_command_at(SupervisorCommand::Kill { process: "editor".into() }, h.at(1))
        .await
        .unwrap();
    assert!(reply.contains("Killed Editor"));
    assert_eq!(h.control.os.lock().terminated, vec![pid]);
    assert_eq!(h.store.get(pid).unwrap().unwrap().status, ProcessStatus::Killed);

    h.supervisor.tick_at(h.at(20)).await;
    assert_eq!(h.launched().len(), 1);
    assert_eq!(h.view("editor").status, ProcessStatus::Inactive);

    let reply = h
        .supervisor
        .handle_command_at(
            SupervisorCommand::ToggleAutolaunch {
                process: "Editor".into(),
                enabled: None,
            },
            h.at(21),
        )
        .await
        .unwrap();
    assert!(reply.contains("enabled"));

    h.supervisor.tick_at(h.at(40)).await;
    assert_eq!(h.launched().len(), 2);
}

#[tokio::test]
async fn test_restart_bypasses_gate() {
    let mut spec = editor();
    spec.max_relaunch_attempts = 1;
    let mut h = Harness::new(vec![spec]);
    h.supervisor.tick_at(h.at(0)).await;
    h.crash(h.last_pid());
    h.supervisor.tick_at(h.at(20)).await;
    assert_eq!(h.supervisor.relaunch_attempts("Editor"), 1);
    let pid = h.last_pid();

    let reply = h
        .supervisor
        .handle_command_at(SupervisorCommand::Restart { process: "editor".into() }, h.at(25))
        .await
        .unwrap();
    assert!(reply.starts_with("Restarted Editor"));
    assert_eq!(h.control.os.lock().terminated, vec![pid]);
    assert_eq!(h.launched().len(), 3);
    assert_eq!(h.supervisor.relaunch_attempts("Editor"), 0);
    assert_eq!(h.prompt.state.lock().shown, 0);
}

#[tokio::test]
async fn test_unknown_process_rejected() {
    let mut h = Harness::new(vec![editor()]);
    let reply = h
        .supervisor
        .handle_command_at(SupervisorCommand::Kill { process: "viewer".into() }, h.at(0))
        .await;
    assert_eq!(reply, Err("Unknown process: viewer".to_string()));
}

#[tokio::test]
async fn test_update_config_replaces_processes() {
    let mut h = Harness::new(vec![editor()]);
    h.supervisor.tick_at(h.at(0)).await;
    let editor_pid = h.last_pid();

    let viewer = ProcessSpec::new("viewer", "Viewer", "/opt/viewer/viewer");
    h.supervisor
        .handle_command_at(
            SupervisorCommand::UpdateConfig {
                processes: vec![viewer.clone()],
            },
            h.at(1),
        )
        .await
        .unwrap();

    let ids: Vec<String> = h.supervisor.processes().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["viewer".to_string()]);
    assert!(h.control.os.lock().alive.contains(&editor_pid));

    let duplicate = h
        .supervisor
        .handle_command_at(
            SupervisorCommand::UpdateConfig {
                processes: vec![viewer.clone(), viewer],
            },
            h.at(2),
        )
        .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_run_loop_answers_commands() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::at(dir.path().join("process_state.json")).unwrap();
    let control = FakeControl::default();
    let mut config = SupervisorConfig::default();
    config.tick_interval_secs = 3600;
    let supervisor = ProcessSupervisor::new(
        config,
        vec![editor()],
        store,
        Box::new(control.clone()),
        Box::new(FakePrompt::default()),
    );

    let (handle, commands) = command_channel(4);
    let (signal, token) = ShutdownSignal::new();
    let task = tokio::spawn(supervisor.run(commands, token));

    let reply = handle
        .send(SupervisorCommand::ToggleAutolaunch {
            process: "editor".into(),
            enabled: Some(false),
        })
        .await;
    assert_eq!(reply, Ok("Autolaunch for Editor disabled".to_string()));

    signal.cancel();
    task.await.unwrap();
    assert!(control.os.lock().launched.len() <= 1);
    assert!(handle
        .send(SupervisorCommand::Kill { process: "editor".into() })
        .await
        .is_err());
}
