use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tether_types::{ConnectionState, TetherResult};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::backoff::{apply_jitter, BackoffState};
use super::cancellation::{CancellationToken, ShutdownSignal};
use super::circuit::CircuitBreaker;
use super::classify::{classify, ErrorClass};
use super::link::ControlPlaneLink;
use super::reachability::ReachabilityCheck;
use super::registry::WorkerRegistry;
use super::state::{ConnectionSnapshot, ListenerId, StateChange, StateHistory, StateListener};
use crate::config::ConnectionConfig;

const SNAPSHOT_HISTORY: usize = 16;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub fatal_backoff: Duration,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub watchdog_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            base_backoff: config.base_backoff(),
            max_backoff: config.max_backoff(),
            fatal_backoff: config.fatal_backoff(),
            failure_threshold: config.failure_threshold,
            recovery_timeout: config.recovery_timeout(),
            watchdog_interval: config.watchdog_interval(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

struct Inner {
    state: ConnectionState,
    backoff: BackoffState,
    circuit: CircuitBreaker,
    history: StateHistory,
    circuit_wait_logged: bool,
    ignored_error_logged: bool,
}

#[derive(Default)]
struct ReconnectFlags {
    active: bool,
    rerun: bool,
}

/// Clears the in-flight flag if a reconnect sequence exits without doing so
/// itself, e.g. while unwinding.
struct SequenceGuard<'a> {
    flags: &'a Mutex<ReconnectFlags>,
    armed: bool,
}

impl Drop for SequenceGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut flags = self.flags.lock();
            flags.active = false;
            flags.rerun = false;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectOutcome {
    Connected,
    Failed,
    Cancelled,
}

/// Owns the link to the control plane: its state machine, the reconnect
/// sequencer, the circuit breaker and the workers that only run while the
/// link is up.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    link: Arc<dyn ControlPlaneLink>,
    reachability: Arc<dyn ReachabilityCheck>,
    inner: Mutex<Inner>,
    dispatch: ReentrantMutex<()>,
    listeners: RwLock<Vec<(ListenerId, StateListener)>>,
    next_listener_id: AtomicU64,
    reconnect: Mutex<ReconnectFlags>,
    workers: WorkerRegistry,
    supervision_enabled: AtomicBool,
    shutdown: ShutdownSignal,
    wake: Notify,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    this: Weak<ConnectionManager>,
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        link: Arc<dyn ControlPlaneLink>,
        reachability: Arc<dyn ReachabilityCheck>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let (shutdown, _) = ShutdownSignal::new();
            Self {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    backoff: BackoffState::new(settings.base_backoff, settings.max_backoff),
                    circuit: CircuitBreaker::new(
                        settings.failure_threshold,
                        settings.recovery_timeout,
                    ),
                    history: StateHistory::default(),
                    circuit_wait_logged: false,
                    ignored_error_logged: false,
                }),
                settings,
                link,
                reachability,
                dispatch: ReentrantMutex::new(()),
                listeners: RwLock::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                reconnect: Mutex::new(ReconnectFlags::default()),
                workers: WorkerRegistry::new(),
                supervision_enabled: AtomicBool::new(false),
                shutdown,
                wake: Notify::new(),
                watchdog: Mutex::new(None),
                this: this.clone(),
            }
        })
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnect.lock().active
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    pub async fn connect(&self) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        self.transition(ConnectionState::Connecting, "initial connect".to_string());
        self.inner.lock().backoff.mark_attempt(Instant::now());

        match self.invoke_connect().await {
            Ok(()) => {
                self.on_connect_success("connected".to_string()).await;
                true
            }
            Err(e) => {
                self.on_connect_failure("connect", &e);
                self.trigger_reconnect();
                false
            }
        }
    }

    /// Entry point for every failure seen anywhere in the agent.
    pub fn report_error(&self, error: &str, context: &str) {
        if self.is_shutting_down() {
            return;
        }
        let now = Instant::now();
        let fatal = classify(error) == ErrorClass::Fatal;

        let was_connected = {
            let mut inner = self.inner.lock();
            if inner.circuit.is_blocking(now) {
                if inner.ignored_error_logged {
                    debug!("Circuit open, ignoring error from {}: {}", context, error);
                } else {
                    inner.ignored_error_logged = true;
                    info!("Circuit open, ignoring errors until recovery ({}: {})", context, error);
                }
                return;
            }
            if fatal {
                inner.backoff.force(self.settings.fatal_backoff, now);
            }
            inner.state.is_connected()
        };

        if fatal {
            warn!(
                "Remote rejected this machine ({}: {}), retrying in {}s",
                context,
                error,
                self.settings.fatal_backoff.as_secs()
            );
        } else {
            warn!("Error reported by {}: {}", context, error);
        }

        if was_connected {
            self.transition(
                ConnectionState::Disconnected,
                format!("{}: {}", context, error),
            );
        }
        self.trigger_reconnect();
    }

    pub fn report_success(&self) {
        let was_open = {
            let mut inner = self.inner.lock();
            let was_open = inner.circuit.is_open();
            inner.backoff.reset();
            inner.circuit.close();
            inner.circuit_wait_logged = false;
            inner.ignored_error_logged = false;
            was_open
        };
        if was_open {
            info!("Circuit breaker closed");
        }
        if self.transition(ConnectionState::Connected, "operation succeeded".to_string())
            && self.supervision_enabled.load(Ordering::SeqCst)
        {
            self.workers.start_missing();
        }
    }

    /// Retry now, skipping both the backoff wait and the circuit timeout.
    pub fn force_reconnect(&self, reason: &str) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        if self.is_connected() {
            debug!("Forced reconnect ignored, already connected ({})", reason);
            return false;
        }
        {
            let mut inner = self.inner.lock();
            inner.backoff.clear_wait();
            inner.circuit.force_probe();
        }
        info!("Forced reconnect: {}", reason);
        self.wake.notify_waiters();
        self.trigger_reconnect();
        true
    }

    pub fn register_thread<F, Fut>(&self, name: &str, factory: F) -> TetherResult<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TetherResult<()>> + Send + 'static,
    {
        self.workers.register(name, factory)?;
        if self.supervision_enabled.load(Ordering::SeqCst) && self.is_connected() {
            self.workers.start_missing();
        }
        Ok(())
    }

    pub fn unregister_thread(&self, name: &str) -> bool {
        self.workers.unregister(name)
    }

    pub fn enable_thread_supervision(&self) {
        if self.supervision_enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Worker supervision enabled");
        if self.is_connected() {
            self.workers.start_missing();
        }
    }

    pub fn start_watchdog(&self) {
        let mut slot = self.watchdog.lock();
        if slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let this = self.this.clone();
        let interval = self.settings.watchdog_interval;
        let mut shutdown = self.shutdown.token();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.cancelled() => break,
                }
                let Some(manager) = this.upgrade() else {
                    break;
                };
                manager.check_workers();
            }
            debug!("Watchdog stopped");
        }));
        info!("Watchdog started (interval {}s)", interval.as_secs());
    }

    /// Reaps exited workers and reports each one as an error.
    pub fn check_workers(&self) -> usize {
        if !self.supervision_enabled.load(Ordering::SeqCst) || self.is_shutting_down() {
            return 0;
        }
        let dead = self.workers.reap_dead();
        for (name, reason) in &dead {
            warn!("Worker {} died: {}", name, reason);
            self.report_error(&format!("worker {} died: {}", name, reason), "watchdog");
        }
        dead.len()
    }

    pub fn add_state_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Connection manager shutting down");
        self.shutdown.cancel();
        self.wake.notify_waiters();

        let timeout = self.settings.shutdown_timeout;
        let link = self.link.clone();
        let disconnect = run_isolated("disconnect", async move { link.disconnect().await });
        match tokio::time::timeout(timeout, disconnect).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Disconnect failed during shutdown: {}", e),
            Err(_) => warn!("Disconnect timed out during shutdown"),
        }

        self.workers.stop_all(timeout).await;

        let watchdog = self.watchdog.lock().take();
        if let Some(handle) = watchdog {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("Watchdog did not stop within {}s", timeout.as_secs());
            }
        }

        self.transition(ConnectionState::Disconnected, "shutdown".to_string());
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let now = Instant::now();
        let reconnecting = self.is_reconnecting();
        let workers = self.workers.statuses();
        let inner = self.inner.lock();
        ConnectionSnapshot {
            state: inner.state,
            consecutive_failures: inner.backoff.consecutive_failures(),
            current_backoff_secs: inner.backoff.current_backoff().as_secs(),
            circuit_open: inner.circuit.is_open(),
            circuit_remaining_secs: inner.circuit.remaining(now).as_secs(),
            supervision_enabled: self.supervision_enabled.load(Ordering::SeqCst),
            reconnecting,
            workers,
            recent: inner.history.recent(SNAPSHOT_HISTORY),
        }
    }

    fn trigger_reconnect(&self) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        {
            let mut flags = self.reconnect.lock();
            if flags.active {
                flags.rerun = true;
                debug!("Reconnect already in progress");
                return false;
            }
            flags.active = true;
        }

        let Some(this) = self.this.upgrade() else {
            self.reconnect.lock().active = false;
            return false;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { this.run_reconnect_sequence().await });
                true
            }
            Err(_) => {
                warn!("No async runtime available, reconnect not scheduled");
                self.reconnect.lock().active = false;
                false
            }
        }
    }

    async fn run_reconnect_sequence(self: Arc<Self>) {
        let mut guard = SequenceGuard {
            flags: &self.reconnect,
            armed: true,
        };
        loop {
            let finished = match self.attempt_reconnect().await {
                ReconnectOutcome::Connected | ReconnectOutcome::Cancelled => true,
                ReconnectOutcome::Failed => self.is_shutting_down(),
            };
            if !finished {
                continue;
            }

            let mut flags = self.reconnect.lock();
            if flags.rerun && !self.is_shutting_down() && !self.state().is_connected() {
                flags.rerun = false;
                continue;
            }
            flags.active = false;
            flags.rerun = false;
            guard.armed = false;
            break;
        }
    }

    /// One pass of the reconnect algorithm: circuit gate, backoff wait,
    /// reachability, then the connect callback.
    pub(crate) async fn attempt_reconnect(&self) -> ReconnectOutcome {
        loop {
            if self.is_shutting_down() {
                return ReconnectOutcome::Cancelled;
            }
            let now = Instant::now();
            let wait = {
                let mut inner = self.inner.lock();
                if inner.circuit.try_acquire(now) {
                    None
                } else {
                    let first = !inner.circuit_wait_logged;
                    inner.circuit_wait_logged = true;
                    Some((inner.circuit.remaining(now), first))
                }
            };
            let Some((remaining, first)) = wait else {
                break;
            };
            let remaining = if remaining.is_zero() {
                self.settings.recovery_timeout
            } else {
                remaining
            };
            if first {
                info!("Circuit breaker open, next attempt in {}s", remaining.as_secs());
            } else {
                debug!("Circuit breaker still open, waiting {}s", remaining.as_secs());
            }
            if !self.sleep_interruptibly(remaining).await {
                return ReconnectOutcome::Cancelled;
            }
        }

        let (wait, attempt) = {
            let inner = self.inner.lock();
            (
                inner.backoff.remaining_wait(Instant::now()),
                inner.backoff.consecutive_failures() + 1,
            )
        };
        let wait = apply_jitter(wait);
        if !wait.is_zero() {
            self.transition(
                ConnectionState::Backoff,
                format!(
                    "waiting {}s before reconnect attempt #{}",
                    wait.as_secs(),
                    attempt
                ),
            );
            if !self.sleep_interruptibly(wait).await {
                return ReconnectOutcome::Cancelled;
            }
        }

        if self.is_shutting_down() {
            return ReconnectOutcome::Cancelled;
        }
        if self.is_connected() {
            return ReconnectOutcome::Connected;
        }

        self.transition(
            ConnectionState::Reconnecting,
            format!("reconnect attempt #{}", attempt),
        );
        self.inner.lock().backoff.mark_attempt(Instant::now());

        let result = if self.check_reachable().await {
            self.invoke_connect().await
        } else {
            Err("network unreachable".to_string())
        };

        match result {
            Ok(()) => {
                self.on_connect_success(format!("reconnected on attempt #{}", attempt))
                    .await;
                ReconnectOutcome::Connected
            }
            Err(e) => {
                self.on_connect_failure("reconnect", &e);
                ReconnectOutcome::Failed
            }
        }
    }

    async fn invoke_connect(&self) -> Result<(), String> {
        let link = self.link.clone();
        run_isolated("connect", async move { link.connect().await }).await
    }

    async fn check_reachable(&self) -> bool {
        let reachability = self.reachability.clone();
        match tokio::spawn(async move { reachability.is_reachable().await }).await {
            Ok(reachable) => reachable,
            Err(e) => {
                error!("Reachability check failed: {}", e);
                false
            }
        }
    }

    async fn on_connect_success(&self, reason: String) {
        {
            let mut inner = self.inner.lock();
            inner.backoff.reset();
            inner.circuit.close();
            inner.circuit_wait_logged = false;
            inner.ignored_error_logged = false;
        }
        self.transition(ConnectionState::Connected, reason);

        let link = self.link.clone();
        if let Err(e) = run_isolated("on_connected", async move { link.on_connected().await }).await {
            warn!("Post-connect hook failed: {}", e);
        }
        if self.supervision_enabled.load(Ordering::SeqCst) && !self.is_shutting_down() {
            self.workers.start_missing();
        }
    }

    fn on_connect_failure(&self, kind: &str, error: &str) {
        let now = Instant::now();
        let (attempt, opened, backoff) = {
            let mut inner = self.inner.lock();
            inner.backoff.record_failure();
            let attempt = inner.backoff.consecutive_failures();
            let opened = inner.circuit.record_failure(attempt, now);
            if opened {
                inner.circuit_wait_logged = false;
                inner.ignored_error_logged = false;
            }
            (attempt, opened, inner.backoff.current_backoff())
        };

        if opened {
            warn!(
                "Circuit breaker opened after {} consecutive failures",
                attempt
            );
        }
        self.transition(
            ConnectionState::Disconnected,
            format!("{} attempt #{} failed: {}", kind, attempt, error),
        );
        debug!("Next backoff {}s", backoff.as_secs());
    }

    async fn sleep_interruptibly(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.token();
        if shutdown.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wake.notified() => !self.is_shutting_down(),
            _ = shutdown.cancelled() => false,
        }
    }

    /// Applies a state change and notifies listeners. The dispatch lock is
    /// held across both so listeners see changes in the order applied;
    /// it is re-entrant so a listener may report back into the manager.
    fn transition(&self, new: ConnectionState, reason: String) -> bool {
        let _order = self.dispatch.lock();
        let change = {
            let mut inner = self.inner.lock();
            if inner.state == new {
                return false;
            }
            let change = StateChange {
                old: inner.state,
                new,
                reason,
                timestamp: chrono::Utc::now(),
            };
            inner.state = new;
            inner.history.push(change.clone());
            change
        };

        info!(
            "Connection {} -> {}: {}",
            change.old, change.new, change.reason
        );

        let listeners: Vec<StateListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&change))).is_err() {
                error!(
                    "State listener panicked on {} -> {}",
                    change.old, change.new
                );
            }
        }
        true
    }
}

/// Runs a link callback on its own task so a panic inside it becomes an
/// error instead of unwinding through the manager.
async fn run_isolated<F>(name: &str, callback: F) -> Result<(), String>
where
    F: Future<Output = TetherResult<()>> + Send + 'static,
{
    match tokio::spawn(callback).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err(format!("{} callback panicked", name)),
        Err(e) => Err(format!("{} callback aborted: {}", name, e)),
    }
}
