use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tether_types::{TetherError, TetherResult};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cancellation::{CancellationToken, ShutdownSignal};

trait WorkerFactory: Send + Sync {
    fn create(&self, cancel: CancellationToken) -> JoinHandle<TetherResult<()>>;
}

struct WorkerFactoryImpl<F, Fut>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TetherResult<()>> + Send + 'static,
{
    factory: F,
}

impl<F, Fut> WorkerFactory for WorkerFactoryImpl<F, Fut>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TetherResult<()>> + Send + 'static,
{
    fn create(&self, cancel: CancellationToken) -> JoinHandle<TetherResult<()>> {
        tokio::spawn((self.factory)(cancel))
    }
}

struct Worker {
    factory: Box<dyn WorkerFactory>,
    handle: Option<JoinHandle<TetherResult<()>>>,
    cancel: ShutdownSignal,
    starts: u32,
    last_exit: Option<String>,
}

impl Worker {
    fn is_alive(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub alive: bool,
    pub starts: u32,
    pub last_exit: Option<String>,
}

/// Named long-running tasks that live only while the link is up.
/// Factories are stored and invoked on demand; registering never spawns.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, name: &str, factory: F) -> TetherResult<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TetherResult<()>> + Send + 'static,
    {
        let mut workers = self.workers.write();
        if workers.contains_key(name) {
            return Err(TetherError::Internal(format!(
                "Worker '{}' already registered",
                name
            )));
        }

        let (cancel, _) = ShutdownSignal::new();
        workers.insert(
            name.to_string(),
            Worker {
                factory: Box::new(WorkerFactoryImpl { factory }),
                handle: None,
                cancel,
                starts: 0,
                last_exit: None,
            },
        );
        debug!("Registered worker: {}", name);
        Ok(())
    }

    /// Cancels the worker if it is running and forgets its factory.
    pub fn unregister(&self, name: &str) -> bool {
        match self.workers.write().remove(name) {
            Some(worker) => {
                worker.cancel.cancel();
                if let Some(handle) = worker.handle {
                    handle.abort();
                }
                info!("Unregistered worker: {}", name);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.read().contains_key(name)
    }

    pub fn is_alive(&self, name: &str) -> bool {
        self.workers
            .read()
            .get(name)
            .map(Worker::is_alive)
            .unwrap_or(false)
    }

    /// Starts every registered worker that has no live handle. The check and
    /// the spawn happen under one write lock so a name never runs twice.
    pub fn start_missing(&self) -> Vec<String> {
        let mut started = Vec::new();
        let mut workers = self.workers.write();
        for (name, worker) in workers.iter_mut() {
            if worker.is_alive() {
                continue;
            }
            let (cancel, token) = ShutdownSignal::new();
            worker.cancel = cancel;
            worker.handle = Some(worker.factory.create(token));
            worker.starts += 1;
            started.push(name.clone());
        }
        if !started.is_empty() {
            info!("Started workers: {}", started.join(", "));
        }
        started
    }

    /// Takes the handles of workers that have exited and returns why.
    pub fn reap_dead(&self) -> Vec<(String, String)> {
        let mut dead = Vec::new();
        let mut workers = self.workers.write();
        for (name, worker) in workers.iter_mut() {
            let finished = worker
                .handle
                .as_ref()
                .map(|h| h.is_finished())
                .unwrap_or(false);
            if !finished {
                continue;
            }
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            let reason = match handle.now_or_never() {
                Some(Ok(Ok(()))) => "exited".to_string(),
                Some(Ok(Err(e))) => e.to_string(),
                Some(Err(join)) if join.is_panic() => "panicked".to_string(),
                Some(Err(_)) => "cancelled".to_string(),
                None => "exited".to_string(),
            };
            worker.last_exit = Some(reason.clone());
            dead.push((name.clone(), reason));
        }
        dead
    }

    pub fn statuses(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<WorkerStatus> = self
            .workers
            .read()
            .iter()
            .map(|(name, w)| WorkerStatus {
                name: name.clone(),
                alive: w.is_alive(),
                starts: w.starts,
                last_exit: w.last_exit.clone(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Signals every worker and waits up to `timeout` overall for them to
    /// finish. Stragglers are aborted.
    pub async fn stop_all(&self, timeout: Duration) {
        let handles: Vec<(String, JoinHandle<TetherResult<()>>)> = {
            let mut workers = self.workers.write();
            workers
                .iter_mut()
                .filter_map(|(name, w)| {
                    w.cancel.cancel();
                    w.handle.take().map(|h| (name.clone(), h))
                })
                .collect()
        };

        let deadline = tokio::time::Instant::now() + timeout;
        for (name, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => debug!("Worker {} stopped", name),
                Err(_) => {
                    warn!("Worker {} did not stop in time, aborting", name);
                    handle.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_register_does_not_spawn() {
        let registry = WorkerRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        registry
            .register("heartbeat", move |mut cancel| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    cancel.cancelled().await;
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!registry.is_alive("heartbeat"));
        assert!(registry.register("heartbeat", |_| async { Ok(()) }).is_err());
    }

    #[tokio::test]
    async fn test_start_missing_keeps_single_instance() {
        let registry = WorkerRegistry::new();
        registry
            .register("listener", |mut cancel| async move {
                cancel.cancelled().await;
                Ok(())
            })
            .unwrap();

        assert_eq!(registry.start_missing(), vec!["listener".to_string()]);
        assert!(registry.start_missing().is_empty());
        assert!(registry.is_alive("listener"));

        registry.stop_all(Duration::from_secs(1)).await;
        assert!(!registry.is_alive("listener"));
    }

    #[tokio::test]
    async fn test_reap_reports_exit_reason() {
        let registry = WorkerRegistry::new();
        registry
            .register("metrics", |_| async {
                Err(TetherError::Network("upload failed".into()))
            })
            .unwrap();
        registry.start_missing();

        let mut dead = Vec::new();
        for _ in 0..50 {
            dead = registry.reap_dead();
            if !dead.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dead.len(), 1);
        assert!(dead[0].1.contains("upload failed"));

        let statuses = registry.statuses();
        assert_eq!(statuses[0].starts, 1);
        assert!(!statuses[0].alive);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = WorkerRegistry::new();
        registry.register("heartbeat", |_| async { Ok(()) }).unwrap();
        assert!(registry.unregister("heartbeat"));
        assert!(!registry.unregister("heartbeat"));
        assert!(registry.start_missing().is_empty());
    }
}
