//! Cross-process process-state store.
//!
//! A single JSON file shared by the supervisor, the responsiveness probe and
//! any status reader. Every access holds an exclusive advisory lock on a
//! sibling `.lock` file; writes land in a temporary file that is renamed over
//! the target so readers never see a partial document.

mod config;
mod lock;
mod types;

pub use config::*;
pub use types::*;

use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tether_types::{ProcessStatus, TetherError, TetherResult};
use tracing::{debug, info, warn};

use lock::StoreLock;

#[derive(Debug, Clone)]
pub struct StateStore {
    config: StorageConfig,
}

impl StateStore {
    pub fn open(config: StorageConfig) -> TetherResult<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                TetherError::Storage(format!("Failed to create state dir {:?}: {}", parent, e))
            })?;
        }

        let store = Self { config };
        if !store.config.path.exists() {
            store.update(|_| ())?;
            info!("Initialized process state file at {:?}", store.config.path);
        }
        Ok(store)
    }

    pub fn at(path: impl AsRef<Path>) -> TetherResult<Self> {
        Self::open(StorageConfig::new(path.as_ref()))
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Runs `f` against this store on the blocking pool. Lock retries sleep
    /// the calling thread, so async callers go through here.
    pub async fn blocking<R, F>(&self, f: F) -> TetherResult<R>
    where
        F: FnOnce(&StateStore) -> TetherResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| TetherError::Internal(format!("State store task failed: {}", e)))?
    }

    pub fn load(&self) -> TetherResult<StateFile> {
        let _lock = self.lock()?;
        self.read_unlocked()
    }

    pub fn get(&self, pid: u32) -> TetherResult<Option<ProcessRuntimeRecord>> {
        Ok(self.load()?.get(pid).cloned())
    }

    /// Read-modify-write under the store lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut StateFile) -> R) -> TetherResult<R> {
        let _lock = self.lock()?;
        let mut state = self.read_unlocked()?;
        let result = f(&mut state);
        self.write_unlocked(&state)?;
        Ok(result)
    }

    /// Create the record for a freshly launched PID and mark every older
    /// record of the same spec as superseded by it.
    pub fn record_launch(
        &self,
        pid: u32,
        spec_id: &str,
        name: &str,
        status: ProcessStatus,
        now: DateTime<Utc>,
    ) -> TetherResult<ProcessRuntimeRecord> {
        let key = pid.to_string();
        self.update(|state| {
            for (other_pid, record) in state.records.iter_mut() {
                if record.spec_id == spec_id && record.is_current() && *other_pid != key {
                    record.superseded_by = Some(pid);
                    record.updated_at = now;
                }
            }
            let record = ProcessRuntimeRecord::new(spec_id, name, status, now);
            state.records.insert(key, record.clone());
            record
        })
    }

    /// Returns false when no record exists for the PID.
    pub fn set_status(&self, pid: u32, status: ProcessStatus) -> TetherResult<bool> {
        let now = Utc::now();
        self.update(|state| match state.get_mut(pid) {
            Some(record) => {
                if record.status != status {
                    debug!("pid {} ({}): {} -> {}", pid, record.name, record.status, status);
                }
                record.status = status;
                record.updated_at = now;
                true
            }
            None => false,
        })
    }

    /// Store a probe verdict. `hung_since` is set on the transition to
    /// unresponsive and cleared on the transition back.
    pub fn record_probe(
        &self,
        pid: u32,
        responsive: bool,
        now: DateTime<Utc>,
    ) -> TetherResult<Option<ProbeTransition>> {
        self.update(|state| {
            let record = state.get_mut(pid)?;
            let was_responsive = record.responsive;
            record.responsive = responsive;
            record.last_probe = Some(now);
            record.updated_at = now;

            match (was_responsive, responsive) {
                (true, false) => {
                    record.hung_since = Some(now);
                    Some(ProbeTransition::BecameUnresponsive)
                }
                (false, true) => {
                    record.hung_since = None;
                    Some(ProbeTransition::BecameResponsive)
                }
                (false, false) => {
                    record.hung_since.get_or_insert(now);
                    None
                }
                (true, true) => None,
            }
        })
    }

    pub fn latest_for_spec(&self, spec_id: &str) -> TetherResult<Option<(u32, ProcessRuntimeRecord)>> {
        let state = self.load()?;
        Ok(state
            .latest_for_spec(spec_id)
            .map(|(pid, record)| (pid, record.clone())))
    }

    /// Drop superseded records whose last update is older than `max_age`.
    pub fn compact(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> TetherResult<usize> {
        let removed = self.update(|state| {
            let before = state.records.len();
            state
                .records
                .retain(|_, r| r.is_current() || now.signed_duration_since(r.updated_at) < max_age);
            before - state.records.len()
        })?;
        if removed > 0 {
            debug!("Compacted {} superseded process records", removed);
        }
        Ok(removed)
    }

    fn lock(&self) -> TetherResult<StoreLock> {
        StoreLock::acquire(
            &self.config.lock_path(),
            self.config.lock_attempts,
            self.config.lock_retry_base,
        )
    }

    fn read_unlocked(&self) -> TetherResult<StateFile> {
        let contents = match std::fs::read_to_string(&self.config.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateFile::default()),
            Err(e) => {
                return Err(TetherError::Storage(format!(
                    "Failed to read {:?}: {}",
                    self.config.path, e
                )))
            }
        };

        if contents.trim().is_empty() {
            return Ok(StateFile::default());
        }

        let state: StateFile = match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(e) => {
                let backup = self.config.path.with_extension("corrupt");
                warn!(
                    "Process state file is unreadable ({}), moving it to {:?} and starting fresh",
                    e, backup
                );
                let _ = std::fs::rename(&self.config.path, &backup);
                return Ok(StateFile::default());
            }
        };

        if state.version > CURRENT_SCHEMA_VERSION {
            return Err(TetherError::Storage(format!(
                "State file schema version {} is newer than supported {}",
                state.version, CURRENT_SCHEMA_VERSION
            )));
        }

        Ok(state)
    }

    fn write_unlocked(&self, state: &StateFile) -> TetherResult<()> {
        let tmp_path = self.config.temp_path();
        let bytes = serde_json::to_vec_pretty(state)?;

        let mut file = File::create(&tmp_path)
            .map_err(|e| TetherError::Storage(format!("Failed to create {:?}: {}", tmp_path, e)))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| TetherError::Storage(format!("Failed to write {:?}: {}", tmp_path, e)))?;
        drop(file);

        std::fs::rename(&tmp_path, &self.config.path).map_err(|e| {
            TetherError::Storage(format!(
                "Failed to replace {:?}: {}",
                self.config.path, e
            ))
        })
    }
}

#[cfg(test)]
mod tests;
