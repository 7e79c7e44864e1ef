use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tether_types::{TetherError, TetherResult};
use tracing::trace;

/// Exclusive advisory lock on the store's lock file; released on drop.
pub(super) struct StoreLock {
    file: File,
}

impl StoreLock {
    pub(super) fn acquire(path: &Path, attempts: u32, base_delay: Duration) -> TetherResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TetherError::Storage(format!("Failed to open lock file {:?}: {}", path, e)))?;

        let mut delay = base_delay;
        for attempt in 1..=attempts.max(1) {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(e) if is_contended(&e) => {
                    trace!("State store locked, retry {} in {:?}", attempt, delay);
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    return Err(TetherError::Storage(format!("Failed to lock {:?}: {}", path, e)));
                }
            }
        }

        Err(TetherError::StoreLocked { attempts })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
