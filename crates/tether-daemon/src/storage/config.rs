use std::path::PathBuf;
use std::time::Duration;

const LOCK_RETRY_ATTEMPTS: u32 = 8;
const LOCK_RETRY_BASE_MS: u64 = 10;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub lock_attempts: u32,
    pub lock_retry_base: Duration,
}

impl StorageConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "lock")
    }

    pub fn temp_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "tmp")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(crate::config::DEFAULT_STATE_FILE),
            lock_attempts: LOCK_RETRY_ATTEMPTS,
            lock_retry_base: Duration::from_millis(LOCK_RETRY_BASE_MS),
        }
    }
}

fn sibling_with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
