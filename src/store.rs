use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

use crate::state::SessionState;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const LOCK_DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const STATE_FILE: &str = "state.json";
pub const STATE_LOCK_FILE: &str = "state.lock";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not acquire state lock within {timeout:?}")]
    LockTimeout { timeout: Duration },
    #[error("state io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization failure: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cross-process exclusive lock with bounded blocking acquisition.
///
/// Backed by an advisory lock on a dedicated lock file so the data file
/// itself can be atomically replaced while the lock is held.
pub struct FileLock {
    path: PathBuf,
    timeout: Duration,
}

pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileLock {
    pub fn new(path: PathBuf) -> Self {
        Self::with_timeout(path, LOCK_DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    pub fn acquire(&self) -> Result<LockGuard, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&self.path)?;
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(LockGuard { file }),
                Err(_) => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::LockTimeout {
                            timeout: self.timeout,
                        });
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
            }
        }
    }
}

/// Process-shared session state with mutual exclusion and atomic persistence.
///
/// Constructed against an explicit data directory so tests can point it at a
/// temporary location.
pub struct StateStore {
    dir: PathBuf,
    state_path: PathBuf,
    lock: FileLock,
}

impl StateStore {
    pub fn new(data_dir: &Path) -> Self {
        Self::with_lock_timeout(data_dir, LOCK_DEFAULT_TIMEOUT)
    }

    pub fn with_lock_timeout(data_dir: &Path, timeout: Duration) -> Self {
        Self {
            dir: data_dir.to_path_buf(),
            state_path: data_dir.join(STATE_FILE),
            lock: FileLock::with_timeout(data_dir.join(STATE_LOCK_FILE), timeout),
        }
    }

    /// Reads outside the lock: the writer's rename guarantees a complete
    /// record either way, and a hook must never crash on a corrupt file.
    pub fn read_state(&self) -> SessionState {
        read_record(&self.state_path)
    }

    pub fn write_state(&self, state: &SessionState) -> Result<(), StoreError> {
        let _guard = self.lock.acquire()?;
        persist_record(&self.dir, &self.state_path, state)
    }

    /// Read-modify-write under one critical section. The only primitive
    /// clients should use for partial mutation; holding the lock across
    /// both halves is what prevents lost updates between racing hooks.
    pub fn update_state(
        &self,
        apply: impl FnOnce(&mut SessionState),
    ) -> Result<SessionState, StoreError> {
        let _guard = self.lock.acquire()?;
        let mut state = read_record(&self.state_path);
        apply(&mut state);
        persist_record(&self.dir, &self.state_path, &state)?;
        Ok(state)
    }

    pub fn clear_state(&self) -> Result<(), StoreError> {
        self.write_state(&SessionState::default())
    }
}

fn read_record(path: &Path) -> SessionState {
    let Ok(raw) = fs::read_to_string(path) else {
        return SessionState::default();
    };
    serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!(path = %path.display(), error = %err, "state file unreadable, treating as empty");
        SessionState::default()
    })
}

fn persist_record(dir: &Path, path: &Path, state: &SessionState) -> Result<(), StoreError> {
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, state)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|err| StoreError::Io(err.error))?;
    Ok(())
}
