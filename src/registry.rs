use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::probe::ProcessProbe;
use crate::store::{FileLock, StoreError, STATE_LOCK_FILE};

pub const SESSIONS_FILE: &str = "sessions.json";

type OwnerMap = BTreeMap<String, i64>;

/// Tracks which host-tool processes currently hold an interest in the shared
/// presence session, keyed by owner pid. Shares the state store's lock file
/// so state and registry mutations serialize against each other.
///
/// Zero owners is persisted by deleting the file: "no sessions" stays
/// detectable by file absence alone.
pub struct SessionRegistry {
    sessions_path: PathBuf,
    lock: FileLock,
}

impl SessionRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            sessions_path: data_dir.join(SESSIONS_FILE),
            lock: FileLock::new(data_dir.join(STATE_LOCK_FILE)),
        }
    }

    /// Registers an owner, refreshing its timestamp when already present.
    /// Returns the post-insert active count.
    pub fn add_session(&self, owner_pid: u32) -> Result<usize, StoreError> {
        let _guard = self.lock.acquire()?;
        let mut owners = self.read_owners();
        owners.insert(owner_pid.to_string(), Utc::now().timestamp());
        self.persist_owners(&owners)?;
        Ok(owners.len())
    }

    /// Unregisters an owner; removing an absent owner is a no-op. Returns
    /// the post-remove active count.
    pub fn remove_session(&self, owner_pid: u32) -> Result<usize, StoreError> {
        let _guard = self.lock.acquire()?;
        let mut owners = self.read_owners();
        owners.remove(&owner_pid.to_string());
        self.persist_owners(&owners)?;
        Ok(owners.len())
    }

    /// Drops every registration whose owner process is no longer running.
    /// A post-sweep count of zero is the one signal that licenses the
    /// daemon to clear state and exit.
    pub fn sweep_dead(&self, probe: &dyn ProcessProbe) -> Result<usize, StoreError> {
        let _guard = self.lock.acquire()?;
        let owners = self.read_owners();
        if owners.is_empty() {
            return Ok(0);
        }

        let mut alive = OwnerMap::new();
        for (entry, registered_at) in &owners {
            match entry.parse::<u32>() {
                Ok(pid) if probe.is_alive(pid) => {
                    alive.insert(entry.clone(), *registered_at);
                }
                Ok(pid) => {
                    info!(owner = pid, "owner process is gone, dropping registration");
                }
                Err(_) => {
                    warn!(entry = %entry, "dropping unparseable registry entry");
                }
            }
        }

        if alive.len() != owners.len() {
            self.persist_owners(&alive)?;
        }
        Ok(alive.len())
    }

    pub fn active_count(&self) -> usize {
        self.read_owners().len()
    }

    /// Current registrations as (owner pid, registration epoch) pairs.
    pub fn owners(&self) -> Vec<(u32, i64)> {
        self.read_owners()
            .iter()
            .filter_map(|(entry, ts)| entry.parse::<u32>().ok().map(|pid| (pid, *ts)))
            .collect()
    }

    fn read_owners(&self) -> OwnerMap {
        let Ok(raw) = fs::read_to_string(&self.sessions_path) else {
            return OwnerMap::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(
                path = %self.sessions_path.display(),
                error = %err,
                "session registry unreadable, treating as empty"
            );
            OwnerMap::new()
        })
    }

    fn persist_owners(&self, owners: &OwnerMap) -> Result<(), StoreError> {
        if owners.is_empty() {
            match fs::remove_file(&self.sessions_path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(StoreError::Io(err)),
            }
        } else {
            let dir = self
                .sessions_path
                .parent()
                .unwrap_or_else(|| Path::new("."));
            fs::create_dir_all(dir)?;
            let mut tmp = NamedTempFile::new_in(dir)?;
            serde_json::to_writer(&mut tmp, owners)?;
            tmp.flush()?;
            tmp.persist(&self.sessions_path)
                .map_err(|err| StoreError::Io(err.error))?;
            Ok(())
        }
    }
}
