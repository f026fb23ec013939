use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::config::{Paths, PresenceConfig, RuntimeSettings};
use crate::display;
use crate::presence::{DiscordChannel, PresenceChannel, PresenceUpdate};
use crate::probe::{ProcessProbe, SystemProbe};
use crate::registry::SessionRegistry;
use crate::store::StateStore;

/// Holds the single-instance lock and the pid record for the daemon's
/// lifetime. Dropping it removes the record on every exit path; removal is
/// guarded by pid ownership so running it against a successor is harmless.
pub struct DaemonGuard {
    lock_file: File,
    pid_path: PathBuf,
    pid: u32,
}

impl DaemonGuard {
    /// `None` means another daemon already holds the instance lock; the
    /// caller should exit quietly rather than fight over the channel.
    pub fn acquire(paths: &Paths) -> Result<Option<Self>> {
        fs::create_dir_all(paths.data_dir()).with_context(|| {
            format!(
                "failed to create data directory {}",
                paths.data_dir().display()
            )
        })?;
        let lock_path = paths.daemon_lock_path();
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("failed to open daemon lock {}", lock_path.display()))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Ok(None);
        }

        let pid = std::process::id();
        let pid_path = paths.daemon_pid_path();
        fs::write(&pid_path, pid.to_string())
            .with_context(|| format!("failed to write pid record {}", pid_path.display()))?;
        Ok(Some(Self {
            lock_file,
            pid_path,
            pid,
        }))
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let recorded = fs::read_to_string(&self.pid_path)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok());
        if recorded == Some(self.pid) {
            let _ = fs::remove_file(&self.pid_path);
        }
        let _ = FileExt::unlock(&self.lock_file);
    }
}

/// Pid of the running daemon, reconciling the record against actual
/// process liveness so a stale file after a crash reads as "not running".
pub fn running_daemon_pid(paths: &Paths, probe: &dyn ProcessProbe) -> Option<u32> {
    let raw = fs::read_to_string(paths.daemon_pid_path()).ok()?;
    let pid = raw.trim().parse::<u32>().ok()?;
    probe.is_alive(pid).then_some(pid)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connected,
    Terminating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Sleep(Duration),
    Terminate,
}

/// One iteration of the daemon's control loop, advanced by an injected
/// epoch second so tests never sleep against a real clock.
pub(crate) struct DaemonLoop<'a> {
    store: &'a StateStore,
    registry: &'a SessionRegistry,
    channel: &'a mut dyn PresenceChannel,
    probe: &'a dyn ProcessProbe,
    config: &'a PresenceConfig,
    runtime: &'a RuntimeSettings,
    phase: Phase,
    last_sent: Option<PresenceUpdate>,
    next_sweep_at: i64,
}

impl<'a> DaemonLoop<'a> {
    pub(crate) fn new(
        store: &'a StateStore,
        registry: &'a SessionRegistry,
        channel: &'a mut dyn PresenceChannel,
        probe: &'a dyn ProcessProbe,
        config: &'a PresenceConfig,
        runtime: &'a RuntimeSettings,
    ) -> Self {
        Self {
            store,
            registry,
            channel,
            probe,
            config,
            runtime,
            phase: Phase::Disconnected,
            last_sent: None,
            // first step sweeps immediately
            next_sweep_at: i64::MIN,
        }
    }

    pub(crate) fn step(&mut self, now: i64) -> Step {
        if now >= self.next_sweep_at {
            self.next_sweep_at = now.saturating_add(self.runtime.sweep_interval.as_secs() as i64);
            match self.registry.sweep_dead(self.probe) {
                Ok(0) => {
                    self.phase = Phase::Terminating;
                    return Step::Terminate;
                }
                Ok(active) => debug!(active, "session sweep"),
                Err(err) => warn!(error = %err, "session sweep skipped"),
            }
        }

        if self.phase == Phase::Disconnected {
            match self.channel.connect() {
                Ok(()) => {
                    info!("connected to presence channel");
                    self.phase = Phase::Connected;
                    self.last_sent = None;
                }
                Err(err) => {
                    debug!(error = %err, "presence channel connect failed, backing off");
                    return Step::Sleep(self.runtime.reconnect_backoff);
                }
            }
        }

        let state = self.store.read_state();
        if state.is_empty() {
            return Step::Sleep(self.runtime.poll_interval);
        }

        match display::derive_payload(&state, now, &self.config.display, &self.config.idle) {
            Some(update) => {
                // the channel is rate limited; only push genuine changes
                if self.last_sent.as_ref() != Some(&update) {
                    match self.channel.update(&update) {
                        Ok(()) => {
                            debug!(details = %update.details, state_line = %update.state_line, "presence updated");
                            self.last_sent = Some(update);
                        }
                        Err(err) => {
                            warn!(error = %err, "presence update failed, reconnecting");
                            self.phase = Phase::Disconnected;
                            self.last_sent = None;
                        }
                    }
                }
            }
            None => {
                if self.last_sent.take().is_some() {
                    if let Err(err) = self.channel.clear() {
                        warn!(error = %err, "presence clear failed, reconnecting");
                        self.phase = Phase::Disconnected;
                    }
                }
            }
        }

        Step::Sleep(self.runtime.poll_interval)
    }
}

pub fn run(paths: &Paths, config: &PresenceConfig, runtime: &RuntimeSettings) -> Result<u8> {
    let Some(_guard) = DaemonGuard::acquire(paths)? else {
        info!("another daemon instance is already running, exiting");
        return Ok(0);
    };

    let stop = install_stop_flag()?;
    let store = StateStore::new(paths.data_dir());
    let registry = SessionRegistry::new(paths.data_dir());
    let probe = SystemProbe::new();
    let mut channel = DiscordChannel::new(config.effective_client_id());
    info!(pid = std::process::id(), "presence daemon starting");

    let drained = {
        let mut control = DaemonLoop::new(&store, &registry, &mut channel, &probe, config, runtime);
        loop {
            if stop.load(Ordering::Relaxed) {
                info!("received termination signal");
                break false;
            }
            match control.step(Utc::now().timestamp()) {
                Step::Terminate => break true,
                Step::Sleep(duration) => thread::sleep(duration),
            }
        }
    };

    if drained {
        info!("no registered sessions remain, daemon exiting");
        if let Err(err) = store.clear_state() {
            warn!(error = %err, "could not clear state on exit");
        }
    }

    let _ = channel.clear();
    let _ = channel.close();
    info!("presence daemon stopped");
    Ok(0)
}

fn install_stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install termination handler")?;
    Ok(stop)
}
