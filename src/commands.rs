//! The `start`/`update`/`stop`/`status` entry points driven by Claude Code
//! hooks. Nothing in here is allowed to abort the host tool's hook
//! invocation: every failure path degrades to "no presence update this
//! time" plus a log line.

use std::env;
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::activity;
use crate::config::{self, Paths, PresenceConfig};
use crate::daemon;
use crate::probe::ProcessProbe;
use crate::registry::SessionRegistry;
use crate::store::StateStore;
use crate::util::{self, format_cost, format_tokens};

/// JSON payload Claude Code pipes into hook commands on stdin. Unknown
/// fields are ignored; a missing or malformed payload reads as empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookInput {
    pub session_id: String,
    pub cwd: String,
    pub tool_name: String,
}

pub fn read_hook_input() -> HookInput {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return HookInput::default();
    }
    let mut raw = String::new();
    if stdin.read_to_string(&mut raw).is_err() || raw.trim().is_empty() {
        return HookInput::default();
    }
    serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!(error = %err, "unparseable hook input, ignoring");
        HookInput::default()
    })
}

/// Process-lifecycle boundary for the background daemon, injectable so
/// tests never fork real processes.
pub trait DaemonControl {
    fn spawn(&self) -> Result<u32>;
    fn terminate(&self, pid: u32) -> Result<()>;
}

/// Spawns the daemon as a fully detached child of the current executable
/// and stops it with a termination signal.
pub struct DetachedDaemon;

impl DaemonControl for DetachedDaemon {
    fn spawn(&self) -> Result<u32> {
        let exe = env::current_exe().context("failed to resolve current executable path")?;
        let mut command = Command::new(exe);
        command
            .arg("daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(DETACHED_PROCESS | CREATE_NO_WINDOW);
        }

        let child = command.spawn().context("failed to spawn presence daemon")?;
        Ok(child.id())
    }

    #[cfg(not(windows))]
    fn terminate(&self, pid: u32) -> Result<()> {
        let status = Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("failed to execute kill")?;
        if !status.success() {
            bail!("kill -TERM {pid} exited with {status}");
        }
        Ok(())
    }

    #[cfg(windows)]
    fn terminate(&self, pid: u32) -> Result<()> {
        let script = format!(
            "$p = Get-Process -Id {pid} -ErrorAction SilentlyContinue; \
             if ($null -ne $p) {{ Stop-Process -Id {pid} -Force -ErrorAction Stop }}"
        );
        let status = Command::new("powershell")
            .arg("-NoProfile")
            .arg("-Command")
            .arg(script)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("failed to execute Stop-Process")?;
        if !status.success() {
            bail!("Stop-Process for pid {pid} exited with {status}");
        }
        Ok(())
    }
}

/// Everything a lifecycle command touches, bundled so tests can aim the
/// stores at a temporary directory and stub the process boundaries.
pub struct CommandEnv<'a> {
    pub paths: &'a Paths,
    pub config: &'a PresenceConfig,
    pub probe: &'a dyn ProcessProbe,
    pub daemon_control: &'a dyn DaemonControl,
    pub store: StateStore,
    pub registry: SessionRegistry,
    pub projects_dir: PathBuf,
}

impl<'a> CommandEnv<'a> {
    pub fn new(
        paths: &'a Paths,
        config: &'a PresenceConfig,
        probe: &'a dyn ProcessProbe,
        daemon_control: &'a dyn DaemonControl,
    ) -> Self {
        Self {
            store: StateStore::new(paths.data_dir()),
            registry: SessionRegistry::new(paths.data_dir()),
            projects_dir: config::claude_projects_dir(),
            paths,
            config,
            probe,
            daemon_control,
        }
    }
}

/// `start` hook: register the owner, seed or refresh shared state, and
/// make sure a daemon is running.
pub fn start(env: &CommandEnv, owner_pid: u32, input: &HookInput) {
    match env.registry.add_session(owner_pid) {
        Ok(active) => info!(owner = owner_pid, active, "session registered"),
        Err(err) => warn!(error = %err, "could not register session"),
    }

    let project_path = if input.cwd.is_empty() {
        env::var("CLAUDE_PROJECT_DIR").unwrap_or_default()
    } else {
        input.cwd.clone()
    };
    let totals =
        activity::collect_session_totals(&env.projects_dir, &input.session_id, &env.config.pricing);
    let now = Utc::now().timestamp();

    let seeded = env.store.update_state(|state| {
        if state.session_start == 0 {
            state.session_start = now;
        }
        state.session_id = input.session_id.clone();
        state.project = activity::project_name(&project_path);
        state.git_branch = activity::git_branch(&project_path);
        state.project_path = project_path.clone();
        state.model = util::display_model_name(&totals.model_id);
        state.last_update = now;
        state.tool = String::new();
        state.tokens = totals.tokens.clone();
    });
    if let Err(err) = seeded {
        warn!(error = %err, "could not seed session state");
    }

    if let Some(pid) = daemon::running_daemon_pid(env.paths, env.probe) {
        debug!(pid, "daemon already running");
        return;
    }
    match env.daemon_control.spawn() {
        Ok(pid) => info!(pid, "spawned presence daemon"),
        Err(err) => warn!(error = %err, "could not spawn presence daemon"),
    }
}

/// `update` hook: merge the latest tool and token figures into state.
/// A no-op when no session is active.
pub fn update(env: &CommandEnv, input: &HookInput) {
    let current = env.store.read_state();
    if current.is_empty() {
        debug!("no active session, ignoring update");
        return;
    }

    let totals = activity::collect_session_totals(
        &env.projects_dir,
        &current.session_id,
        &env.config.pricing,
    );
    let now = Utc::now().timestamp();

    let result = env.store.update_state(|state| {
        // raced with a concurrent clear: leave the record empty
        if state.session_start == 0 {
            return;
        }
        state.tool = input.tool_name.clone();
        state.last_update = now;
        state.tokens = totals.tokens.clone();
    });
    match result {
        Ok(_) => debug!(tool = %input.tool_name, "activity updated"),
        Err(err) => warn!(error = %err, "could not update session state"),
    }
}

/// `stop` hook: unregister the owner; the last one out clears state and
/// brings the daemon down.
pub fn stop(env: &CommandEnv, owner_pid: u32) {
    let remaining = match env.registry.remove_session(owner_pid) {
        Ok(remaining) => remaining,
        Err(err) => {
            warn!(error = %err, "could not unregister session");
            return;
        }
    };
    if remaining > 0 {
        info!(
            owner = owner_pid,
            active = remaining,
            "session unregistered, daemon stays up"
        );
        return;
    }

    info!("last session ended, stopping daemon");
    if let Err(err) = env.store.clear_state() {
        warn!(error = %err, "could not clear session state");
    }
    if let Some(pid) = daemon::running_daemon_pid(env.paths, env.probe) {
        match env.daemon_control.terminate(pid) {
            Ok(()) => info!(pid, "stopped presence daemon"),
            Err(err) => warn!(pid, error = %err, "could not stop presence daemon"),
        }
    }
    // whatever record the daemon left behind is stale now
    let _ = fs::remove_file(env.paths.daemon_pid_path());
}

/// `status`: one-shot diagnostic snapshot on stdout.
pub fn status(env: &CommandEnv) {
    match daemon::running_daemon_pid(env.paths, env.probe) {
        Some(pid) => println!("Daemon running (pid {pid})"),
        None => println!("Daemon not running"),
    }

    let owners = env.registry.owners();
    println!("Active sessions: {}", owners.len());
    for (pid, registered_at) in &owners {
        let liveness = if env.probe.is_alive(*pid) {
            "alive"
        } else {
            "dead"
        };
        println!("  - owner {pid}: {liveness} (registered at {registered_at})");
    }

    let state = env.store.read_state();
    if state.is_empty() {
        println!("No active session");
        return;
    }
    println!(
        "Project: {}",
        if state.project.is_empty() {
            "unknown"
        } else {
            &state.project
        }
    );
    if !state.git_branch.is_empty() {
        println!("Branch: {}", state.git_branch);
    }
    if !state.model.is_empty() {
        println!("Model: {}", state.model);
    }
    println!(
        "Last tool: {}",
        if state.tool.is_empty() {
            "none"
        } else {
            &state.tool
        }
    );

    let tokens = &state.tokens;
    if tokens.simple_total() > 0 || tokens.cache_read > 0 {
        println!(
            "Tokens (simple): {} ({} in / {} out)",
            format_tokens(tokens.simple_total()),
            format_tokens(tokens.input),
            format_tokens(tokens.output)
        );
        println!(
            "Tokens (cached): {} (+{} read / +{} write)",
            format_tokens(tokens.cached_total()),
            format_tokens(tokens.cache_read),
            format_tokens(tokens.cache_write)
        );
        println!(
            "Cost: {} ({} without cache)",
            format_cost(tokens.cost),
            format_cost(tokens.simple_cost)
        );
    }
    if state.last_update > 0 {
        let ago = Utc::now().timestamp().saturating_sub(state.last_update);
        println!("Last update: {ago}s ago");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::FakeProbe;
    use std::cell::RefCell;
    use tempfile::TempDir;

    const DAEMON_PID: u32 = 9_999;

    #[derive(Default)]
    struct FakeControl {
        spawned: RefCell<Vec<u32>>,
        terminated: RefCell<Vec<u32>>,
    }

    impl DaemonControl for FakeControl {
        fn spawn(&self) -> Result<u32> {
            self.spawned.borrow_mut().push(DAEMON_PID);
            Ok(DAEMON_PID)
        }

        fn terminate(&self, pid: u32) -> Result<()> {
            self.terminated.borrow_mut().push(pid);
            Ok(())
        }
    }

    struct Fixture {
        tmp: TempDir,
        paths: Paths,
        config: PresenceConfig,
        probe: FakeProbe,
        control: FakeControl,
    }

    impl Fixture {
        fn new(alive: &[u32]) -> Self {
            let tmp = TempDir::new().expect("temp dir");
            let paths = Paths::at(tmp.path().to_path_buf());
            Self {
                tmp,
                paths,
                config: PresenceConfig::default(),
                probe: FakeProbe::with_alive(alive),
                control: FakeControl::default(),
            }
        }

        fn env(&self) -> CommandEnv<'_> {
            let mut env = CommandEnv::new(&self.paths, &self.config, &self.probe, &self.control);
            env.projects_dir = self.tmp.path().join("projects");
            env
        }

        fn hook_input(&self, session_id: &str) -> HookInput {
            HookInput {
                session_id: session_id.to_string(),
                cwd: self.tmp.path().to_string_lossy().to_string(),
                tool_name: String::new(),
            }
        }

        fn fake_daemon_startup(&self) {
            fs::write(self.paths.daemon_pid_path(), DAEMON_PID.to_string()).unwrap();
        }
    }

    #[test]
    fn two_owner_lifecycle_scenario() {
        let fx = Fixture::new(&[100, 200, DAEMON_PID]);
        let env = fx.env();

        // owner A starts: registered, state seeded, daemon spawned
        start(&env, 100, &fx.hook_input("sess-a"));
        assert_eq!(env.registry.active_count(), 1);
        assert_eq!(fx.control.spawned.borrow().len(), 1);
        let after_a = env.store.read_state();
        assert!(!after_a.is_empty());
        fx.fake_daemon_startup();

        // owner B starts: second registration, no second daemon,
        // session_start stays with the first writer
        start(&env, 200, &fx.hook_input("sess-b"));
        assert_eq!(env.registry.active_count(), 2);
        assert_eq!(fx.control.spawned.borrow().len(), 1);
        let after_b = env.store.read_state();
        assert_eq!(after_b.session_start, after_a.session_start);
        assert_eq!(after_b.session_id, "sess-b");

        // owner A stops: daemon untouched, state intact
        stop(&env, 100);
        assert_eq!(env.registry.active_count(), 1);
        assert!(fx.control.terminated.borrow().is_empty());
        assert!(!env.store.read_state().is_empty());

        // owner B stops: state cleared, daemon terminated, record dropped
        stop(&env, 200);
        assert_eq!(env.registry.active_count(), 0);
        assert_eq!(fx.control.terminated.borrow().as_slice(), &[DAEMON_PID]);
        assert!(env.store.read_state().is_empty());
        assert!(!fx.paths.daemon_pid_path().exists());
    }

    #[test]
    fn start_skips_spawn_when_daemon_is_alive() {
        let fx = Fixture::new(&[100, DAEMON_PID]);
        let env = fx.env();
        fx.fake_daemon_startup();

        start(&env, 100, &fx.hook_input("sess-a"));
        assert!(fx.control.spawned.borrow().is_empty());
    }

    #[test]
    fn start_respawns_over_a_stale_pid_record() {
        let fx = Fixture::new(&[100]);
        let env = fx.env();
        // record exists but the process is gone
        fx.fake_daemon_startup();

        start(&env, 100, &fx.hook_input("sess-a"));
        assert_eq!(fx.control.spawned.borrow().len(), 1);
    }

    #[test]
    fn first_writer_keeps_session_start() {
        let fx = Fixture::new(&[100]);
        let env = fx.env();
        env.store
            .update_state(|state| state.session_start = 12_345)
            .expect("seed start");

        start(&env, 100, &fx.hook_input("sess-a"));
        assert_eq!(env.store.read_state().session_start, 12_345);
    }

    #[test]
    fn update_is_a_no_op_without_a_session() {
        let fx = Fixture::new(&[]);
        let env = fx.env();

        let input = HookInput {
            tool_name: "Bash".to_string(),
            ..HookInput::default()
        };
        update(&env, &input);
        assert!(env.store.read_state().is_empty());
    }

    #[test]
    fn update_merges_tool_and_refreshes_timestamp() {
        let fx = Fixture::new(&[100, DAEMON_PID]);
        let env = fx.env();
        start(&env, 100, &fx.hook_input("sess-a"));
        let seeded = env.store.read_state();
        assert!(seeded.tool.is_empty());

        let input = HookInput {
            tool_name: "Bash".to_string(),
            ..HookInput::default()
        };
        update(&env, &input);

        let updated = env.store.read_state();
        assert_eq!(updated.tool, "Bash");
        assert!(updated.last_update >= seeded.last_update);
        assert_eq!(updated.session_start, seeded.session_start);
        assert_eq!(updated.project, seeded.project);
    }

    #[test]
    fn stop_of_unknown_owner_leaves_nothing_running() {
        let fx = Fixture::new(&[]);
        let env = fx.env();

        // no registrations at all: the remove is a no-op that still takes
        // the zero path and leaves no daemon record behind
        stop(&env, 4_242);
        assert_eq!(env.registry.active_count(), 0);
        assert!(fx.control.terminated.borrow().is_empty());
    }
}
