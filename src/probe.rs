use std::cell::RefCell;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use sysinfo::{Pid, System};
use tracing::warn;

const SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(1);
const MAX_ANCESTOR_DEPTH: usize = 64;

/// Read-only view of the process table. Probing must never disturb the
/// probed process; a failed lookup reads as "not alive".
pub trait ProcessProbe {
    fn is_alive(&self, pid: u32) -> bool;
    fn parent_of(&self, pid: u32) -> Option<u32>;
    fn name_of(&self, pid: u32) -> Option<String>;
}

/// `ProcessProbe` over a sysinfo snapshot, refreshed when older than a
/// second so a registry sweep reuses one process-table scan.
pub struct SystemProbe {
    snapshot: RefCell<(System, Instant)>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            snapshot: RefCell::new((System::new_all(), Instant::now())),
        }
    }

    fn with_system<T>(&self, read: impl FnOnce(&System) -> T) -> T {
        let mut guard = self.snapshot.borrow_mut();
        if guard.1.elapsed() > SNAPSHOT_MAX_AGE {
            guard.0 = System::new_all();
            guard.1 = Instant::now();
        }
        read(&guard.0)
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.with_system(|sys| sys.process(Pid::from_u32(pid)).is_some())
    }

    fn parent_of(&self, pid: u32) -> Option<u32> {
        self.with_system(|sys| {
            sys.process(Pid::from_u32(pid))
                .and_then(|process| process.parent())
                .map(|parent| parent.as_u32())
        })
    }

    fn name_of(&self, pid: u32) -> Option<String> {
        self.with_system(|sys| {
            sys.process(Pid::from_u32(pid))
                .map(|process| process.name().to_string_lossy().to_string())
        })
    }
}

/// Walks the ancestor chain of `start_pid` looking for the long-lived
/// Claude Code process. The immediate parent of a hook invocation is
/// typically a short-lived wrapper, so the walk climbs until a matching
/// executable name appears, giving up at the process-tree root, at a pid
/// cycle, or after a bounded number of hops.
pub fn find_host_ancestor(probe: &dyn ProcessProbe, start_pid: u32) -> Option<u32> {
    let mut current = start_pid;
    let mut visited = HashSet::new();
    for _ in 0..MAX_ANCESTOR_DEPTH {
        if current <= 1 || !visited.insert(current) {
            return None;
        }
        if let Some(name) = probe.name_of(current)
            && is_host_process(&name)
        {
            return Some(current);
        }
        current = probe.parent_of(current)?;
    }
    None
}

/// Owner pid for registry bookkeeping: the Claude Code ancestor when one is
/// found, otherwise the direct parent. Registration proceeds either way.
pub fn resolve_owner_pid(probe: &dyn ProcessProbe) -> u32 {
    let own_pid = std::process::id();
    if let Some(pid) = find_host_ancestor(probe, own_pid) {
        return pid;
    }
    let fallback = probe.parent_of(own_pid).unwrap_or(own_pid);
    warn!(
        owner = fallback,
        "no Claude Code ancestor found, falling back to the parent pid"
    );
    fallback
}

fn is_host_process(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    // this binary's own name contains "claude"; never match ourselves
    if lower.contains("discord-presence") {
        return false;
    }
    lower.contains("claude") || lower.contains("node")
}


#[cfg(test)]
mod tests {
    use super::fake::FakeProbe;
    use super::*;

    #[test]
    fn walk_finds_claude_ancestor() {
        let mut probe = FakeProbe::default();
        probe.process(500, 400, "presence-hook");
        probe.process(400, 300, "bash");
        probe.process(300, 1, "claude");

        assert_eq!(find_host_ancestor(&probe, 500), Some(300));
    }

    #[test]
    fn walk_matches_node_hosts() {
        let mut probe = FakeProbe::default();
        probe.process(500, 300, "sh");
        probe.process(300, 1, "node");

        assert_eq!(find_host_ancestor(&probe, 500), Some(300));
    }

    #[test]
    fn walk_skips_own_binary_name() {
        let mut probe = FakeProbe::default();
        probe.process(500, 300, "claude-discord-presence");
        probe.process(300, 1, "claude");

        assert_eq!(find_host_ancestor(&probe, 500), Some(300));
    }

    #[test]
    fn walk_stops_at_root_without_match() {
        let mut probe = FakeProbe::default();
        probe.process(500, 400, "sh");
        probe.process(400, 1, "systemd");

        assert_eq!(find_host_ancestor(&probe, 500), None);
    }

    #[test]
    fn walk_breaks_on_pid_cycle() {
        let mut probe = FakeProbe::default();
        probe.process(500, 400, "sh");
        probe.process(400, 500, "sh");

        assert_eq!(find_host_ancestor(&probe, 500), None);
    }

    #[test]
    fn walk_breaks_on_self_parenting() {
        let mut probe = FakeProbe::default();
        probe.process(500, 500, "sh");

        assert_eq!(find_host_ancestor(&probe, 500), None);
    }

    #[test]
    fn walk_gives_up_when_parent_is_unknown() {
        let mut probe = FakeProbe::default();
        probe.process(500, 400, "sh");

        assert_eq!(find_host_ancestor(&probe, 500), None);
    }
}
