//! Pure derivation of the presence payload from a state record and a wall
//! clock instant. Everything here is deterministic in `(state, now)` so the
//! daemon's dedup-by-equality works and tests can pin the clock.

use crate::config::{DisplayConfig, IdleConfig, IdlePolicy};
use crate::presence::PresenceUpdate;
use crate::state::SessionState;
use crate::util::{format_cost, format_tokens};

const CYCLE_PERIOD_SECS: i64 = 8;
const CYCLE_SIMPLE_SECS: i64 = 5;

/// Short verb for the most recent tool, kept well under the presence
/// service's length limits.
pub fn tool_verb(tool: &str) -> &'static str {
    match tool {
        "Edit" | "NotebookEdit" => "Editing",
        "Write" => "Writing",
        "Read" | "NotebookRead" => "Reading",
        "Glob" => "Searching",
        "Grep" => "Grepping",
        "LS" => "Browsing",
        "Bash" => "Running",
        "Task" => "Delegating",
        "WebFetch" => "Fetching",
        "WebSearch" => "Researching",
        "AskUserQuestion" => "Asking",
        "TodoRead" => "Reviewing",
        "TodoWrite" => "Planning",
        _ if tool.starts_with("mcp__") => "Using MCP",
        _ => "Working",
    }
}

pub fn is_idle(state: &SessionState, now: i64, idle: &IdleConfig) -> bool {
    now.saturating_sub(state.last_update) > idle.timeout_secs as i64
}

/// The two-line payload for the given instant, or `None` when the idle
/// policy says the remote presence should be cleared instead.
pub fn derive_payload(
    state: &SessionState,
    now: i64,
    display: &DisplayConfig,
    idle: &IdleConfig,
) -> Option<PresenceUpdate> {
    let idle_now = is_idle(state, now, idle);
    if idle_now && idle.policy == IdlePolicy::Clear {
        return None;
    }

    let verb = if idle_now {
        "Idling"
    } else {
        tool_verb(&state.tool)
    };
    let project = if state.project.is_empty() {
        "Claude Code"
    } else {
        state.project.as_str()
    };
    let details = if state.git_branch.is_empty() {
        format!("{verb} on {project}")
    } else {
        format!("{verb} on {project} ({})", state.git_branch)
    };

    Some(PresenceUpdate {
        details,
        state_line: state_line(state, now),
        start_epoch: if state.session_start > 0 {
            state.session_start
        } else {
            now
        },
        image_key: display.large_image_key.clone(),
        tooltip: display.large_text.clone(),
    })
}

/// Alternates on wall-clock modulo 8: five seconds of simple input+output
/// figures, then three seconds of cache-inclusive ones.
fn state_line(state: &SessionState, now: i64) -> String {
    let tokens = &state.tokens;
    let (count, label, cost) = if now.rem_euclid(CYCLE_PERIOD_SECS) < CYCLE_SIMPLE_SECS {
        (tokens.simple_total(), "tokens", tokens.simple_cost)
    } else {
        (tokens.cached_total(), "cached", tokens.cost)
    };

    let figures = format!("{} {label} • {}", format_tokens(count), format_cost(cost));
    if state.model.is_empty() {
        figures
    } else {
        format!("{} • {figures}", state.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TokenUsage;

    fn sample_state() -> SessionState {
        SessionState {
            session_id: "abc".to_string(),
            project: "my-repo".to_string(),
            git_branch: "main".to_string(),
            model: "Opus 4.5".to_string(),
            session_start: 1_000,
            last_update: 10_000,
            tool: "Edit".to_string(),
            tokens: TokenUsage {
                input: 10_000,
                output: 2_000,
                cache_read: 88_000,
                cache_write: 0,
                cost: 1.50,
                simple_cost: 0.75,
            },
            ..SessionState::default()
        }
    }

    #[test]
    fn details_carry_verb_project_and_branch() {
        let state = sample_state();
        let payload = derive_payload(&state, 10_008, &DisplayConfig::default(), &IdleConfig::default())
            .expect("payload");
        assert_eq!(payload.details, "Editing on my-repo (main)");
        assert_eq!(payload.start_epoch, 1_000);
    }

    #[test]
    fn branchless_project_drops_the_parenthetical() {
        let mut state = sample_state();
        state.git_branch.clear();
        state.tool = "Bash".to_string();
        let payload = derive_payload(&state, 10_008, &DisplayConfig::default(), &IdleConfig::default())
            .expect("payload");
        assert_eq!(payload.details, "Running on my-repo");
    }

    #[test]
    fn cycle_shows_simple_then_cached_figures() {
        let state = sample_state();
        // 10_000 % 8 == 0: simple window
        let simple = derive_payload(&state, 10_000, &DisplayConfig::default(), &IdleConfig::default())
            .expect("payload");
        assert_eq!(simple.state_line, "Opus 4.5 • 12.0k tokens • $0.75");
        // 10_005 % 8 == 5: cache-inclusive window
        let cached = derive_payload(&state, 10_005, &DisplayConfig::default(), &IdleConfig::default())
            .expect("payload");
        assert_eq!(cached.state_line, "Opus 4.5 • 100.0k cached • $1.50");
    }

    #[test]
    fn same_instant_is_deterministic() {
        let state = sample_state();
        let first = derive_payload(&state, 10_003, &DisplayConfig::default(), &IdleConfig::default());
        let second = derive_payload(&state, 10_003, &DisplayConfig::default(), &IdleConfig::default());
        assert_eq!(first, second);
    }

    #[test]
    fn idle_state_substitutes_the_idling_verb() {
        let state = sample_state();
        let idle = IdleConfig::default();
        let fresh = derive_payload(&state, 10_008, &DisplayConfig::default(), &idle).expect("fresh");
        let stale_now = state.last_update + idle.timeout_secs as i64 + 8;
        let stale = derive_payload(&state, stale_now, &DisplayConfig::default(), &idle).expect("stale");
        assert!(stale.details.starts_with("Idling on"));
        assert_ne!(fresh.details, stale.details);
    }

    #[test]
    fn clear_policy_yields_no_payload_when_idle() {
        let state = sample_state();
        let idle = IdleConfig {
            policy: IdlePolicy::Clear,
            timeout_secs: 300,
        };
        let stale_now = state.last_update + 301;
        assert!(derive_payload(&state, stale_now, &DisplayConfig::default(), &idle).is_none());
        // still displayed while fresh
        assert!(derive_payload(&state, state.last_update + 1, &DisplayConfig::default(), &idle).is_some());
    }

    #[test]
    fn unknown_tools_and_mcp_get_generic_verbs() {
        assert_eq!(tool_verb("mcp__github__create_issue"), "Using MCP");
        assert_eq!(tool_verb("SomethingNew"), "Working");
        assert_eq!(tool_verb(""), "Working");
    }
}
