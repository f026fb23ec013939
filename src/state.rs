use serde::{Deserialize, Serialize};

/// Token and cost totals for the session driving the presence display.
///
/// `cost` prices cache reads/writes at their discounted/premium rates;
/// `simple_cost` prices input+output only, ignoring the cache entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub cost: f64,
    pub simple_cost: f64,
}

impl TokenUsage {
    pub fn simple_total(&self) -> u64 {
        self.input.saturating_add(self.output)
    }

    pub fn cached_total(&self) -> u64 {
        self.simple_total()
            .saturating_add(self.cache_read)
            .saturating_add(self.cache_write)
    }
}

/// The single shared record mutated by hook invocations and polled by the
/// daemon. Persisted as one JSON object; absent or unparseable files read
/// back as the default record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub session_id: String,
    pub project: String,
    pub project_path: String,
    pub git_branch: String,
    pub model: String,
    /// Epoch seconds; set once by the first `start`, never overwritten
    /// while non-zero.
    pub session_start: i64,
    /// Epoch seconds of the last client-originated mutation.
    pub last_update: i64,
    /// Name of the most recent tool reported by a hook.
    pub tool: String,
    pub tokens: TokenUsage,
}

impl SessionState {
    /// A record that never saw a `start` is treated as "no active session".
    pub fn is_empty(&self) -> bool {
        self.session_start == 0
    }
}
