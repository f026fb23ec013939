use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_SCHEMA_VERSION: u32 = 2;
pub const DEFAULT_DISCORD_CLIENT_ID: &str = "1330919293709324449";

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 5 * 60;
const DEFAULT_POLL_SECONDS: u64 = 1;
const DEFAULT_SWEEP_SECONDS: u64 = 30;
const DEFAULT_RECONNECT_SECONDS: u64 = 5;

/// Fixed per-user file layout, injectable so tests can run against a
/// temporary directory instead of the real data location.
#[derive(Debug, Clone)]
pub struct Paths {
    data_dir: PathBuf,
}

impl Paths {
    /// Honors `CLAUDE_PRESENCE_HOME`, otherwise the per-user data dir
    /// (`~/.local/share/claude-discord-presence` on Linux).
    pub fn resolve() -> Self {
        if let Ok(custom) = env::var("CLAUDE_PRESENCE_HOME") {
            let trimmed = custom.trim();
            if !trimmed.is_empty() {
                return Self::at(PathBuf::from(trimmed));
            }
        }
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::at(base.join("claude-discord-presence"))
    }

    pub fn at(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn daemon_pid_path(&self) -> PathBuf {
        self.data_dir.join("daemon.pid")
    }

    pub fn daemon_lock_path(&self) -> PathBuf {
        self.data_dir.join("daemon.lock")
    }

    pub fn log_file_name(&self) -> &'static str {
        "daemon.log"
    }
}

/// Root of the Claude Code activity logs scanned for token usage.
pub fn claude_projects_dir() -> PathBuf {
    let claude_dir = match env::var("CLAUDE_CONFIG_DIR") {
        Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom.trim().to_string()),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude"),
    };
    claude_dir.join("projects")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub schema_version: u32,
    pub discord_client_id: Option<String>,
    pub display: DisplayConfig,
    pub idle: IdleConfig,
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub large_image_key: String,
    pub large_text: String,
}

/// What the daemon displays once a session has gone quiet: substitute an
/// "Idling" label (keeps the accumulated cost/token context visible) or
/// clear the remote presence entirely.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    #[default]
    Idling,
    Clear,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdleConfig {
    pub policy: IdlePolicy,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub overrides: BTreeMap<String, ModelPricingOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelPricingOverride {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_write_per_million: f64,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    pub reconnect_backoff: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            discord_client_id: Some(DEFAULT_DISCORD_CLIENT_ID.to_string()),
            display: DisplayConfig::default(),
            idle: IdleConfig::default(),
            pricing: PricingConfig::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            large_image_key: "claude".to_string(),
            large_text: "Claude Code".to_string(),
        }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            policy: IdlePolicy::default(),
            timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

impl PresenceConfig {
    pub fn load_or_init(paths: &Paths) -> Result<Self> {
        let cfg_path = paths.config_path();
        if let Some(parent) = cfg_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }

        if cfg_path.exists() {
            let raw = fs::read_to_string(&cfg_path)
                .with_context(|| format!("failed to read {}", cfg_path.display()))?;
            let mut parsed: PresenceConfig = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", cfg_path.display()))?;
            if parsed.normalize_and_migrate() {
                parsed.save(paths)?;
            }
            Ok(parsed)
        } else {
            let cfg = PresenceConfig::default();
            cfg.save(paths)?;
            Ok(cfg)
        }
    }

    pub fn save(&self, paths: &Paths) -> Result<()> {
        let path = paths.config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn effective_client_id(&self) -> String {
        if let Ok(from_env) = env::var("CLAUDE_PRESENCE_CLIENT_ID") {
            let trimmed = from_env.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        self.discord_client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_DISCORD_CLIENT_ID)
            .to_string()
    }

    fn normalize_and_migrate(&mut self) -> bool {
        let mut changed = false;

        if self.schema_version < CONFIG_SCHEMA_VERSION {
            self.schema_version = CONFIG_SCHEMA_VERSION;
            changed = true;
        }
        if self
            .discord_client_id
            .as_deref()
            .is_none_or(|id| id.trim().is_empty())
        {
            self.discord_client_id = Some(DEFAULT_DISCORD_CLIENT_ID.to_string());
            changed = true;
        }
        if self.display.large_image_key.trim().is_empty() {
            self.display.large_image_key = DisplayConfig::default().large_image_key;
            changed = true;
        }
        if self.display.large_text.trim().is_empty() {
            self.display.large_text = DisplayConfig::default().large_text;
            changed = true;
        }
        if self.idle.timeout_secs == 0 {
            self.idle.timeout_secs = DEFAULT_IDLE_TIMEOUT_SECS;
            changed = true;
        }

        changed
    }
}

pub fn runtime_settings() -> RuntimeSettings {
    RuntimeSettings {
        poll_interval: Duration::from_secs(env_u64(
            "CLAUDE_PRESENCE_POLL_SECONDS",
            DEFAULT_POLL_SECONDS,
        )),
        sweep_interval: Duration::from_secs(env_u64(
            "CLAUDE_PRESENCE_SWEEP_SECONDS",
            DEFAULT_SWEEP_SECONDS,
        )),
        reconnect_backoff: Duration::from_secs(env_u64(
            "CLAUDE_PRESENCE_RECONNECT_SECONDS",
            DEFAULT_RECONNECT_SECONDS,
        )),
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
