//! Token, cost, and project attributes sourced from the Claude Code
//! activity logs (`~/.claude/projects/**/*.jsonl`). Each line is treated as
//! opaque JSON; only assistant messages carrying usage counters matter, and
//! malformed lines are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::SystemTime;

use serde::Deserialize;
use walkdir::WalkDir;

use crate::config::PricingConfig;
use crate::cost;
use crate::state::TokenUsage;

/// Aggregated figures for one session log: the last model seen plus the
/// summed token counters priced into `cost`/`simple_cost`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionTotals {
    pub model_id: String,
    pub tokens: TokenUsage,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LogLine {
    #[serde(rename = "type")]
    kind: String,
    message: LogMessage,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LogMessage {
    model: String,
    usage: LogUsage,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LogUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_read_input_tokens: u64,
    cache_creation_input_tokens: u64,
}

pub fn collect_session_totals(
    projects_dir: &Path,
    session_id: &str,
    pricing: &PricingConfig,
) -> SessionTotals {
    let Some(log_path) = find_session_log(projects_dir, session_id) else {
        return SessionTotals::default();
    };
    scan_session_log(&log_path, pricing)
}

fn scan_session_log(log_path: &Path, pricing: &PricingConfig) -> SessionTotals {
    let Ok(file) = File::open(log_path) else {
        return SessionTotals::default();
    };

    let mut totals = LogUsage::default();
    let mut model_id = String::new();
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else {
            break;
        };
        let Ok(parsed) = serde_json::from_str::<LogLine>(&line) else {
            continue;
        };
        if parsed.kind != "assistant" {
            continue;
        }
        if !parsed.message.model.is_empty() {
            model_id = parsed.message.model;
        }
        let usage = parsed.message.usage;
        totals.input_tokens += usage.input_tokens;
        totals.output_tokens += usage.output_tokens;
        totals.cache_read_input_tokens += usage.cache_read_input_tokens;
        totals.cache_creation_input_tokens += usage.cache_creation_input_tokens;
    }

    let priced = cost::compute_usage_cost(
        &model_id,
        totals.input_tokens,
        totals.output_tokens,
        totals.cache_read_input_tokens,
        totals.cache_creation_input_tokens,
        pricing,
    );

    SessionTotals {
        model_id,
        tokens: TokenUsage {
            input: totals.input_tokens,
            output: totals.output_tokens,
            cache_read: totals.cache_read_input_tokens,
            cache_write: totals.cache_creation_input_tokens,
            cost: priced.cost,
            simple_cost: priced.simple_cost,
        },
    }
}

/// The log named after the session id when one exists, otherwise the most
/// recently modified log (a freshly started session may not have written
/// its own file yet).
fn find_session_log(projects_dir: &Path, session_id: &str) -> Option<PathBuf> {
    if !session_id.is_empty() {
        let wanted = format!("{session_id}.jsonl");
        for entry in WalkDir::new(projects_dir).into_iter().flatten() {
            if entry.file_type().is_file() && entry.file_name().to_string_lossy() == wanted.as_str()
            {
                return Some(entry.into_path());
            }
        }
    }
    most_recent_log(projects_dir)
}

fn most_recent_log(projects_dir: &Path) -> Option<PathBuf> {
    let mut best: Option<(PathBuf, SystemTime)> = None;
    for entry in WalkDir::new(projects_dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().is_none_or(|ext| ext != "jsonl") {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = meta.modified() else {
            continue;
        };
        if best.as_ref().is_none_or(|(_, at)| modified > *at) {
            best = Some((entry.into_path(), modified));
        }
    }
    best.map(|(path, _)| path)
}

/// Project label shown on the presence card: the git remote's repository
/// name when one is configured, the folder name otherwise.
pub fn project_name(project_path: &str) -> String {
    let dir = if project_path.is_empty() {
        std::env::current_dir().unwrap_or_default()
    } else {
        PathBuf::from(project_path)
    };
    let folder_name = dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    if let Some(remote) = git_output(&dir, &["remote", "get-url", "origin"])
        && let Some(name) = repo_name_from_remote(&remote)
    {
        return name;
    }
    folder_name
}

pub fn git_branch(project_path: &str) -> String {
    if project_path.is_empty() {
        return String::new();
    }
    git_output(Path::new(project_path), &["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_default()
}

/// Repository name from a remote URL, covering both
/// `https://host/user/repo.git` and `git@host:user/repo.git` forms.
fn repo_name_from_remote(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let without_suffix = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let name = without_suffix
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}
