use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Stderr logging for the short-lived hook commands.
pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).without_time().try_init();
}

/// File logging for the detached daemon: its stdio is null, so diagnostics
/// go to an append-only log in the data directory. Keep the returned guard
/// alive for the daemon's lifetime or buffered lines are lost.
pub fn setup_daemon_tracing(data_dir: &Path, file_name: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create log directory {}", data_dir.display()))?;
    let appender = tracing_appender::rolling::never(data_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(guard)
}

pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}k", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}

pub fn format_cost(cost_usd: f64) -> String {
    if !cost_usd.is_finite() || cost_usd <= 0.0 {
        return "$0.00".to_string();
    }
    format!("${cost_usd:.2}")
}

/// Short display name for a Claude model id; empty when the id is not
/// recognizable as one.
pub fn display_model_name(model_id: &str) -> String {
    let exact = match model_id {
        "claude-opus-4-5-20251101" => Some("Opus 4.5"),
        "claude-sonnet-4-5-20250514" | "claude-sonnet-4-5-20241022" => Some("Sonnet 4.5"),
        "claude-haiku-4-5-20250414" | "claude-haiku-4-5-20241022" => Some("Haiku 4.5"),
        "claude-opus-4-20250514" => Some("Opus 4"),
        "claude-sonnet-4-20250514" => Some("Sonnet 4"),
        _ => None,
    };
    if let Some(name) = exact {
        return name.to_string();
    }

    let lower = model_id.to_ascii_lowercase();
    if lower.contains("opus") {
        "Opus".to_string()
    } else if lower.contains("sonnet") {
        "Sonnet".to_string()
    } else if lower.contains("haiku") {
        "Haiku".to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_formatting() {
        assert_eq!(format_tokens(999), "999");
        assert_eq!(format_tokens(12_500), "12.5k");
        assert_eq!(format_tokens(1_200_000), "1.2M");
    }

    #[test]
    fn cost_formatting() {
        assert_eq!(format_cost(0.0), "$0.00");
        assert_eq!(format_cost(-1.0), "$0.00");
        assert_eq!(format_cost(f64::NAN), "$0.00");
        assert_eq!(format_cost(12.3456), "$12.35");
    }

    #[test]
    fn model_display_names() {
        assert_eq!(display_model_name("claude-opus-4-5-20251101"), "Opus 4.5");
        assert_eq!(display_model_name("claude-sonnet-4-20250514"), "Sonnet 4");
        assert_eq!(display_model_name("claude-opus-9-20290101"), "Opus");
        assert_eq!(display_model_name("claude-haiku-9"), "Haiku");
        assert_eq!(display_model_name("gpt-4"), "");
        assert_eq!(display_model_name(""), "");
    }
}
