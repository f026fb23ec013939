use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "claude-discord-presence",
    version,
    about = "Show live Claude Code activity in Discord Rich Presence"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register this session and spawn the daemon if none is running
    /// (wire to the SessionStart hook).
    Start,
    /// Merge the latest tool and token figures into shared state
    /// (wire to the PostToolUse hook).
    Update,
    /// Unregister this session; the last one out stops the daemon
    /// (wire to the SessionEnd hook).
    Stop,
    /// Print a one-shot snapshot of the daemon, registry, and state.
    Status,
    /// Run the presence daemon loop (normally spawned by `start`).
    Daemon,
}
