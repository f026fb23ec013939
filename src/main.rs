use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use tracing::warn;

use claude_discord_presence::cli::{Cli, Commands};
use claude_discord_presence::commands::{self, CommandEnv, DetachedDaemon};
use claude_discord_presence::config::{self, Paths, PresenceConfig};
use claude_discord_presence::probe::{self, SystemProbe};
use claude_discord_presence::util::{setup_daemon_tracing, setup_tracing};
use claude_discord_presence::daemon;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("claude-discord-presence error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<u8> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            return Ok(code);
        }
    };

    let paths = Paths::resolve();

    if let Commands::Daemon = cli.command {
        let _log_guard = setup_daemon_tracing(paths.data_dir(), paths.log_file_name())?;
        let config = PresenceConfig::load_or_init(&paths)?;
        let runtime = config::runtime_settings();
        return daemon::run(&paths, &config, &runtime);
    }

    setup_tracing();
    // a broken config must never fail a hook invocation
    let config = PresenceConfig::load_or_init(&paths).unwrap_or_else(|err| {
        warn!(error = %err, "could not load config, using defaults");
        PresenceConfig::default()
    });
    let probe = SystemProbe::new();
    let control = DetachedDaemon;
    let env = CommandEnv::new(&paths, &config, &probe, &control);

    match cli.command {
        Commands::Start => {
            let owner = probe::resolve_owner_pid(&probe);
            commands::start(&env, owner, &commands::read_hook_input());
        }
        Commands::Update => commands::update(&env, &commands::read_hook_input()),
        Commands::Stop => {
            let owner = probe::resolve_owner_pid(&probe);
            commands::stop(&env, owner);
        }
        Commands::Status => commands::status(&env),
        Commands::Daemon => unreachable!("handled above"),
    }
    Ok(0)
}
