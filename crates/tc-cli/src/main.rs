use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tc_cli::commands::{ingest, prune, query, status, tracking, util};
use tc_cli::{Cli, Commands, Config};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(tc_db::Database, Config)> {
    let config = load_config(config_path)?;
    let db = tc_db::Database::open(&config.database_path, config.platform)
        .context("failed to open database")?;
    Ok((db, config))
}

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so command output on stdout stays machine-readable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let mut stdout = io::stdout().lock();
    match &cli.command {
        Some(Commands::Ingest {
            engine,
            grant_permission,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            let summary = ingest::run(
                io::stdin().lock(),
                &mut stdout,
                &config,
                *engine,
                *grant_permission,
            )?;
            tracing::debug!(?summary, "ingest finished");
        }
        Some(Commands::Query { start, end, json }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            let now = Utc::now();
            let start = match start {
                Some(s) => util::parse_datetime(s, now)?,
                None => now - Duration::hours(24),
            };
            let end = match end {
                Some(s) => util::parse_datetime(s, now)?,
                None => now,
            };
            query::run(&mut stdout, &db, start, end, *json)?;
        }
        Some(Commands::Prune { platform }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            prune::run(&mut stdout, &db, platform.unwrap_or(config.platform))?;
        }
        Some(Commands::Pause) => {
            let config = load_config(cli.config.as_deref())?;
            tracking::run(&mut stdout, &config, false)?;
        }
        Some(Commands::Resume) => {
            let config = load_config(cli.config.as_deref())?;
            tracking::run(&mut stdout, &config, true)?;
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut stdout, &config, &db)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
