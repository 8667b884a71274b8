//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tc_core::{Engine, PlatformTag};

/// Tab time tracker.
///
/// Turns browser focus and visibility events into durable, non-overlapping
/// intervals of active time per URL.
#[derive(Debug, Parser)]
#[command(name = "tabclock", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Feed JSON-lines tab events from stdin through an engine policy.
    Ingest {
        /// Browser engine that produced the events (chromium, gecko, webkit).
        #[arg(long)]
        engine: Engine,

        /// Record that the platform permission check succeeded.
        #[arg(long)]
        grant_permission: bool,
    },

    /// List stored intervals that fall inside a time range.
    Query {
        /// Range start (ISO 8601 or relative, e.g., "2 hours ago"). Defaults to 24 hours ago.
        #[arg(long)]
        start: Option<String>,

        /// Range end (ISO 8601 or relative). Defaults to now.
        #[arg(long)]
        end: Option<String>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete intervals older than the platform's retention window.
    Prune {
        /// Platform class whose window applies. Defaults to the configured platform.
        #[arg(long)]
        platform: Option<PlatformTag>,
    },

    /// Show the stored interval count and the active surface.
    Status,

    /// Close the active interval and ignore events until resumed.
    Pause,

    /// Resume tracking after a pause.
    Resume,
}
