//! Command-line interface for roundtable
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Turn-taking orchestrator for multi-speaker voice conversations
#[derive(Parser, Debug)]
#[command(
    name = "roundtable",
    version,
    about = "Turn-taking orchestrator for multi-speaker voice conversations"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: orchestration decisions, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a conversation against scripted in-memory voice sessions
    Simulate(SimulateArgs),

    /// Manage configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List the built-in speaker roster
    Speakers,
}

/// Options for `roundtable simulate`.
#[derive(clap::Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Stop after this many transcript lines
    #[arg(long, short = 'n', value_name = "COUNT", default_value = "8")]
    pub turns: usize,

    /// Stop after this much wall time (default: 2m). Examples: 30s, 5m, 1h30m
    #[arg(long, short = 'd', value_name = "DURATION", default_value = "2m", value_parser = parse_duration)]
    pub duration: Duration,

    /// Overlapping speech (several speakers at once, shorter cooldowns)
    #[arg(long)]
    pub chaos: bool,

    /// Allow the same speaker to take consecutive turns
    #[arg(long)]
    pub self_reply: bool,

    /// Seed for speaker selection
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Conversation topic (overrides config)
    #[arg(long, value_name = "TOPIC")]
    pub topic: Option<String>,

    /// Simulated speaking time per turn (default: 300ms)
    #[arg(long, value_name = "DURATION", default_value = "300ms", value_parser = parse_duration)]
    pub speech: Duration,

    /// Print events as JSON lines instead of the transcript
    #[arg(long)]
    pub json: bool,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file, defaults, environment)
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the configuration file path
    Path,
}
