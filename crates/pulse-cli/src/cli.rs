use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pulse_core::ActivityKind;

#[derive(Parser)]
#[command(name = "pulse", about = "Drive and inspect the Pulse mining engine")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// redb database file; an in-memory store is used when omitted
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Human-readable logs with the pulse crates at debug
    #[arg(long, global = true)]
    pub pretty: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start mining, record activities, and print the resulting stats
    Simulate {
        /// User to simulate
        #[arg(long)]
        user: String,
        /// Activities as kind=count, e.g. comment=25 (repeatable)
        #[arg(long = "activity", value_parser = parse_activity)]
        activities: Vec<(ActivityKind, u32)>,
        /// Stop mining when done
        #[arg(long)]
        stop: bool,
    },
    /// Show a user's stats, health, remaining caps and achievements
    Status {
        #[arg(long)]
        user: String,
    },
    /// Auto-terminate sessions idle longer than the threshold
    Cleanup {
        /// Override the configured threshold
        #[arg(long)]
        threshold_hours: Option<u32>,
    },
    /// Zero a user's daily counters
    ResetDay {
        #[arg(long)]
        user: String,
    },
}

fn parse_activity(value: &str) -> Result<(ActivityKind, u32), String> {
    let (kind, count) = match value.split_once('=') {
        Some((kind, count)) => (kind, count),
        None => (value, "1"),
    };
    let kind: ActivityKind = kind.parse().map_err(|e| format!("{}", e))?;
    let count: u32 = count
        .trim()
        .parse()
        .map_err(|_| format!("invalid count '{}'", count))?;
    Ok((kind, count))
}
