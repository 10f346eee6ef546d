//! Clap derive structures for the `shadowgraph` daemon.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "shadowgraph",
    version,
    about = "Keep derived SDN configuration current by reacting to store changes",
    long_about = "Maintains an in-memory shadow of the configuration store, follows its\n\
        change feed, and recomputes every object a change affects according\n\
        to the configured reaction rules.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "SHADOWGRAPH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format for reports
    #[arg(long, short = 'o', default_value = "json", global = true)]
    pub output: OutputFormat,

    /// Log line format
    #[arg(long, env = "SHADOWGRAPH_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resync from the store, then follow the change feed until interrupted
    Run(RunArgs),

    /// Dry run against a JSON snapshot instead of a live store
    Check(CheckArgs),

    /// Print the compiled reaction map
    #[command(alias = "rx")]
    Reactions,

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Config store URL (overrides [store].url)
    #[arg(long)]
    pub store_url: Option<String>,

    /// Change feed URL (overrides [feed].url)
    #[arg(long)]
    pub feed_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Store snapshot: a JSON object keyed by resource type
    #[arg(long, value_name = "FILE")]
    pub seed: PathBuf,

    /// Change events to replay after the resync: a JSON array of feed messages
    #[arg(long, value_name = "FILE")]
    pub events: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }
}
