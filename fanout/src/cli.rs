//! Command-line definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "fanout",
    version,
    about = "Run one shell command across a fleet of managed instances"
)]
pub struct Cli {
    /// Config file path (default: platform config dir).
    #[arg(long, global = true, env = "FANOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter override (e.g. "debug" or "fanout_engine=trace").
    #[arg(long, global = true, env = "FANOUT_LOG")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a command against every target in a target file.
    Run(RunArgs),
    /// Show recent batch results.
    History(HistoryArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Shell command to execute on every target.
    #[arg(short = 'c', long)]
    pub command: String,

    /// TOML file listing the targets ([[targets]] tables).
    #[arg(short = 't', long)]
    pub targets: PathBuf,

    /// Concurrent target executions.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Additional attempts after the first, per target.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Base wait before a retry; grows linearly with the attempt number.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub base_delay: Option<Duration>,

    /// Cap on the wait before a retry.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub max_delay: Option<Duration>,

    /// Wall-clock budget for a single attempt.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Overall wall-clock budget for the whole batch; firing cancels the
    /// in-flight remainder.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub batch_timeout: Option<Duration>,

    /// Retry the failed subset without prompting.
    #[arg(long)]
    pub retry_failed: bool,

    /// Never prompt (non-interactive use).
    #[arg(long)]
    pub no_prompt: bool,

    /// Write per-target export records to this path.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export format.
    #[arg(long, value_enum, default_value_t = ExportFormat::Jsonl)]
    pub format: ExportFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Jsonl,
    Tsv,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Number of entries to show, most recent first.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Only entries for this target id.
    #[arg(long)]
    pub target: Option<String>,
}
