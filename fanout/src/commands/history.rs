//! `fanout history` - list recent batch results.

use crate::cli::HistoryArgs;
use crate::history::HistoryStore;
use anyhow::Result;
use colored::Colorize;
use fanout_common::config::FanoutConfig;
use fanout_common::util::excerpt;
use fanout_engine::Outcome;

pub fn run(config: &FanoutConfig, args: &HistoryArgs) -> Result<()> {
    let store = HistoryStore::open_default(config.general.history_limit)?;
    let entries = store.recent(args.limit, args.target.as_deref())?;

    if entries.is_empty() {
        println!("no batch history yet");
        return Ok(());
    }

    for entry in entries {
        let status = match entry.outcome {
            Outcome::Success => "SUCCESS".green(),
            Outcome::Failure => "FAILED".red(),
            Outcome::Timeout => "TIMEOUT".red(),
        };
        println!(
            "{} {} {} ({}) - {} attempt(s), {}",
            entry.timestamp.dimmed(),
            status,
            entry.target_label,
            entry.target_id,
            entry.attempt_count,
            entry.command.cyan()
        );
        if let Some(error) = &entry.error {
            println!("   err: {}", excerpt(error, 100).red());
        }
    }
    Ok(())
}
