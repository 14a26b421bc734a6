//! `fanout run` - execute a command across the fleet.
//!
//! Flow: load targets, run the batch, render the summary, offer the
//! failed-subset retry, merge, export, record history. The retry pass
//! reuses the same command and policy; escalating the policy between
//! manual retries is the operator's call, not ours.

use crate::cli::{ExportFormat, RunArgs};
use crate::history::HistoryStore;
use crate::output;
use crate::targets::load_targets;
use anyhow::{Context, Result};
use colored::Colorize;
use fanout_common::aws_cli::AwsCliChannel;
use fanout_common::config::FanoutConfig;
use fanout_common::types::{CommandSpec, RetryPolicy};
use fanout_common::util::mask_sensitive_command;
use fanout_engine::{
    BatchOptions, BatchResult, BatchRunner, report, select_failed, summarize,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(config: &FanoutConfig, args: &RunArgs) -> Result<bool> {
    let targets = load_targets(&args.targets)?;
    let command = CommandSpec::new(
        args.command.clone(),
        args.timeout.unwrap_or_else(|| config.command_timeout()),
    );
    let masked = mask_sensitive_command(&command.text);

    let policy = RetryPolicy {
        max_retries: args.max_retries.unwrap_or(config.batch.max_retries),
        base_delay: args
            .base_delay
            .unwrap_or_else(|| config.retry_policy().base_delay),
        max_delay: args
            .max_delay
            .unwrap_or_else(|| config.retry_policy().max_delay),
    };
    let options = BatchOptions {
        policy,
        concurrency: args.concurrency.unwrap_or(config.batch.concurrency),
        poll_interval: config.poll_interval(),
    };

    let channel = Arc::new(AwsCliChannel::from_config(&config.aws));
    let runner = BatchRunner::new(channel, options);

    let cancel = CancellationToken::new();
    spawn_cancel_on_ctrl_c(cancel.clone());
    if let Some(budget) = args.batch_timeout {
        let timeout_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            eprintln!("{} batch budget elapsed, cancelling", "warn:".yellow());
            timeout_cancel.cancel();
        });
    }

    let printer = output::spawn_progress_printer(runner.events().subscribe());
    let mut result = runner
        .run(targets, command.clone(), cancel.clone())
        .await
        .context("batch rejected")?;
    let _ = printer.await;

    output::print_summary(&summarize(&result));

    let failed = select_failed(&result);
    if !failed.is_empty() && !cancel.is_cancelled() && should_retry(args, failed.len())? {
        println!(
            "\n{} retrying {} failed target(s) with the same policy",
            "batch".bold(),
            failed.len()
        );
        let printer = output::spawn_progress_printer(runner.events().subscribe());
        let retried = runner
            .run(failed, command.clone(), CancellationToken::new())
            .await
            .context("retry batch rejected")?;
        let _ = printer.await;

        result.merge(retried);
        output::print_summary(&summarize(&result));
    }

    if let Some(path) = &args.export {
        export(&result, path, args.format)?;
        println!("exported {} record(s) to {}", result.len(), path.display());
    }

    let store = HistoryStore::open_default(config.general.history_limit)?;
    store.record_batch(&result, &masked)?;
    info!(targets = result.len(), "batch recorded to history");

    let counts = result.counts();
    Ok(counts.failed == 0 && counts.timed_out == 0)
}

fn spawn_cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} cancelling in-flight targets", "interrupt:".yellow());
            cancel.cancel();
        }
    });
}

/// Whether to run the failed-subset retry pass. `--retry-failed` forces it,
/// `--no-prompt` (or a non-interactive terminal) skips it, otherwise ask.
fn should_retry(args: &RunArgs, failed: usize) -> Result<bool> {
    if args.retry_failed {
        return Ok(true);
    }
    if args.no_prompt || !console::user_attended() {
        return Ok(false);
    }
    let answer = dialoguer::Confirm::new()
        .with_prompt(format!("Retry the {} failed target(s)?", failed))
        .default(false)
        .interact()
        .unwrap_or(false);
    Ok(answer)
}

fn export(result: &BatchResult, path: &std::path::Path, format: ExportFormat) -> Result<()> {
    let records = report::export_records(result);
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating export file {}", path.display()))?;
    let writer = std::io::BufWriter::new(file);
    match format {
        ExportFormat::Jsonl => report::write_jsonl(writer, &records)?,
        ExportFormat::Tsv => report::write_tsv(writer, &records)?,
    }
    Ok(())
}
