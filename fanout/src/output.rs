//! Progress and result rendering.
//!
//! Subscribes to the engine's event stream and prints colored status lines;
//! the final table mirrors the per-target summary. All styling lives here,
//! outside the engine.

use colored::Colorize;
use fanout_common::util::humanize_duration;
use fanout_engine::{BatchEvent, BatchSummary, Outcome};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Print events until the batch finishes or the bus closes.
pub fn spawn_progress_printer(
    mut rx: broadcast::Receiver<BatchEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = matches!(event, BatchEvent::BatchFinished { .. });
                    render_event(&event);
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("{} {} progress events dropped", "note:".dimmed(), skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn render_event(event: &BatchEvent) {
    match event {
        BatchEvent::BatchStarted { total, command } => {
            println!(
                "{} running {} on {} target(s)",
                "batch".bold(),
                command.cyan(),
                total
            );
        }
        BatchEvent::AttemptStarted { .. } => {}
        BatchEvent::RetryScheduled {
            label,
            attempt,
            delay_ms,
            ..
        } => {
            println!(
                "{} {}: attempt {} in {}",
                "retry".yellow(),
                label,
                attempt + 1,
                humanize_duration(delay_ms / 1000)
            );
        }
        BatchEvent::TargetFinished {
            target_id,
            label,
            outcome,
            cancelled,
            attempt_count,
            duration_ms,
        } => {
            let status = outcome_label(*outcome, *cancelled);
            println!(
                "{} {} ({}) - {:.1}s, {} attempt(s)",
                status,
                label,
                target_id,
                *duration_ms as f64 / 1000.0,
                attempt_count
            );
        }
        BatchEvent::BatchFinished {
            succeeded,
            failed,
            timed_out,
            total,
            duration_ms,
        } => {
            println!(
                "{} {} target(s) in {} - {}, {}, {}",
                "done".bold(),
                total,
                humanize_duration(duration_ms / 1000),
                format!("{} succeeded", succeeded).green(),
                format!("{} failed", failed).red(),
                format!("{} timed out", timed_out).red()
            );
        }
    }
}

fn outcome_label(outcome: Outcome, cancelled: bool) -> colored::ColoredString {
    if cancelled {
        return "CANCELLED".red();
    }
    match outcome {
        Outcome::Success => "SUCCESS".green(),
        Outcome::Failure => "FAILED".red(),
        Outcome::Timeout => "TIMEOUT".red(),
    }
}

/// Final per-target table plus the aggregate line.
pub fn print_summary(summary: &BatchSummary) {
    println!();
    println!(
        "{} {} - {}, {}, {}",
        "results:".bold(),
        format!("{} target(s)", summary.counts.total),
        format!("{} succeeded", summary.counts.succeeded).green(),
        format!("{} failed", summary.counts.failed).red(),
        format!("{} timed out", summary.counts.timed_out).red()
    );

    for row in &summary.rows {
        let status = outcome_label(row.outcome, row.cancelled);
        println!(
            "{} {} ({}) - {:.1}s, {} attempt(s)",
            status,
            row.target.label,
            row.target.id,
            row.duration_ms as f64 / 1000.0,
            row.attempt_count
        );
        if !row.last_output.is_empty() {
            println!("   out: {}", row.last_output);
        }
        if !row.last_error.is_empty() && row.outcome != Outcome::Success {
            println!("   err: {}", row.last_error.red());
        }
    }
}
