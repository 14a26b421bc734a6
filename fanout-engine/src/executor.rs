//! Per-target execution: the unit of retry.
//!
//! Drives one target through submit → poll-until-terminal → classify →
//! retry-or-finish. The retry boundary wraps the entire attempt: a dispatch
//! that lands on a slow agent and then times out during polling is retried
//! exactly like a dispatch that never went out. Retrying only the submit
//! call is the known failure mode this structure rules out.

use crate::attempt::{AttemptRecord, Outcome, RawOutcome, TargetReport};
use crate::classify::{FailureKind, classify};
use crate::events::{BatchEvent, EventBus};
use chrono::{DateTime, Utc};
use fanout_common::channel::{ChannelError, CommandChannel, CommandHandle, PollStatus};
use fanout_common::types::{CommandSpec, RetryPolicy, Target};
use fanout_common::util::truncate_output;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capture budget per attempt for stdout/stderr, bytes.
const OUTPUT_CAP_BYTES: usize = 8 * 1024;

/// Everything a target executor needs, shared across the batch.
pub struct ExecutorContext {
    pub channel: Arc<dyn CommandChannel>,
    pub command: CommandSpec,
    pub policy: RetryPolicy,
    pub poll_interval: Duration,
    pub events: EventBus,
    pub cancel: CancellationToken,
}

/// Result of one complete attempt (submit + poll + output fetch).
enum AttemptStep {
    Success { stdout: String, stderr: String },
    Failure { raw: RawOutcome, stdout: String, error: String },
    Cancelled,
}

/// Drive one target to a terminal outcome.
///
/// Every loop iteration appends exactly one [`AttemptRecord`], so the audit
/// trail is complete even on success-after-retry.
pub async fn run_target(ctx: &ExecutorContext, target: Target) -> TargetReport {
    let run_started = Instant::now();
    let max_attempts = ctx.policy.max_attempts();
    let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(1);

    for attempt in 0..max_attempts {
        let wait = ctx.policy.delay(attempt);
        if !wait.is_zero() {
            ctx.events.emit(BatchEvent::RetryScheduled {
                target_id: target.id.to_string(),
                label: target.label.clone(),
                attempt,
                delay_ms: wait.as_millis() as u64,
            });
            debug!(
                target = %target.id,
                attempt,
                delay_secs = wait.as_secs_f64(),
                "waiting before retry"
            );
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    attempts.push(cancelled_record(attempt, wait, Utc::now()));
                    return finish(target, Outcome::Failure, true, attempts, run_started);
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        ctx.events.emit(BatchEvent::AttemptStarted {
            target_id: target.id.to_string(),
            label: target.label.clone(),
            attempt,
        });
        let attempt_started = Utc::now();

        match run_attempt(ctx, &target).await {
            AttemptStep::Cancelled => {
                attempts.push(cancelled_record(attempt, wait, attempt_started));
                return finish(target, Outcome::Failure, true, attempts, run_started);
            }
            AttemptStep::Success { stdout, stderr } => {
                attempts.push(record(
                    attempt,
                    wait,
                    attempt_started,
                    RawOutcome::Succeeded,
                    None,
                    &stdout,
                    &stderr,
                ));
                if attempt > 0 {
                    debug!(target = %target.id, attempt, "retry succeeded");
                }
                return finish(target, Outcome::Success, false, attempts, run_started);
            }
            AttemptStep::Failure { raw, stdout, error } => {
                let kind = classify(&raw);
                let timed_out = raw.is_timeout();
                attempts.push(record(
                    attempt,
                    wait,
                    attempt_started,
                    raw,
                    Some(kind),
                    &stdout,
                    &error,
                ));

                match kind {
                    FailureKind::Permanent => {
                        warn!(target = %target.id, attempt, error = %error, "permanent failure, giving up");
                        return finish(target, Outcome::Failure, false, attempts, run_started);
                    }
                    FailureKind::Transient if attempt + 1 < max_attempts => {
                        warn!(target = %target.id, attempt, error = %error, "attempt failed, will retry");
                    }
                    FailureKind::Transient => {
                        let outcome = if timed_out {
                            Outcome::Timeout
                        } else {
                            Outcome::Failure
                        };
                        return finish(target, outcome, false, attempts, run_started);
                    }
                }
            }
        }
    }

    // The loop returns from its final iteration; max_attempts is >= 1.
    finish(target, Outcome::Failure, false, attempts, run_started)
}

/// One atomic attempt: dispatch, then poll inside the per-attempt budget.
async fn run_attempt(ctx: &ExecutorContext, target: &Target) -> AttemptStep {
    let handle = match ctx.channel.submit(target, &ctx.command).await {
        Ok(handle) => handle,
        Err(err) => {
            let reason = err.to_string();
            return AttemptStep::Failure {
                raw: RawOutcome::DispatchError {
                    code: err.code().map(str::to_string),
                    reason: reason.clone(),
                },
                stdout: String::new(),
                error: reason,
            };
        }
    };

    let deadline = Instant::now() + ctx.command.timeout;
    loop {
        match ctx.channel.poll(&handle).await {
            Ok(PollStatus::Succeeded) => {
                let (stdout, stderr) = fetch_success_output(ctx, &handle).await;
                return AttemptStep::Success { stdout, stderr };
            }
            Ok(PollStatus::Failed { reason }) => {
                return failure_step(ctx, &handle, reason, "Failed", |r| RawOutcome::Failed {
                    reason: r,
                })
                .await;
            }
            Ok(PollStatus::Cancelled { reason }) => {
                return failure_step(ctx, &handle, reason, "Cancelled", |r| {
                    RawOutcome::Cancelled { reason: r }
                })
                .await;
            }
            Ok(PollStatus::TimedOut { reason }) => {
                return failure_step(ctx, &handle, reason, "TimedOut", |r| {
                    RawOutcome::TimedOut { reason: r }
                })
                .await;
            }
            Ok(PollStatus::Pending | PollStatus::InProgress) => {}
            Err(ChannelError::NotYetAvailable) => {
                // Registration window right after dispatch; keep polling
                // inside the budget.
            }
            Err(err) => {
                debug!(target = %handle.target_id, error = %err, "status poll failed, polling again");
            }
        }

        if Instant::now() >= deadline {
            let reason = format!(
                "no terminal status within {}s",
                ctx.command.timeout.as_secs()
            );
            return AttemptStep::Failure {
                raw: RawOutcome::TimedOut {
                    reason: reason.clone(),
                },
                stdout: String::new(),
                error: reason,
            };
        }

        tokio::select! {
            _ = ctx.cancel.cancelled() => return AttemptStep::Cancelled,
            _ = tokio::time::sleep(ctx.poll_interval) => {}
        }
    }
}

async fn fetch_success_output(ctx: &ExecutorContext, handle: &CommandHandle) -> (String, String) {
    match ctx.channel.fetch_output(handle).await {
        Ok(output) => (output.stdout, output.stderr),
        Err(err) => {
            warn!(target = %handle.target_id, error = %err, "output fetch failed after success");
            (String::new(), String::new())
        }
    }
}

async fn failure_step(
    ctx: &ExecutorContext,
    handle: &CommandHandle,
    reason: Option<String>,
    fallback: &str,
    make_raw: impl FnOnce(String) -> RawOutcome,
) -> AttemptStep {
    let reason = reason.unwrap_or_else(|| fallback.to_string());
    let (stdout, stderr) = match ctx.channel.fetch_output(handle).await {
        Ok(output) => (output.stdout, output.stderr),
        Err(_) => (String::new(), String::new()),
    };
    let error = if stderr.trim().is_empty() {
        reason.clone()
    } else {
        stderr
    };
    AttemptStep::Failure {
        raw: make_raw(reason),
        stdout,
        error,
    }
}

fn record(
    attempt: u32,
    wait: Duration,
    started_at: DateTime<Utc>,
    raw: RawOutcome,
    kind: Option<FailureKind>,
    stdout: &str,
    error: &str,
) -> AttemptRecord {
    AttemptRecord {
        attempt,
        started_at,
        finished_at: Utc::now(),
        wait_before_ms: wait.as_millis() as u64,
        raw,
        kind,
        output: truncate_output(stdout, OUTPUT_CAP_BYTES),
        error: truncate_output(error, OUTPUT_CAP_BYTES),
    }
}

fn cancelled_record(attempt: u32, wait: Duration, started_at: DateTime<Utc>) -> AttemptRecord {
    record(
        attempt,
        wait,
        started_at,
        RawOutcome::Cancelled {
            reason: "batch cancelled".to_string(),
        },
        None,
        "",
        "batch cancelled",
    )
}

fn finish(
    target: Target,
    outcome: Outcome,
    cancelled: bool,
    attempts: Vec<AttemptRecord>,
    run_started: Instant,
) -> TargetReport {
    TargetReport {
        target,
        outcome,
        cancelled,
        attempts,
        duration_ms: run_started.elapsed().as_millis() as u64,
    }
}
