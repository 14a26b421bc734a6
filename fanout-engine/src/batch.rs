//! Bounded-concurrency fan-out over the target set.
//!
//! The runner owns the [`BatchResult`] it is building; target executors own
//! their attempt trails and hand back only a finished [`TargetReport`]. No
//! mutable state is shared between concurrently running executors.

use crate::attempt::{Outcome, TargetReport};
use crate::events::{BatchEvent, EventBus};
use crate::executor::{ExecutorContext, run_target};
use chrono::{DateTime, Utc};
use fanout_common::channel::CommandChannel;
use fanout_common::types::{CommandSpec, RetryPolicy, Target, TargetId};
use fanout_common::util::mask_sensitive_command;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Malformed batch input, rejected before any executor starts.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("command text is empty")]
    EmptyCommand,
    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,
    #[error("per-attempt timeout must be nonzero")]
    ZeroTimeout,
    #[error("retry policy base delay {base:?} exceeds max delay {max:?}")]
    InvalidPolicy { base: Duration, max: Duration },
}

/// Knobs for one batch invocation. An explicit value, never ambient state:
/// concurrent batches with different policies can coexist.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub policy: RetryPolicy,
    pub concurrency: usize,
    pub poll_interval: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            concurrency: 5,
            poll_interval: Duration::from_secs(3),
        }
    }
}

/// Aggregate counts over a batch result. Always recomputed from the
/// entries, never carried alongside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub total: usize,
}

/// Terminal per-target outcomes for one batch invocation, keyed by target
/// identity. Insertion order is completion order, not request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub entries: IndexMap<TargetId, TargetReport>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl BatchResult {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            entries: IndexMap::new(),
            started_at,
            duration_ms: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts(&self) -> BatchCounts {
        let mut counts = BatchCounts {
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            total: self.entries.len(),
        };
        for report in self.entries.values() {
            match report.outcome {
                Outcome::Success => counts.succeeded += 1,
                Outcome::Failure => counts.failed += 1,
                Outcome::Timeout => counts.timed_out += 1,
            }
        }
        counts
    }

    /// Overlay a retried result onto this one by target identity. Entries
    /// for retried targets are replaced in place; everything else is left
    /// untouched. A target present in both results is counted once.
    pub fn merge(&mut self, retried: BatchResult) {
        for (id, report) in retried.entries {
            self.entries.insert(id, report);
        }
        self.duration_ms += retried.duration_ms;
    }
}

/// Runs one command against many targets with bounded concurrency.
pub struct BatchRunner {
    channel: Arc<dyn CommandChannel>,
    options: BatchOptions,
    events: EventBus,
}

impl BatchRunner {
    pub fn new(channel: Arc<dyn CommandChannel>, options: BatchOptions) -> Self {
        Self {
            channel,
            options,
            events: EventBus::default(),
        }
    }

    /// The progress event stream for this runner.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Execute `command` on every target.
    ///
    /// Guarantees: every input target appears exactly once in the result,
    /// at most `concurrency` executors run at once, and a fresh executor is
    /// scheduled as soon as a running one terminates. One target's failure
    /// never aborts its siblings; the only fatal condition is malformed
    /// input, reported before anything starts.
    pub async fn run(
        &self,
        targets: Vec<Target>,
        command: CommandSpec,
        cancel: CancellationToken,
    ) -> Result<BatchResult, BatchError> {
        self.validate(&command)?;

        let targets = dedup_targets(targets);
        let started_at = Utc::now();
        let batch_started = Instant::now();
        let mut result = BatchResult::new(started_at);

        self.events.emit(BatchEvent::BatchStarted {
            total: targets.len(),
            command: mask_sensitive_command(&command.text),
        });

        if targets.is_empty() {
            result.duration_ms = batch_started.elapsed().as_millis() as u64;
            self.emit_finished(&result, batch_started);
            return Ok(result);
        }

        info!(
            targets = targets.len(),
            concurrency = self.options.concurrency,
            max_attempts = self.options.policy.max_attempts(),
            "starting batch"
        );

        let ctx = Arc::new(ExecutorContext {
            channel: Arc::clone(&self.channel),
            command,
            policy: self.options.policy.clone(),
            poll_interval: self.options.poll_interval,
            events: self.events.clone(),
            cancel: cancel.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));

        // Targets not yet accounted for in the result; drained as reports
        // arrive so even a panicked executor leaves no target unreported.
        let mut pending: HashMap<TargetId, Target> = targets
            .iter()
            .map(|t| (t.id.clone(), t.clone()))
            .collect();

        let mut join = JoinSet::new();
        for target in targets {
            let ctx = Arc::clone(&ctx);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            join.spawn(async move {
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => {
                        return unscheduled_report(target);
                    }
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return unscheduled_report(target),
                    },
                };
                if cancel.is_cancelled() {
                    return unscheduled_report(target);
                }
                run_target(&ctx, target).await
            });
        }

        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(report) => {
                    self.events.emit(BatchEvent::TargetFinished {
                        target_id: report.target.id.to_string(),
                        label: report.target.label.clone(),
                        outcome: report.outcome,
                        cancelled: report.cancelled,
                        attempt_count: report.attempt_count(),
                        duration_ms: report.duration_ms,
                    });
                    pending.remove(&report.target.id);
                    result.entries.insert(report.target.id.clone(), report);
                }
                Err(join_err) => {
                    // The failed task's report is lost; the owning target is
                    // backfilled below from the pending set.
                    error!(error = %join_err, "target executor task failed");
                }
            }
        }

        for (_, target) in pending.drain() {
            let report = lost_executor_report(target);
            self.events.emit(BatchEvent::TargetFinished {
                target_id: report.target.id.to_string(),
                label: report.target.label.clone(),
                outcome: report.outcome,
                cancelled: report.cancelled,
                attempt_count: 0,
                duration_ms: 0,
            });
            result.entries.insert(report.target.id.clone(), report);
        }

        result.duration_ms = batch_started.elapsed().as_millis() as u64;
        self.emit_finished(&result, batch_started);
        Ok(result)
    }

    fn validate(&self, command: &CommandSpec) -> Result<(), BatchError> {
        if command.text.trim().is_empty() {
            return Err(BatchError::EmptyCommand);
        }
        if self.options.concurrency == 0 {
            return Err(BatchError::ZeroConcurrency);
        }
        if command.timeout.is_zero() {
            return Err(BatchError::ZeroTimeout);
        }
        let policy = &self.options.policy;
        if policy.base_delay > policy.max_delay {
            return Err(BatchError::InvalidPolicy {
                base: policy.base_delay,
                max: policy.max_delay,
            });
        }
        Ok(())
    }

    fn emit_finished(&self, result: &BatchResult, batch_started: Instant) {
        let counts = result.counts();
        self.events.emit(BatchEvent::BatchFinished {
            succeeded: counts.succeeded,
            failed: counts.failed,
            timed_out: counts.timed_out,
            total: counts.total,
            duration_ms: batch_started.elapsed().as_millis() as u64,
        });
    }
}

fn dedup_targets(targets: Vec<Target>) -> Vec<Target> {
    let mut seen: HashMap<TargetId, ()> = HashMap::with_capacity(targets.len());
    let mut out = Vec::with_capacity(targets.len());
    for target in targets {
        if seen.insert(target.id.clone(), ()).is_some() {
            warn!(target = %target.id, "duplicate target dropped from batch");
            continue;
        }
        out.push(target);
    }
    out
}

/// Report for a target whose executor never started because the batch was
/// cancelled first. It still gets an entry; no target silently disappears.
fn unscheduled_report(target: Target) -> TargetReport {
    TargetReport {
        target,
        outcome: Outcome::Failure,
        cancelled: true,
        attempts: Vec::new(),
        duration_ms: 0,
    }
}

/// Report backfilled for a target whose executor task died.
fn lost_executor_report(target: Target) -> TargetReport {
    TargetReport {
        target,
        outcome: Outcome::Failure,
        cancelled: false,
        attempts: Vec::new(),
        duration_ms: 0,
    }
}
