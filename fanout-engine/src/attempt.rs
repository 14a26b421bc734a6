//! Per-target execution records.

use crate::classify::FailureKind;
use chrono::{DateTime, Utc};
use fanout_common::types::Target;
use serde::{Deserialize, Serialize};

/// Raw result of one submit/poll cycle, as reported by the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawOutcome {
    Succeeded,
    Failed { reason: String },
    Cancelled { reason: String },
    TimedOut { reason: String },
    /// The submit call itself failed; nothing reached the agent.
    DispatchError {
        code: Option<String>,
        reason: String,
    },
}

impl RawOutcome {
    /// Whether this outcome is a timeout, remote-reported or local
    /// poll-budget exhaustion alike.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Failed { reason }
            | Self::Cancelled { reason }
            | Self::TimedOut { reason }
            | Self::DispatchError { reason, .. } => Some(reason),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
            Self::TimedOut { .. } => "timed_out",
            Self::DispatchError { .. } => "dispatch_error",
        }
    }
}

/// Terminal per-target result of a batch.
///
/// Timeout and Failure are both exhausted-retry states but are reported
/// distinctly: a timeout usually means the agent is slow or wedged, a
/// failure means the command or the dispatch is broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// One submit/poll/classify cycle for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 0-based attempt index.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Backoff wait applied before this attempt; 0 for the first.
    pub wait_before_ms: u64,
    pub raw: RawOutcome,
    /// Classification of a failing raw outcome; None on success and on
    /// caller-initiated cancellation.
    pub kind: Option<FailureKind>,
    /// Captured stdout, capped with a truncation marker.
    pub output: String,
    /// Captured stderr or channel reason text, capped likewise.
    pub error: String,
}

/// Everything one target produced: the ordered attempt trail plus the
/// terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: Target,
    pub outcome: Outcome,
    /// Set when the batch was cancelled out from under this target.
    #[serde(default)]
    pub cancelled: bool,
    pub attempts: Vec<AttemptRecord>,
    pub duration_ms: u64,
}

impl TargetReport {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Error text of the last attempt, if any attempt failed.
    pub fn last_error(&self) -> Option<&str> {
        let last = self.attempts.last()?;
        if !last.error.is_empty() {
            return Some(&last.error);
        }
        last.raw.reason()
    }

    /// Stdout of the last attempt.
    pub fn last_output(&self) -> &str {
        self.attempts.last().map(|a| a.output.as_str()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: Outcome, attempts: Vec<AttemptRecord>) -> TargetReport {
        TargetReport {
            target: Target::new("i-1", "web-1"),
            outcome,
            cancelled: false,
            attempts,
            duration_ms: 10,
        }
    }

    fn attempt(raw: RawOutcome, error: &str) -> AttemptRecord {
        AttemptRecord {
            attempt: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            wait_before_ms: 0,
            raw,
            kind: None,
            output: String::new(),
            error: error.to_string(),
        }
    }

    #[test]
    fn test_raw_outcome_timeout_detection() {
        assert!(RawOutcome::TimedOut {
            reason: "slow".to_string()
        }
        .is_timeout());
        assert!(!RawOutcome::Failed {
            reason: "exit 1".to_string()
        }
        .is_timeout());
        assert!(!RawOutcome::Succeeded.is_timeout());
    }

    #[test]
    fn test_last_error_prefers_captured_stderr() {
        let r = report(
            Outcome::Failure,
            vec![attempt(
                RawOutcome::Failed {
                    reason: "Failed".to_string(),
                },
                "command not found",
            )],
        );
        assert_eq!(r.last_error(), Some("command not found"));
    }

    #[test]
    fn test_last_error_falls_back_to_raw_reason() {
        let r = report(
            Outcome::Failure,
            vec![attempt(
                RawOutcome::TimedOut {
                    reason: "no status".to_string(),
                },
                "",
            )],
        );
        assert_eq!(r.last_error(), Some("no status"));
    }

    #[test]
    fn test_last_error_none_without_attempts() {
        let r = report(Outcome::Failure, vec![]);
        assert_eq!(r.last_error(), None);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Success.to_string(), "success");
        assert_eq!(Outcome::Failure.to_string(), "failure");
        assert_eq!(Outcome::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_report_serde_round_trip() {
        let r = report(
            Outcome::Timeout,
            vec![attempt(
                RawOutcome::TimedOut {
                    reason: "agent gone".to_string(),
                },
                "agent gone",
            )],
        );
        let json = serde_json::to_string(&r).unwrap();
        let back: TargetReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.outcome, Outcome::Timeout);
        assert_eq!(back.attempts.len(), 1);
        assert!(!back.cancelled);
    }
}
