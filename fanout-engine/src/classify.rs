//! Failure classification.
//!
//! The single place that decides whether a failing raw outcome is worth
//! retrying. The retry loop never inspects reasons or codes itself; it asks
//! here, so retry policy can evolve without touching the loop.

use crate::attempt::RawOutcome;
use serde::{Deserialize, Serialize};

/// Retryability of a failing raw outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth retrying: throttling, agent/communication unavailability,
    /// poll-budget exhaustion.
    Transient,
    /// Waiting cannot fix it: authorization and validation errors. These
    /// short-circuit the retry budget.
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Service error codes that no amount of waiting will fix.
const PERMANENT_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "InvalidInstanceId",
    "InvalidDocument",
    "InvalidDocumentVersion",
    "InvalidParameters",
    "InvalidRole",
    "ValidationException",
    "UnsupportedPlatformType",
];

/// Reason substrings that mark a terminal status as non-retryable even
/// without a structured code.
const PERMANENT_REASON_MARKERS: &[&str] = &[
    "access denied",
    "not authorized",
    "invalid instance",
    "unsupported platform",
];

/// Classify a failing raw outcome.
///
/// Unknown failures default to Transient, matching the agent service's
/// dominant failure mode under load: terminal Failed/Cancelled/TimedOut
/// statuses usually mean the agent was unreachable or slow, not that the
/// command can never run.
pub fn classify(raw: &RawOutcome) -> FailureKind {
    match raw {
        RawOutcome::Succeeded => FailureKind::Transient,
        RawOutcome::TimedOut { .. } => FailureKind::Transient,
        RawOutcome::DispatchError { code, reason } => {
            if let Some(code) = code {
                if PERMANENT_CODES.contains(&code.as_str()) {
                    return FailureKind::Permanent;
                }
            }
            if reason_is_permanent(reason) {
                FailureKind::Permanent
            } else {
                FailureKind::Transient
            }
        }
        RawOutcome::Failed { reason } | RawOutcome::Cancelled { reason } => {
            if reason_is_permanent(reason) {
                FailureKind::Permanent
            } else {
                FailureKind::Transient
            }
        }
    }
}

fn reason_is_permanent(reason: &str) -> bool {
    let lowered = reason.to_lowercase();
    PERMANENT_REASON_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch(code: &str) -> RawOutcome {
        RawOutcome::DispatchError {
            code: Some(code.to_string()),
            reason: format!("{}: rejected", code),
        }
    }

    #[test]
    fn test_throttling_is_transient() {
        assert_eq!(classify(&dispatch("ThrottlingException")), FailureKind::Transient);
        assert_eq!(classify(&dispatch("RequestLimitExceeded")), FailureKind::Transient);
    }

    #[test]
    fn test_authorization_errors_are_permanent() {
        assert_eq!(classify(&dispatch("AccessDeniedException")), FailureKind::Permanent);
        assert_eq!(classify(&dispatch("UnauthorizedOperation")), FailureKind::Permanent);
    }

    #[test]
    fn test_validation_errors_are_permanent() {
        assert_eq!(classify(&dispatch("InvalidInstanceId")), FailureKind::Permanent);
        assert_eq!(classify(&dispatch("ValidationException")), FailureKind::Permanent);
        assert_eq!(classify(&dispatch("InvalidDocument")), FailureKind::Permanent);
    }

    #[test]
    fn test_uncoded_dispatch_error_defaults_transient() {
        let raw = RawOutcome::DispatchError {
            code: None,
            reason: "connection reset by peer".to_string(),
        };
        assert_eq!(classify(&raw), FailureKind::Transient);
    }

    #[test]
    fn test_timeouts_are_always_transient() {
        let raw = RawOutcome::TimedOut {
            reason: "no terminal status within 120s".to_string(),
        };
        assert_eq!(classify(&raw), FailureKind::Transient);
        let raw = RawOutcome::TimedOut {
            reason: "ExecutionTimedOut".to_string(),
        };
        assert_eq!(classify(&raw), FailureKind::Transient);
    }

    #[test]
    fn test_remote_failure_defaults_transient() {
        let raw = RawOutcome::Failed {
            reason: "exit status 1".to_string(),
        };
        assert_eq!(classify(&raw), FailureKind::Transient);
    }

    #[test]
    fn test_remote_failure_with_permanent_marker() {
        let raw = RawOutcome::Failed {
            reason: "Access denied by document policy".to_string(),
        };
        assert_eq!(classify(&raw), FailureKind::Permanent);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FailureKind::Transient.to_string(), "transient");
        assert_eq!(FailureKind::Permanent.to_string(), "permanent");
    }
}
