//! Common types used across fanout components.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique identifier for a remote compute target (e.g. an instance id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shell family of a target. Selects the remote run document only; the
/// engine's retry logic never consults it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Windows,
}

impl Default for Platform {
    fn default() -> Self {
        Self::Linux
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// One remote compute target addressed by a batch command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Opaque identity, unique within a batch.
    pub id: TargetId,
    /// Human label shown in progress lines and reports.
    pub label: String,
    /// Shell family for document selection.
    #[serde(default)]
    pub platform: Platform,
}

impl Target {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: TargetId::new(id),
            label: label.into(),
            platform: Platform::Linux,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }
}

/// The command text to execute plus the wall-clock budget for one attempt.
///
/// The timeout bounds a single submit-and-poll cycle; it is independent of
/// the retry budget in [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub text: String,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(text: impl Into<String>, timeout: Duration) -> Self {
        Self {
            text: text.into(),
            timeout,
        }
    }
}

/// Retry budget and backoff bounds for one batch invocation.
///
/// `max_retries` counts additional attempts after the first, so a target is
/// tried at most `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Base wait between attempts; the wait grows linearly with the attempt
    /// number.
    pub base_delay: Duration,
    /// Cap on the backoff wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff wait before the given attempt (0-based). The first attempt is
    /// never delayed; attempt `n >= 1` waits `min(base_delay * n, max_delay)`.
    ///
    /// Pure and deterministic so backoff schedules are testable without a
    /// live channel.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let scaled = self.base_delay.saturating_mul(attempt);
        scaled.min(self.max_delay)
    }

    /// Total attempts allowed per target, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_id_display() {
        let id = TargetId::new("i-0abc123");
        assert_eq!(id.to_string(), "i-0abc123");
        assert_eq!(id.as_str(), "i-0abc123");
    }

    #[test]
    fn test_delay_zero_attempt_is_never_waited() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::ZERO);
    }

    #[test]
    fn test_delay_grows_linearly_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(2), Duration::from_secs(20));
        assert_eq!(policy.delay(3), Duration::from_secs(30));
        assert_eq!(policy.delay(6), Duration::from_secs(60));
        assert_eq!(policy.delay(100), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_formula_matches_min_of_scaled_and_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(7),
        };
        for attempt in 0..20u32 {
            let expected = policy
                .base_delay
                .saturating_mul(attempt)
                .min(policy.max_delay);
            assert_eq!(policy.delay(attempt), expected, "attempt {}", attempt);
        }
    }

    #[test]
    fn test_max_attempts_counts_first_try() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_platform_serde_is_snake_case() {
        let json = serde_json::to_string(&Platform::Windows).unwrap();
        assert_eq!(json, "\"windows\"");
        let back: Platform = serde_json::from_str("\"linux\"").unwrap();
        assert_eq!(back, Platform::Linux);
    }

    #[test]
    fn test_target_platform_defaults_to_linux() {
        let target: Target =
            serde_json::from_str(r#"{"id":"i-1","label":"web-1"}"#).unwrap();
        assert_eq!(target.platform, Platform::Linux);
    }
}
