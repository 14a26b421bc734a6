//! The remote execution channel boundary.
//!
//! The engine treats the managed remote-agent command service as an opaque
//! three-call capability: submit a command, poll a handle for status, fetch
//! output once terminal. Implementations live in [`crate::aws_cli`] (the
//! production path) and [`crate::mock`] (scripted, for tests).

use crate::types::{CommandSpec, Target, TargetId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Handle to one in-flight command invocation on one target.
///
/// Handles are never shared between targets; each executor polls only the
/// handles it created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHandle {
    /// Service-assigned invocation id.
    pub invocation_id: String,
    /// Target the invocation was dispatched to.
    pub target_id: TargetId,
}

/// Status reported by the channel for an in-flight invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    /// Accepted but not yet running on the agent.
    Pending,
    /// Running on the agent.
    InProgress,
    Succeeded,
    Failed { reason: Option<String> },
    Cancelled { reason: Option<String> },
    TimedOut { reason: Option<String> },
}

impl PollStatus {
    /// Whether this status ends the invocation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }
}

/// Captured output of a terminal invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Raw channel failure. The channel reports what happened; deciding whether
/// it is worth retrying is the failure classifier's job, not the channel's.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The invocation is not yet visible to the status API. The service
    /// registers invocations asynchronously, so a poll issued right after a
    /// submit can land in this window. Absorbed by the poll loop.
    #[error("invocation not yet registered with the agent service")]
    NotYetAvailable,

    /// Failure reaching the service at all: process spawn, network, or a
    /// response that could not be decoded.
    #[error("channel transport error: {0}")]
    Transport(String),

    /// The service rejected or failed the call with a coded error.
    #[error("{code}: {message}")]
    Service { code: String, message: String },
}

impl ChannelError {
    /// The service error code, when one was reported.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// The three-call capability the engine consumes.
///
/// Implementations must be safe for concurrent use by many executors; no
/// two executors ever operate on the same handle.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Dispatch the command to one target, returning a pollable handle.
    async fn submit(
        &self,
        target: &Target,
        command: &CommandSpec,
    ) -> Result<CommandHandle, ChannelError>;

    /// Current status of an invocation.
    async fn poll(&self, handle: &CommandHandle) -> Result<PollStatus, ChannelError>;

    /// Output of a terminal invocation. Called once per attempt, after a
    /// terminal status.
    async fn fetch_output(&self, handle: &CommandHandle) -> Result<CommandOutput, ChannelError>;
}
