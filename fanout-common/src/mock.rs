//! Scripted mock channel for tests.
//!
//! Stands in for the managed agent service without network access: each
//! target carries a queue of behaviors consumed one per submit, so a test
//! can script "throttle twice, then succeed" and assert the engine's retry
//! schedule against it. Submissions and poll counts are recorded for
//! assertions.

use crate::channel::{ChannelError, CommandChannel, CommandHandle, CommandOutput, PollStatus};
use crate::types::{CommandSpec, Target, TargetId};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// What the channel does with one submitted attempt.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Dispatch succeeds, first poll is terminal Succeeded.
    Succeed { stdout: String },
    /// Dispatch succeeds after a staged poll sequence: `unregistered` polls
    /// report the invocation as not yet visible, then `pending` polls report
    /// Pending, then the invocation succeeds.
    SucceedAfter {
        unregistered: u32,
        pending: u32,
        stdout: String,
    },
    /// Dispatch succeeds, first poll reports the given terminal status.
    TerminalStatus { status: PollStatus, stderr: String },
    /// Dispatch itself fails with a coded service error.
    DispatchError { code: String, message: String },
    /// Dispatch succeeds but no poll ever reaches a terminal status; the
    /// executor's per-attempt budget decides when to give up.
    StayPending,
}

impl MockBehavior {
    pub fn succeed() -> Self {
        Self::Succeed {
            stdout: "ok".to_string(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::TerminalStatus {
            status: PollStatus::Failed {
                reason: Some(reason.clone()),
            },
            stderr: reason,
        }
    }

    pub fn timed_out(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::TerminalStatus {
            status: PollStatus::TimedOut {
                reason: Some(reason.clone()),
            },
            stderr: reason,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::TerminalStatus {
            status: PollStatus::Cancelled {
                reason: Some(reason.clone()),
            },
            stderr: reason,
        }
    }

    pub fn throttled() -> Self {
        Self::DispatchError {
            code: "ThrottlingException".to_string(),
            message: "Rate exceeded".to_string(),
        }
    }

    pub fn access_denied() -> Self {
        Self::DispatchError {
            code: "AccessDeniedException".to_string(),
            message: "not authorized to perform ssm:SendCommand".to_string(),
        }
    }

    pub fn invalid_target() -> Self {
        Self::DispatchError {
            code: "InvalidInstanceId".to_string(),
            message: "instance id is not valid".to_string(),
        }
    }
}

struct MockInvocation {
    behavior: MockBehavior,
    polls: u32,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<TargetId, VecDeque<MockBehavior>>,
    invocations: HashMap<String, MockInvocation>,
    submissions: Vec<(TargetId, String)>,
    next_id: u64,
}

/// Scriptable in-process channel.
pub struct MockChannel {
    default: MockBehavior,
    state: Mutex<MockState>,
}

impl MockChannel {
    /// Channel on which every attempt succeeds immediately.
    pub fn succeeding() -> Self {
        Self::with_default(MockBehavior::succeed())
    }

    /// Channel with the given behavior for unscripted targets.
    pub fn with_default(default: MockBehavior) -> Self {
        Self {
            default,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Queue per-submit behaviors for one target. Once the queue drains,
    /// further submits fall back to the channel default.
    pub fn script(self, target: &TargetId, behaviors: Vec<MockBehavior>) -> Self {
        {
            let mut state = self.lock();
            state
                .scripts
                .entry(target.clone())
                .or_default()
                .extend(behaviors);
        }
        self
    }

    /// All recorded submissions in dispatch order.
    pub fn submissions(&self) -> Vec<(TargetId, String)> {
        self.lock().submissions.clone()
    }

    /// Number of submits seen for one target.
    pub fn submit_count(&self, target: &TargetId) -> usize {
        self.lock()
            .submissions
            .iter()
            .filter(|(id, _)| id == target)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CommandChannel for MockChannel {
    async fn submit(
        &self,
        target: &Target,
        command: &CommandSpec,
    ) -> Result<CommandHandle, ChannelError> {
        let mut state = self.lock();
        state
            .submissions
            .push((target.id.clone(), command.text.clone()));

        let behavior = state
            .scripts
            .get_mut(&target.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone());

        if let MockBehavior::DispatchError { code, message } = &behavior {
            return Err(ChannelError::Service {
                code: code.clone(),
                message: message.clone(),
            });
        }

        state.next_id += 1;
        let invocation_id = format!("mock-{}", state.next_id);
        state
            .invocations
            .insert(invocation_id.clone(), MockInvocation { behavior, polls: 0 });

        Ok(CommandHandle {
            invocation_id,
            target_id: target.id.clone(),
        })
    }

    async fn poll(&self, handle: &CommandHandle) -> Result<PollStatus, ChannelError> {
        let mut state = self.lock();
        let Some(invocation) = state.invocations.get_mut(&handle.invocation_id) else {
            return Err(ChannelError::Transport(format!(
                "unknown invocation {}",
                handle.invocation_id
            )));
        };
        invocation.polls += 1;
        let poll = invocation.polls;

        match &invocation.behavior {
            MockBehavior::Succeed { .. } => Ok(PollStatus::Succeeded),
            MockBehavior::SucceedAfter {
                unregistered,
                pending,
                ..
            } => {
                if poll <= *unregistered {
                    Err(ChannelError::NotYetAvailable)
                } else if poll <= unregistered + pending {
                    Ok(PollStatus::Pending)
                } else {
                    Ok(PollStatus::Succeeded)
                }
            }
            MockBehavior::TerminalStatus { status, .. } => Ok(status.clone()),
            MockBehavior::StayPending => Ok(PollStatus::Pending),
            MockBehavior::DispatchError { .. } => Err(ChannelError::Transport(
                "polled an invocation that never dispatched".to_string(),
            )),
        }
    }

    async fn fetch_output(&self, handle: &CommandHandle) -> Result<CommandOutput, ChannelError> {
        let state = self.lock();
        let Some(invocation) = state.invocations.get(&handle.invocation_id) else {
            return Err(ChannelError::Transport(format!(
                "unknown invocation {}",
                handle.invocation_id
            )));
        };

        match &invocation.behavior {
            MockBehavior::Succeed { stdout } | MockBehavior::SucceedAfter { stdout, .. } => {
                Ok(CommandOutput {
                    stdout: stdout.clone(),
                    stderr: String::new(),
                    exit_code: Some(0),
                })
            }
            MockBehavior::TerminalStatus { stderr, .. } => Ok(CommandOutput {
                stdout: String::new(),
                stderr: stderr.clone(),
                exit_code: Some(1),
            }),
            _ => Ok(CommandOutput::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn target(id: &str) -> Target {
        Target::new(id, id)
    }

    fn command() -> CommandSpec {
        CommandSpec::new("uptime", Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_succeeding_channel_round_trip() {
        let channel = MockChannel::succeeding();
        let t = target("i-1");

        let handle = channel.submit(&t, &command()).await.unwrap();
        assert_eq!(channel.poll(&handle).await.unwrap(), PollStatus::Succeeded);

        let output = channel.fetch_output(&handle).await.unwrap();
        assert_eq!(output.stdout, "ok");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_script_is_consumed_per_submit() {
        let t = target("i-1");
        let channel = MockChannel::succeeding().script(
            &t.id,
            vec![MockBehavior::throttled(), MockBehavior::succeed()],
        );

        assert!(channel.submit(&t, &command()).await.is_err());
        let handle = channel.submit(&t, &command()).await.unwrap();
        assert_eq!(channel.poll(&handle).await.unwrap(), PollStatus::Succeeded);
        assert_eq!(channel.submit_count(&t.id), 2);
    }

    #[tokio::test]
    async fn test_succeed_after_staged_polls() {
        let t = target("i-1");
        let channel = MockChannel::succeeding().script(
            &t.id,
            vec![MockBehavior::SucceedAfter {
                unregistered: 2,
                pending: 1,
                stdout: "late".to_string(),
            }],
        );

        let handle = channel.submit(&t, &command()).await.unwrap();
        assert!(matches!(
            channel.poll(&handle).await,
            Err(ChannelError::NotYetAvailable)
        ));
        assert!(matches!(
            channel.poll(&handle).await,
            Err(ChannelError::NotYetAvailable)
        ));
        assert_eq!(channel.poll(&handle).await.unwrap(), PollStatus::Pending);
        assert_eq!(channel.poll(&handle).await.unwrap(), PollStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unknown_handle_is_transport_error() {
        let channel = MockChannel::succeeding();
        let handle = CommandHandle {
            invocation_id: "nope".to_string(),
            target_id: TargetId::new("i-1"),
        };
        assert!(matches!(
            channel.poll(&handle).await,
            Err(ChannelError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_submissions_record_command_text() {
        let channel = MockChannel::succeeding();
        let t = target("i-9");
        channel.submit(&t, &command()).await.unwrap();

        let subs = channel.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].0, t.id);
        assert_eq!(subs[0].1, "uptime");
    }
}
