//! AWS-CLI-backed command channel.
//!
//! Drives the managed agent service through the `aws ssm` CLI
//! (`send-command` / `get-command-invocation`) with `--output json`, one
//! subprocess per call. Credentials and endpoint resolution stay with the
//! CLI; this channel only shapes requests and decodes responses.

use crate::channel::{ChannelError, CommandChannel, CommandHandle, CommandOutput, PollStatus};
use crate::config::AwsConfig;
use crate::types::{CommandSpec, Platform, Target};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Extra delivery window beyond the per-attempt execution budget. Slow
/// deliveries are the agent's to report, not the dispatcher's.
const DELIVERY_MARGIN_SECS: u64 = 30;

pub struct AwsCliChannel {
    cli_path: String,
    profile: Option<String>,
    region: Option<String>,
    linux_document: String,
    windows_document: String,
}

impl AwsCliChannel {
    pub fn from_config(config: &AwsConfig) -> Self {
        Self {
            cli_path: config.cli_path.clone(),
            profile: config.profile.clone(),
            region: config.region.clone(),
            linux_document: config.linux_document.clone(),
            windows_document: config.windows_document.clone(),
        }
    }

    fn document_for(&self, platform: Platform) -> &str {
        match platform {
            Platform::Linux => &self.linux_document,
            Platform::Windows => &self.windows_document,
        }
    }

    async fn run_cli(&self, args: &[String]) -> Result<String, ChannelError> {
        let mut cmd = tokio::process::Command::new(&self.cli_path);
        cmd.args(args);
        if let Some(profile) = &self.profile {
            cmd.arg("--profile").arg(profile);
        }
        if let Some(region) = &self.region {
            cmd.arg("--region").arg(region);
        }
        cmd.arg("--output").arg("json");

        let output = cmd
            .output()
            .await
            .map_err(|e| ChannelError::Transport(format!("spawning {}: {}", self.cli_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(parse_cli_error(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Decode an AWS CLI failure line into a channel error.
///
/// The CLI reports service errors as
/// `An error occurred (SomeCode) when calling the X operation: message`.
fn parse_cli_error(stderr: &str) -> ChannelError {
    let line = stderr
        .lines()
        .find(|l| l.contains("An error occurred ("))
        .unwrap_or_else(|| stderr.trim());

    if let Some(open) = line.find('(') {
        if let Some(close) = line[open..].find(')') {
            let code = line[open + 1..open + close].to_string();
            if code == "InvocationDoesNotExist" {
                return ChannelError::NotYetAvailable;
            }
            let message = line
                .split_once(':')
                .map(|(_, rest)| rest.trim().to_string())
                .unwrap_or_else(|| line.to_string());
            return ChannelError::Service { code, message };
        }
    }

    ChannelError::Transport(line.to_string())
}

/// Map a service status string onto the channel's poll vocabulary. Statuses
/// the service has not finished with ("Cancelling", anything unknown) stay
/// non-terminal so the poll loop keeps waiting.
fn map_status(status: &str, details: Option<String>) -> PollStatus {
    match status {
        "Pending" | "Delayed" => PollStatus::Pending,
        "InProgress" | "Cancelling" => PollStatus::InProgress,
        "Success" => PollStatus::Succeeded,
        "Failed" => PollStatus::Failed { reason: details },
        "Cancelled" => PollStatus::Cancelled { reason: details },
        "TimedOut" => PollStatus::TimedOut { reason: details },
        _ => PollStatus::InProgress,
    }
}

#[derive(Debug, Deserialize)]
struct SendCommandResponse {
    #[serde(rename = "Command")]
    command: SentCommand,
}

#[derive(Debug, Deserialize)]
struct SentCommand {
    #[serde(rename = "CommandId")]
    command_id: String,
}

#[derive(Debug, Deserialize)]
struct InvocationResponse {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "StatusDetails", default)]
    status_details: Option<String>,
    #[serde(rename = "StandardOutputContent", default)]
    stdout: String,
    #[serde(rename = "StandardErrorContent", default)]
    stderr: String,
    #[serde(rename = "ResponseCode", default)]
    response_code: Option<i32>,
}

#[async_trait]
impl CommandChannel for AwsCliChannel {
    async fn submit(
        &self,
        target: &Target,
        command: &CommandSpec,
    ) -> Result<CommandHandle, ChannelError> {
        let timeout_secs = command.timeout.as_secs().max(1);
        let parameters = serde_json::json!({
            "commands": [command.text],
            "executionTimeout": [timeout_secs.to_string()],
        });

        let args = vec![
            "ssm".to_string(),
            "send-command".to_string(),
            "--instance-ids".to_string(),
            target.id.as_str().to_string(),
            "--document-name".to_string(),
            self.document_for(target.platform).to_string(),
            "--parameters".to_string(),
            parameters.to_string(),
            "--timeout-seconds".to_string(),
            (timeout_secs + DELIVERY_MARGIN_SECS).to_string(),
        ];

        let raw = self.run_cli(&args).await?;
        let response: SendCommandResponse = serde_json::from_str(&raw)
            .map_err(|e| ChannelError::Transport(format!("decoding send-command: {}", e)))?;

        debug!(target = %target.id, invocation = %response.command.command_id, "command dispatched");

        Ok(CommandHandle {
            invocation_id: response.command.command_id,
            target_id: target.id.clone(),
        })
    }

    async fn poll(&self, handle: &CommandHandle) -> Result<PollStatus, ChannelError> {
        let raw = self.run_cli(&invocation_args(handle)).await?;
        let response: InvocationResponse = serde_json::from_str(&raw)
            .map_err(|e| ChannelError::Transport(format!("decoding invocation: {}", e)))?;
        Ok(map_status(&response.status, response.status_details))
    }

    async fn fetch_output(&self, handle: &CommandHandle) -> Result<CommandOutput, ChannelError> {
        let raw = self.run_cli(&invocation_args(handle)).await?;
        let response: InvocationResponse = serde_json::from_str(&raw)
            .map_err(|e| ChannelError::Transport(format!("decoding invocation: {}", e)))?;
        Ok(CommandOutput {
            stdout: response.stdout,
            stderr: response.stderr,
            exit_code: response.response_code,
        })
    }
}

fn invocation_args(handle: &CommandHandle) -> Vec<String> {
    vec![
        "ssm".to_string(),
        "get-command-invocation".to_string(),
        "--command-id".to_string(),
        handle.invocation_id.clone(),
        "--instance-id".to_string(),
        handle.target_id.as_str().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli_error_extracts_code() {
        let stderr =
            "An error occurred (ThrottlingException) when calling the SendCommand operation: Rate exceeded";
        match parse_cli_error(stderr) {
            ChannelError::Service { code, message } => {
                assert_eq!(code, "ThrottlingException");
                assert_eq!(message, "Rate exceeded");
            }
            other => panic!("expected service error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_cli_error_invocation_window() {
        let stderr = "An error occurred (InvocationDoesNotExist) when calling the GetCommandInvocation operation: not found";
        assert!(matches!(
            parse_cli_error(stderr),
            ChannelError::NotYetAvailable
        ));
    }

    #[test]
    fn test_parse_cli_error_unstructured_is_transport() {
        match parse_cli_error("ssh: connection reset") {
            ChannelError::Transport(msg) => assert!(msg.contains("connection reset")),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_map_status_terminal_states() {
        assert_eq!(map_status("Success", None), PollStatus::Succeeded);
        assert_eq!(
            map_status("Failed", Some("DeliveryTimedOut".to_string())),
            PollStatus::Failed {
                reason: Some("DeliveryTimedOut".to_string())
            }
        );
        assert_eq!(
            map_status("TimedOut", None),
            PollStatus::TimedOut { reason: None }
        );
    }

    #[test]
    fn test_map_status_in_flight_states() {
        assert_eq!(map_status("Pending", None), PollStatus::Pending);
        assert_eq!(map_status("Delayed", None), PollStatus::Pending);
        assert_eq!(map_status("InProgress", None), PollStatus::InProgress);
        assert_eq!(map_status("Cancelling", None), PollStatus::InProgress);
        // Unknown future statuses must not be treated as terminal.
        assert_eq!(map_status("SomethingNew", None), PollStatus::InProgress);
    }

    #[test]
    fn test_document_selection_follows_platform() {
        let channel = AwsCliChannel::from_config(&AwsConfig::default());
        assert_eq!(channel.document_for(Platform::Linux), "AWS-RunShellScript");
        assert_eq!(
            channel.document_for(Platform::Windows),
            "AWS-RunPowerShellScript"
        );
    }

    #[test]
    fn test_send_command_response_decodes() {
        let raw = r#"{"Command": {"CommandId": "abc-123", "Status": "Pending"}}"#;
        let response: SendCommandResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.command.command_id, "abc-123");
    }

    #[test]
    fn test_invocation_response_decodes_with_missing_output() {
        let raw = r#"{"Status": "Failed", "StatusDetails": "Failed"}"#;
        let response: InvocationResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.status, "Failed");
        assert_eq!(response.stdout, "");
        assert_eq!(response.response_code, None);
    }
}
