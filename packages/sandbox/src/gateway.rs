// ABOUTME: Command execution gateway between interactive front ends and the session manager
// ABOUTME: Runs commands on a detached task and reports results or failures in a structured shape

use crate::manager::{CommandResult, SessionError, SessionManager};
use crate::profile::Owner;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub output: String,
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn completed(result: CommandResult) -> Self {
        Self {
            success: true,
            output: result.output,
            exit_code: Some(result.exit_code),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            exit_code: None,
            error: Some(message.into()),
        }
    }
}

impl From<SessionError> for CommandResponse {
    fn from(error: SessionError) -> Self {
        Self::failed(error.to_string())
    }
}

/// Frames sent back over the terminal websocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalMessage {
    TerminalOutput { output: String, exit_code: i64 },
    TerminalError { error: String },
}

impl From<CommandResponse> for TerminalMessage {
    fn from(response: CommandResponse) -> Self {
        match (response.success, response.exit_code) {
            (true, Some(exit_code)) => Self::TerminalOutput {
                output: response.output,
                exit_code,
            },
            _ => Self::TerminalError {
                error: response
                    .error
                    .unwrap_or_else(|| "command failed".to_string()),
            },
        }
    }
}

#[derive(Clone)]
pub struct CommandGateway {
    manager: SessionManager,
}

impl CommandGateway {
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Execute a command for `owner`.
    ///
    /// The manager call runs on its own task, so a caller that goes away
    /// mid-request does not cancel a half-finished create or exec.
    pub async fn run(
        &self,
        owner: Owner,
        command: String,
        working_directory: Option<String>,
    ) -> CommandResponse {
        let manager = self.manager.clone();
        let owner_id = owner.id.clone();

        let task = tokio::spawn(async move {
            manager
                .execute(&owner, &command, working_directory.as_deref())
                .await
        });

        match task.await {
            Ok(Ok(result)) => CommandResponse::completed(result),
            Ok(Err(e)) => {
                warn!(owner = %owner_id, "Command failed: {}", e);
                e.into()
            }
            Err(e) => {
                error!(owner = %owner_id, "Command task aborted: {}", e);
                CommandResponse::failed(format!("command task aborted: {}", e))
            }
        }
    }
}
