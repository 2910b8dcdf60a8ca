//! JSON command interface for account operations.
//!
//! A companion process (typically a GUI) sends one JSON request and reads
//! one JSON response: `{"method": ..., "args": {...}}` in,
//! `{"status": "ok"|"error", "message": ...}` out. Account operations
//! live here rather than in the CLI so credentials never appear in argv.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::remote::RemoteStore;

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub method: String,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CommandResult {
    pub status: Status,
    pub message: String,
}

impl CommandResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
        }
    }
}

/// Execute one parsed command.
pub async fn execute(remote: &dyn RemoteStore, request: &CommandRequest) -> CommandResult {
    match request.method.as_str() {
        "login" => login(remote, &request.args).await,
        "createAccount" => create_account(remote, &request.args).await,
        other => CommandResult::error(format!("Invalid command method: {other}")),
    }
}

/// Execute a raw JSON request, returning a JSON response string.
pub async fn execute_json(remote: &dyn RemoteStore, input: &str) -> String {
    let result = match serde_json::from_str::<CommandRequest>(input) {
        Ok(request) => execute(remote, &request).await,
        Err(e) => CommandResult::error(format!("Invalid command request: {e}")),
    };
    // CommandResult serialization cannot fail; the fallback is for form.
    serde_json::to_string(&result)
        .unwrap_or_else(|_| r#"{"status":"error","message":"serialization failure"}"#.to_string())
}

async fn login(remote: &dyn RemoteStore, args: &HashMap<String, String>) -> CommandResult {
    let (Some(email), Some(password)) = (args.get("email"), args.get("password")) else {
        return CommandResult::error("login requires email and password");
    };
    let encryption_key = args.get("encryptionKey").map(String::as_str);

    match remote.login(email, password, encryption_key).await {
        Ok(()) => CommandResult::ok("Logged in"),
        Err(e) => {
            tracing::warn!(error = %e, "Login failed");
            CommandResult::error(e.to_string())
        }
    }
}

async fn create_account(
    remote: &dyn RemoteStore,
    args: &HashMap<String, String>,
) -> CommandResult {
    let (Some(email), Some(password)) = (args.get("email"), args.get("password")) else {
        return CommandResult::error("createAccount requires email and password");
    };

    match remote.create_account(email, password).await {
        Ok(()) => CommandResult::ok("Account created"),
        Err(e) => {
            tracing::warn!(error = %e, "Account creation failed");
            CommandResult::error(e.to_string())
        }
    }
}
