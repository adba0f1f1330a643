use serde::{Deserialize, Serialize};

// === REQUEST STRUCTURES ===

fn default_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// === RESPONSE STRUCTURES ===

/// Outcome of one command. `success` says the command ran to completion;
/// its own result is in `exit_code`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn completed(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            success: true,
            exit_code: Some(exit_code),
            stdout,
            stderr,
            ..Default::default()
        }
    }

    pub fn timed_out(stdout: String, stderr: String) -> Self {
        Self {
            success: false,
            stdout,
            stderr,
            timed_out: true,
            error: Some("command timed out".to_string()),
            ..Default::default()
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub hostname: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
