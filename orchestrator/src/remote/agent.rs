use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{CommandOutput, RemoteExecutor};
use crate::constants::agent::{EXECUTE_PATH, HTTP_GRACE};
use crate::errors::RemoteError;

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    command: &'a str,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    success: bool,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    timed_out: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Runs commands through the HTTP command agent installed on each host
pub struct AgentExecutor {
    client: Client,
    port: u16,
    api_key: String,
}

impl AgentExecutor {
    pub fn new(port: u16, api_key: String) -> Self {
        Self {
            client: Client::new(),
            port,
            api_key,
        }
    }

    fn url(&self, host: &str) -> String {
        if host.contains(':') {
            format!("http://{}{}", host, EXECUTE_PATH)
        } else {
            format!("http://{}:{}{}", host, self.port, EXECUTE_PATH)
        }
    }
}

#[async_trait]
impl RemoteExecutor for AgentExecutor {
    async fn run(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        let url = self.url(host);
        debug!("Executing command via agent {}: {}", url, command);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(timeout + HTTP_GRACE)
            .json(&ExecuteRequest {
                command,
                timeout_secs: timeout.as_secs().max(1),
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteError::Timeout {
                        host: host.to_string(),
                        seconds: timeout.as_secs(),
                    }
                } else {
                    RemoteError::ConnectionFailed {
                        host: host.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(RemoteError::AuthenticationFailed {
                    host: host.to_string(),
                })
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                warn!("Agent on {} answered {}: {}", host, status, body);
                return Err(RemoteError::Transport {
                    host: host.to_string(),
                    reason: format!("agent returned {}: {}", status, body),
                });
            }
            _ => {}
        }

        let result: ExecuteResponse = response.json().await.map_err(|e| RemoteError::Transport {
            host: host.to_string(),
            reason: format!("failed to parse agent response: {}", e),
        })?;

        if result.timed_out {
            return Err(RemoteError::Timeout {
                host: host.to_string(),
                seconds: timeout.as_secs(),
            });
        }

        match result.exit_code {
            Some(exit_code) => Ok(CommandOutput {
                exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            }),
            None if !result.success => Err(RemoteError::Transport {
                host: host.to_string(),
                reason: result
                    .error
                    .unwrap_or_else(|| "agent could not run the command".to_string()),
            }),
            None => Ok(CommandOutput {
                exit_code: 0,
                stdout: result.stdout,
                stderr: result.stderr,
            }),
        }
    }
}
