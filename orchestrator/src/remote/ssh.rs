use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};
use async_trait::async_trait;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use super::{CommandOutput, RemoteExecutor};
use crate::errors::RemoteError;

const SSH_PORT: u16 = 22;

/// Runs commands over SSH with key authentication. Every call opens a fresh
/// session and the session ends with the call.
pub struct SshExecutor {
    user: String,
    identity_file: String,
    connect_timeout: Duration,
}

impl SshExecutor {
    /// Without `identity_file` the user's `~/.ssh/id_rsa` is used
    pub fn new(user: String, identity_file: Option<String>, connect_timeout: Duration) -> Self {
        let identity_file = identity_file.unwrap_or_else(default_identity_file);
        Self {
            user,
            identity_file,
            connect_timeout,
        }
    }

    async fn auth_method(&self, host: &str) -> Result<AuthMethod, RemoteError> {
        if self.identity_file.ends_with(".pub") {
            return Err(RemoteError::ConnectionFailed {
                host: host.to_string(),
                reason: format!(
                    "SSH key path should point to private key, not public key: {}",
                    self.identity_file
                ),
            });
        }
        let key = fs::read_to_string(&self.identity_file)
            .await
            .map_err(|e| RemoteError::ConnectionFailed {
                host: host.to_string(),
                reason: format!("Failed to read SSH key from {}: {}", self.identity_file, e),
            })?;
        Ok(AuthMethod::with_key(&key, None))
    }

    async fn connect(&self, host: &str) -> Result<Client, RemoteError> {
        debug!("Establishing SSH connection to {}@{}", self.user, host);
        let auth = self.auth_method(host).await?;

        tokio::time::timeout(
            self.connect_timeout,
            Client::connect(
                (host, SSH_PORT),
                &self.user,
                auth,
                ServerCheckMethod::NoCheck,
            ),
        )
        .await
        .map_err(|_| RemoteError::ConnectionFailed {
            host: host.to_string(),
            reason: format!(
                "SSH connection timed out after {}s",
                self.connect_timeout.as_secs()
            ),
        })?
        .map_err(|e| connect_error(host, e))
    }

    async fn execute(&self, host: &str, command: &str) -> Result<CommandOutput, RemoteError> {
        let client = self.connect(host).await?;
        let result = client
            .execute(command)
            .await
            .map_err(|e| RemoteError::Transport {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            exit_code: i32::try_from(result.exit_status).unwrap_or(-1),
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }
}

fn default_identity_file() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
    format!("{}/.ssh/id_rsa", home)
}

fn connect_error(host: &str, err: async_ssh2_tokio::Error) -> RemoteError {
    warn!("SSH session to {} failed: {}", host, err);
    match err {
        async_ssh2_tokio::Error::KeyAuthFailed | async_ssh2_tokio::Error::PasswordWrong => {
            RemoteError::AuthenticationFailed {
                host: host.to_string(),
            }
        }
        other => RemoteError::ConnectionFailed {
            host: host.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        debug!("Executing command on {}: {}", host, command);

        let output = tokio::time::timeout(timeout, self.execute(host, command))
            .await
            .map_err(|_| RemoteError::Timeout {
                host: host.to_string(),
                seconds: timeout.as_secs(),
            })??;

        debug!(
            "Command completed on {} with exit code {}, stdout: {} chars, stderr: {} chars",
            host,
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_identity_is_users_rsa_key() {
        let exec = SshExecutor::new("root".to_string(), None, Duration::from_secs(7));
        assert!(exec.identity_file.ends_with("/.ssh/id_rsa"));

        let exec = SshExecutor::new(
            "root".to_string(),
            Some("/etc/orchestrator/id_ed25519".to_string()),
            Duration::from_secs(7),
        );
        assert_eq!(exec.identity_file, "/etc/orchestrator/id_ed25519");
    }

    #[tokio::test]
    async fn public_key_path_is_rejected_before_connecting() {
        let mut key = tempfile::Builder::new().suffix(".pub").tempfile().unwrap();
        writeln!(key, "ssh-ed25519 AAAA test").unwrap();
        let exec = SshExecutor::new(
            "root".to_string(),
            Some(key.path().to_string_lossy().to_string()),
            Duration::from_secs(1),
        );

        let err = exec
            .run("cel01", "imageinfo -ver", Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            RemoteError::ConnectionFailed { host, reason } => {
                assert_eq!(host, "cel01");
                assert!(reason.contains("not public key"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_key_file_is_connection_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let exec = SshExecutor::new(
            "root".to_string(),
            Some(dir.path().join("id_rsa").to_string_lossy().to_string()),
            Duration::from_secs(1),
        );

        let err = exec
            .run("cel01", "imageinfo -ver", Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            RemoteError::ConnectionFailed { reason, .. } => {
                assert!(reason.contains("Failed to read SSH key"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
