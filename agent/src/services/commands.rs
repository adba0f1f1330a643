use anyhow::{anyhow, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

use crate::types::CommandResponse;

/// Upper bound on a single command; the longest patch tool polls stay far below
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// Run `command` through `sh -c`. A non-zero exit is a completed command;
/// only spawn failures are errors. On timeout the child is killed and
/// whatever output it produced so far is returned.
pub async fn execute_shell_command(command: &str, timeout: Duration) -> Result<CommandResponse> {
    debug!("Executing command: {}", command);
    let timeout = timeout.min(MAX_TIMEOUT);

    let mut child = AsyncCommand::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn shell: {}", e))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("Child stdout was not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("Child stderr was not captured"))?;

    // Drain both pipes while waiting so a chatty command cannot block on a full pipe
    let stdout_handle = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf).await;
        buf
    });
    let stderr_handle = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => Some(status.map_err(|e| anyhow!("Error waiting for command: {}", e))?),
        Err(_) => {
            warn!("Command timed out after {}s: {}", timeout.as_secs(), command);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill timed out command: {}", e);
            }
            None
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_handle.await.unwrap_or_default()).to_string();
    let stderr = String::from_utf8_lossy(&stderr_handle.await.unwrap_or_default()).to_string();

    match status {
        Some(status) => {
            let exit_code = status.code().unwrap_or(-1);
            info!("Command finished with exit code {}", exit_code);
            Ok(CommandResponse::completed(exit_code, stdout, stderr))
        }
        None => Ok(CommandResponse::timed_out(stdout, stderr)),
    }
}
