//! Vendor patch tool driver
//!
//! The driver owns one patchmgr run on a launch node:
//! IDLE -> LAUNCHED -> MONITORING -> COMPLETE | TIMED_OUT.
//! It writes the node list, launches the tool in the background, polls the
//! console log for the exit status and runs the cleanup sub-command.

pub mod command;
mod progress;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, instrument, warn};

use crate::config::RunSettings;
use crate::constants::patchmgr::{EXIT_STATUS_MARKER, SESSION_CHECK};
use crate::errors::{ErrorCode, PatchError};
use crate::model::TargetClass;
use crate::remote::SharedExecutor;

pub use command::{PatchCommand, RunArtifacts};
use progress::ProgressWatcher;

/// Polls with no console log before the run is declared broken
const MISSING_CONSOLE_POLLS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Launched,
    Monitoring,
    Complete,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Succeeded,
    Failed { code: ErrorCode, detail: String },
    TimedOut { code: ErrorCode, detail: String },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Succeeded)
    }
}

pub struct PatchToolDriver {
    executor: SharedExecutor,
    settings: Arc<RunSettings>,
    launch_node: String,
    command: PatchCommand,
    artifacts: RunArtifacts,
    state: DriverState,
    last_progress: Option<String>,
}

impl PatchToolDriver {
    pub fn new(
        executor: SharedExecutor,
        settings: Arc<RunSettings>,
        launch_node: String,
        command: PatchCommand,
        artifacts: RunArtifacts,
    ) -> Self {
        Self {
            executor,
            settings,
            launch_node,
            command,
            artifacts,
            state: DriverState::Idle,
            last_progress: None,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn artifacts(&self) -> &RunArtifacts {
        &self.artifacts
    }

    pub fn launch_node(&self) -> &str {
        &self.launch_node
    }

    pub fn last_progress(&self) -> Option<&str> {
        self.last_progress.as_deref()
    }

    async fn exec(&self, command: &str) -> Result<crate::remote::CommandOutput, PatchError> {
        self.executor
            .run(&self.launch_node, command, self.settings.command_timeout)
            .await
            .map_err(|e| {
                PatchError::new(
                    self.command_failed_code(),
                    format!("Launch node {} unavailable: {}", self.launch_node, e),
                )
            })
    }

    fn command_failed_code(&self) -> ErrorCode {
        match self.command.class {
            TargetClass::GuestVm => ErrorCode::DOMU_PATCHMGR_COMMAND_FAILED,
            _ => ErrorCode::PATCHMGR_COMMAND_FAILED,
        }
    }

    /// A previous attempt for this request left a console log behind
    pub async fn console_log_exists(&self) -> Result<bool, PatchError> {
        let out = self
            .exec(&format!("test -f {}", self.artifacts.console_log))
            .await?;
        Ok(out.success())
    }

    pub async fn session_active(&self) -> Result<bool, PatchError> {
        let out = self.exec(SESSION_CHECK).await?;
        Ok(out.success() && out.first_line().is_some())
    }

    pub async fn write_node_list(&self, nodes: &[String]) -> Result<(), PatchError> {
        let out = self
            .exec(&command::node_list_command(&self.artifacts, nodes))
            .await?;
        if !out.success() {
            return Err(PatchError::new(
                self.command_failed_code(),
                format!(
                    "Unable to write node list {} on {}: {}",
                    self.artifacts.node_list,
                    self.launch_node,
                    out.stderr.trim()
                ),
            ));
        }
        Ok(())
    }

    /// Write the node list, check no other session runs and start the tool
    #[instrument(skip(self, nodes), fields(launch = %self.launch_node, class = %self.command.class, task = %self.command.task))]
    pub async fn launch(&mut self, nodes: &[String]) -> Result<(), PatchError> {
        let invocation = self.command.invocation(&self.artifacts).ok_or_else(|| {
            PatchError::new(
                ErrorCode::INVALID_PATCH_OPTION,
                format!(
                    "{} does not run patchmgr for {}",
                    self.command.task, self.command.class
                ),
            )
        })?;

        if self.session_active().await? {
            return Err(PatchError::new(
                ErrorCode::PATCHMGR_SESSION_ALREADY_EXIST,
                format!(
                    "A patchmgr session is already running on {}; wait for it to finish before retrying",
                    self.launch_node
                ),
            ));
        }

        self.write_node_list(nodes).await?;

        info!("Launching patchmgr on {}: {}", self.launch_node, invocation);
        let out = self.exec(&invocation).await?;
        if !out.success() {
            return Err(PatchError::new(
                self.command_failed_code(),
                format!(
                    "patchmgr could not be started on {} (exit {}): {}",
                    self.launch_node,
                    out.exit_code,
                    out.stderr.trim()
                ),
            ));
        }

        self.state = DriverState::Launched;
        Ok(())
    }

    /// Poll the console log until an exit status shows up or `timeout` passes
    pub async fn wait_for_completion(&mut self, timeout: Duration) -> ToolOutcome {
        self.state = DriverState::Monitoring;
        let watcher = ProgressWatcher::spawn(
            self.executor.clone(),
            self.launch_node.clone(),
            self.artifacts.console_log.clone(),
            self.settings.patchmgr_poll_interval,
            self.settings.command_timeout,
        );

        let deadline = Instant::now() + timeout;
        let grep = format!(
            "grep -i \"{}\" {}",
            EXIT_STATUS_MARKER, self.artifacts.console_log
        );
        let mut missing_polls = 0;

        let outcome = loop {
            match self
                .executor
                .run(&self.launch_node, &grep, self.settings.command_timeout)
                .await
            {
                Ok(out) if out.success() => {
                    if let Some(status) = command::parse_exit_status(&out.stdout) {
                        self.state = DriverState::Complete;
                        break if status == 0 {
                            info!("patchmgr on {} finished successfully", self.launch_node);
                            ToolOutcome::Succeeded
                        } else {
                            error!("patchmgr on {} exited with status {}", self.launch_node, status);
                            ToolOutcome::Failed {
                                code: self.command_failed_code(),
                                detail: format!(
                                    "patchmgr exited with status {}; see {}",
                                    status, self.artifacts.console_log
                                ),
                            }
                        };
                    }
                    missing_polls = 0;
                }
                Ok(out) if out.exit_code >= 2 => {
                    missing_polls += 1;
                    warn!(
                        "Console log {} not found on {} ({} polls)",
                        self.artifacts.console_log, self.launch_node, missing_polls
                    );
                    if missing_polls >= MISSING_CONSOLE_POLLS {
                        self.state = DriverState::Complete;
                        break ToolOutcome::Failed {
                            code: ErrorCode::PATCHMGR_CONSOLE_LOG_MISSING,
                            detail: format!(
                                "Console log {} never appeared on {}",
                                self.artifacts.console_log, self.launch_node
                            ),
                        };
                    }
                }
                Ok(_) => missing_polls = 0,
                Err(e) => warn!("Polling patchmgr on {} failed: {}", self.launch_node, e),
            }

            if Instant::now() >= deadline {
                self.state = DriverState::TimedOut;
                error!(
                    "patchmgr on {} did not finish within {:?}",
                    self.launch_node, timeout
                );
                break ToolOutcome::TimedOut {
                    code: ErrorCode::EXADATA_PATCHMGR_CONSOLE_READ_TIMEOUT_ERROR,
                    detail: format!(
                        "patchmgr did not report an exit status within {}s; see {}",
                        timeout.as_secs(),
                        self.artifacts.console_log
                    ),
                };
            }
            sleep(self.settings.patchmgr_poll_interval).await;
        };

        self.last_progress = watcher.last_line();
        outcome
    }

    /// Launch and monitor in one step
    pub async fn run(&mut self, nodes: &[String], timeout: Duration) -> ToolOutcome {
        match self.launch(nodes).await {
            Ok(()) => self.wait_for_completion(timeout).await,
            Err(e) => ToolOutcome::Failed {
                code: e.code,
                detail: e.message,
            },
        }
    }

    /// Pick up a run a previous attempt already launched
    pub async fn resume(&mut self, timeout: Duration) -> ToolOutcome {
        info!(
            "Resuming patchmgr monitoring on {} from {}",
            self.launch_node, self.artifacts.console_log
        );
        self.wait_for_completion(timeout).await
    }

    /// Run the cleanup sub-command and drop the node list. The failure code
    /// depends on whether the patch itself succeeded.
    pub async fn cleanup(&self, patch_succeeded: bool) -> Result<(), PatchError> {
        let Some(cleanup) = self.command.cleanup(&self.artifacts) else {
            return Ok(());
        };
        let attempts = match self.command.class {
            TargetClass::StorageNode => self.settings.cleanup_retries.max(1),
            _ => 1,
        };

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.exec(&cleanup).await {
                Ok(out) if out.success() => {
                    info!("patchmgr cleanup on {} succeeded", self.launch_node);
                    let _ = self
                        .exec(&format!("rm -f {}", self.artifacts.node_list))
                        .await;
                    return Ok(());
                }
                Ok(out) => last_error = format!("exit {}: {}", out.exit_code, out.stderr.trim()),
                Err(e) => last_error = e.message,
            }
            warn!(
                "patchmgr cleanup attempt {}/{} on {} failed: {}",
                attempt, attempts, self.launch_node, last_error
            );
            if attempt < attempts {
                sleep(self.settings.cleanup_retry_delay).await;
            }
        }

        let code = match (patch_succeeded, self.command.class) {
            (false, _) => ErrorCode::PATCHMGR_CLEANUP_FAILED_AFTER_PATCH_FAILURE,
            (true, TargetClass::StorageNode) => ErrorCode::PATCH_CELL_CLEANUP_FAILED,
            (true, _) => ErrorCode::PATCHMGR_CLEANUP_FAILED,
        };
        Err(PatchError::new(
            code,
            format!(
                "patchmgr cleanup failed on {} after {} attempts: {}",
                self.launch_node, attempts, last_error
            ),
        ))
    }
}
