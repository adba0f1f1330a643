//! Remote command execution
//!
//! A `RemoteExecutor` opens a session to one host, runs one command with a
//! timeout and hands back exit status plus captured output. Two transports are
//! provided: the system `ssh` client and the HTTP command agent.

pub mod agent;
pub mod ssh;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Cluster, RunSettings, Transport};
use crate::errors::RemoteError;

pub use agent::AgentExecutor;
pub use ssh::SshExecutor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-empty trimmed stdout lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().map(str::trim).filter(|l| !l.is_empty())
    }

    pub fn first_line(&self) -> Option<&str> {
        self.lines().next()
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync + 'static {
    /// Run `command` on `host`. A non-zero exit is a normal `Ok` result; only
    /// failures to reach the host or to finish in time are errors.
    async fn run(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError>;
}

pub type SharedExecutor = Arc<dyn RemoteExecutor>;

/// Build the executor configured for a cluster
pub fn executor_for(cluster: &Cluster, settings: &RunSettings) -> SharedExecutor {
    match cluster.settings.transport {
        Transport::Ssh => Arc::new(SshExecutor::new(
            cluster.settings.ssh_user.clone(),
            cluster.settings.ssh_identity_file.clone(),
            settings.connect_timeout,
        )),
        Transport::Agent => Arc::new(AgentExecutor::new(
            cluster.settings.agent_port,
            cluster.settings.api_key.clone().unwrap_or_default(),
        )),
    }
}
