//! Hooks into collaborators outside the patch flow
//!
//! Disk encryption, VM backup and provisioning workflows only need two things
//! from a patch run: a yes/no answer for a named condition over a node set, and
//! a marker file made present or absent on a host.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{ErrorCode, PatchError};
use crate::remote::SharedExecutor;

#[async_trait]
pub trait PatchCallbacks: Send + Sync {
    async fn condition_holds(&self, condition: &str, nodes: &[String]) -> bool;

    async fn ensure_marker(&self, host: &str, marker: &str, present: bool) -> Result<(), PatchError>;
}

/// Every condition holds and markers are not tracked
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

#[async_trait]
impl PatchCallbacks for NoopCallbacks {
    async fn condition_holds(&self, condition: &str, nodes: &[String]) -> bool {
        debug!("Condition '{}' assumed true for {} nodes", condition, nodes.len());
        true
    }

    async fn ensure_marker(&self, _host: &str, _marker: &str, _present: bool) -> Result<(), PatchError> {
        Ok(())
    }
}

/// Markers kept as files under a directory on each host
pub struct MarkerFileCallbacks {
    executor: SharedExecutor,
    marker_dir: String,
    timeout: Duration,
}

impl MarkerFileCallbacks {
    pub fn new(executor: SharedExecutor, marker_dir: impl Into<String>, timeout: Duration) -> Self {
        Self {
            executor,
            marker_dir: marker_dir.into(),
            timeout,
        }
    }

    fn path(&self, marker: &str) -> String {
        format!("{}/{}", self.marker_dir.trim_end_matches('/'), marker)
    }
}

#[async_trait]
impl PatchCallbacks for MarkerFileCallbacks {
    async fn condition_holds(&self, _condition: &str, _nodes: &[String]) -> bool {
        true
    }

    async fn ensure_marker(&self, host: &str, marker: &str, present: bool) -> Result<(), PatchError> {
        let path = self.path(marker);
        let command = if present {
            format!("mkdir -p {} && touch {}", self.marker_dir, path)
        } else {
            format!("rm -f {}", path)
        };
        match self.executor.run(host, &command, self.timeout).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => {
                warn!("Marker update on {} exited with {}", host, out.exit_code);
                Err(PatchError::new(
                    ErrorCode::PATCH_OPERATION_FAILED,
                    format!("Unable to update marker {} on {}: {}", path, host, out.stderr.trim()),
                ))
            }
            Err(e) => Err(PatchError::new(
                ErrorCode::PATCH_OPERATION_FAILED,
                format!("Unable to update marker {} on {}: {}", path, host, e),
            )),
        }
    }
}
