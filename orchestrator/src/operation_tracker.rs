//! Cluster lock tracking for patch runs
//!
//! Only one run may act on a (cluster, target class) pair at a time. Two
//! storage runs on one cluster would fight over the same grid disks and the
//! same patchmgr session, so the second request is refused up front.
//!
//! # Usage
//!
//! ```ignore
//! let key = OperationKey::new("cluster-a", TargetClass::StorageNode);
//! tracker.try_start_operation(&key, "PATCH", &request_id).await?;
//!
//! // Run the handler...
//!
//! tracker.finish_operation(&key).await;
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::errors::{ErrorCode, PatchError};
use crate::model::TargetClass;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OperationKey {
    pub cluster: String,
    pub target: TargetClass,
}

impl OperationKey {
    pub fn new(cluster: impl Into<String>, target: TargetClass) -> Self {
        Self {
            cluster: cluster.into(),
            target,
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.target)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveOperation {
    pub cluster: String,
    pub target: TargetClass,
    pub task: String,
    pub request_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStatus {
    pub active: Vec<ActiveOperation>,
    pub total_active: usize,
}

#[derive(Clone, Default)]
pub struct OperationTracker {
    active_operations: Arc<RwLock<HashMap<OperationKey, ActiveOperation>>>,
}

fn format_elapsed(started_at: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(started_at);
    if duration.num_hours() > 0 {
        format!("{}h {}m", duration.num_hours(), duration.num_minutes() % 60)
    } else {
        format!("{}m", duration.num_minutes())
    }
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `key`. A busy key is reported with the code the
    /// upstream control plane expects for lock contention.
    #[instrument(skip(self), fields(key = %key, task = %task))]
    pub async fn try_start_operation(
        &self,
        key: &OperationKey,
        task: &str,
        request_id: &str,
    ) -> Result<(), PatchError> {
        let mut active = self.active_operations.write().await;

        if let Some(current) = active.get(key) {
            return Err(PatchError::new(
                ErrorCode::INFRA_PATCHING_SYSTEM_BUSY_LOCK_NOT_ACQUIRED,
                format!(
                    "{} is busy with {} request {} (started {} ago); retry after it completes",
                    key,
                    current.task,
                    current.request_id,
                    format_elapsed(current.started_at)
                ),
            ));
        }

        active.insert(
            key.clone(),
            ActiveOperation {
                cluster: key.cluster.clone(),
                target: key.target,
                task: task.to_string(),
                request_id: request_id.to_string(),
                started_at: Utc::now(),
            },
        );
        info!("Acquired lock on {} for {} ({})", key, task, request_id);
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn finish_operation(&self, key: &OperationKey) {
        let mut active = self.active_operations.write().await;
        if let Some(op) = active.remove(key) {
            info!(
                "Released lock on {} after {} ({})",
                key,
                format_elapsed(op.started_at),
                op.request_id
            );
        }
    }

    pub async fn get_operation_status(&self) -> OperationStatus {
        let active = self.active_operations.read().await;
        let mut operations: Vec<ActiveOperation> = active.values().cloned().collect();
        operations.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        OperationStatus {
            total_active: operations.len(),
            active: operations,
        }
    }

    pub async fn is_busy(&self, key: &OperationKey) -> bool {
        self.active_operations.read().await.contains_key(key)
    }

    /// Drop locks held longer than `max_hours`. A run that crashed without
    /// releasing its lock would otherwise block the target forever.
    pub async fn cleanup_old_operations(&self, max_hours: i64) -> u32 {
        let mut active = self.active_operations.write().await;
        let cutoff = Utc::now() - chrono::Duration::hours(max_hours);
        let initial_count = active.len();

        active.retain(|key, operation| {
            let keep = operation.started_at > cutoff;
            if !keep {
                warn!(
                    "Released stale lock on {} held by {} since {}",
                    key, operation.request_id, operation.started_at
                );
            }
            keep
        });

        let cleaned = initial_count - active.len();
        if cleaned > 0 {
            warn!("Removed {} stale locks older than {}h", cleaned, max_hours);
        }
        cleaned as u32
    }
}
