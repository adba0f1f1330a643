//! Database record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ErrorCode;
use crate::model::{NodeProgress, PatchRequest, PatchResult, RunStage, RunStatus};

/// hypervisor -> guest VMs that were running before a shutdown
pub type VmInventory = BTreeMap<String, Vec<String>>;

/// Persisted state of one patch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRunState {
    pub request_id: String,
    pub cluster: String,
    pub request: PatchRequest,
    pub stage: Option<RunStage>,
    pub status: RunStatus,
    pub error_code: Option<ErrorCode>,
    pub suggestion: Option<String>,
    pub console_log_path: Option<String>,
    pub nodes: Vec<NodeProgress>,
    pub result: Option<PatchResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// VM inventory a run left for another run to restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVmRestart {
    pub request_id: String,
    pub inventory: VmInventory,
}
