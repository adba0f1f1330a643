//! Request, node and result types shared by every stage of a patch run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::{ErrorCode, PatchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    PrereqCheck,
    Patch,
    Rollback,
    RollbackPrereqCheck,
    Postcheck,
    Oneoff,
    OneoffV2,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::PrereqCheck => "PREREQ_CHECK",
            TaskKind::Patch => "PATCH",
            TaskKind::Rollback => "ROLLBACK",
            TaskKind::RollbackPrereqCheck => "ROLLBACK_PREREQ_CHECK",
            TaskKind::Postcheck => "POSTCHECK",
            TaskKind::Oneoff => "ONEOFF",
            TaskKind::OneoffV2 => "ONEOFF_V2",
        }
    }

    pub fn is_prereq(&self) -> bool {
        matches!(self, TaskKind::PrereqCheck | TaskKind::RollbackPrereqCheck)
    }

    pub fn is_rollback(&self) -> bool {
        matches!(self, TaskKind::Rollback | TaskKind::RollbackPrereqCheck)
    }

    /// Task kinds that change the installed image
    pub fn mutates_nodes(&self) -> bool {
        matches!(self, TaskKind::Patch | TaskKind::Rollback)
    }

    /// Task kinds that go through the vendor patch tool
    pub fn uses_patch_tool(&self) -> bool {
        matches!(
            self,
            TaskKind::PrereqCheck
                | TaskKind::Patch
                | TaskKind::Rollback
                | TaskKind::RollbackPrereqCheck
        )
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetClass {
    Hypervisor,
    GuestVm,
    StorageNode,
    FabricSwitch,
}

impl TargetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetClass::Hypervisor => "HYPERVISOR",
            TargetClass::GuestVm => "GUEST_VM",
            TargetClass::StorageNode => "STORAGE_NODE",
            TargetClass::FabricSwitch => "FABRIC_SWITCH",
        }
    }

    /// Short form used in artifact file names
    pub fn artifact_tag(&self) -> &'static str {
        match self {
            TargetClass::Hypervisor => "dom0",
            TargetClass::GuestVm => "domu",
            TargetClass::StorageNode => "cell",
            TargetClass::FabricSwitch => "switch",
        }
    }
}

impl fmt::Display for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HYPERVISOR" => Ok(TargetClass::Hypervisor),
            "GUEST_VM" => Ok(TargetClass::GuestVm),
            "STORAGE_NODE" => Ok(TargetClass::StorageNode),
            "FABRIC_SWITCH" => Ok(TargetClass::FabricSwitch),
            other => Err(format!("unknown target class '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStyle {
    Rolling,
    NonRolling,
    #[default]
    Auto,
}

impl OperationStyle {
    /// AUTO resolves to rolling: it keeps the cluster serving while nodes are patched.
    pub fn resolve(self) -> OperationStyle {
        match self {
            OperationStyle::Auto => OperationStyle::Rolling,
            other => other,
        }
    }

    pub fn is_rolling(self) -> bool {
        self.resolve() == OperationStyle::Rolling
    }
}

/// Script and arguments for ONEOFF_V2 requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneOffSpec {
    pub script: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Immutable description of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub cluster: String,
    pub task: TaskKind,
    pub target: TargetClass,
    #[serde(default)]
    pub style: OperationStyle,
    #[serde(default)]
    pub node_limit: Option<usize>,
    #[serde(default)]
    pub include_nodes: Vec<String>,
    #[serde(default)]
    pub target_version: String,
    #[serde(default)]
    pub oneoff: Option<OneOffSpec>,
}

impl PatchRequest {
    /// Reject option combinations that cannot be executed
    pub fn validate(&self) -> Result<(), PatchError> {
        if self.node_limit.is_some() && self.task != TaskKind::Patch {
            return Err(PatchError::new(
                ErrorCode::INVALID_PATCH_OPTION,
                format!("A node count limit is only supported for PATCH, not {}", self.task),
            ));
        }
        if self.node_limit == Some(0) {
            return Err(PatchError::new(
                ErrorCode::INVALID_PATCH_OPTION,
                "Node count limit must be greater than zero",
            ));
        }
        if self.target == TargetClass::FabricSwitch && self.style == OperationStyle::NonRolling {
            return Err(PatchError::new(
                ErrorCode::INVALID_PATCH_OPTION,
                "Fabric switches can only be patched in rolling mode",
            ));
        }
        if self.task.uses_patch_tool() && self.target_version.trim().is_empty() {
            return Err(PatchError::new(
                ErrorCode::INVALID_TARGET_VERSION,
                format!("{} requires a target version", self.task),
            ));
        }
        if self.task == TaskKind::OneoffV2 && self.oneoff.is_none() {
            return Err(PatchError::new(
                ErrorCode::INVALID_PATCH_OPTION,
                "ONEOFF_V2 requires a script in the request",
            ));
        }
        Ok(())
    }

    /// A subset was requested when the node set is narrowed by count or by name
    pub fn is_subset(&self) -> bool {
        self.node_limit.is_some() || !self.include_nodes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub hostname: String,
    pub class: TargetClass,
    pub version: String,
    pub overlay_version: Option<String>,
    pub reachability: Reachability,
    pub services: BTreeMap<String, bool>,
}

impl NodeRecord {
    pub fn services_running(&self) -> bool {
        self.services.values().all(|running| *running)
    }
}

/// Partition of the candidate set. Disjoint, and the union is the candidate set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub to_patch: Vec<String>,
    pub already_at_version: Vec<String>,
    pub ineligible: Vec<String>,
}

impl EligibilityResult {
    pub fn len(&self) -> usize {
        self.to_patch.len() + self.already_at_version.len() + self.ineligible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Failed,
    Killed,
}

/// Result of one fan-out work item. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub node: String,
    pub status: OutcomeStatus,
    pub code: Option<ErrorCode>,
    pub diagnostic: Option<String>,
}

impl TaskOutcome {
    pub fn ok(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            status: OutcomeStatus::Ok,
            code: None,
            diagnostic: None,
        }
    }

    pub fn failed(node: impl Into<String>, code: Option<ErrorCode>, diagnostic: String) -> Self {
        Self {
            node: node.into(),
            status: OutcomeStatus::Failed,
            code,
            diagnostic: Some(diagnostic),
        }
    }

    pub fn killed(node: impl Into<String>, diagnostic: String) -> Self {
        Self {
            node: node.into(),
            status: OutcomeStatus::Killed,
            code: Some(ErrorCode::PATCH_REQUEST_TIMEOUT),
            diagnostic: Some(diagnostic),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStage {
    GatherData,
    PrePatch,
    PatchMgr,
    PostPatch,
    Cleanup,
    Postcheck,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::GatherData => "GATHER_DATA",
            RunStage::PrePatch => "PRE_PATCH",
            RunStage::PatchMgr => "PATCH_MGR",
            RunStage::PostPatch => "POST_PATCH",
            RunStage::Cleanup => "CLEANUP",
            RunStage::Postcheck => "POSTCHECK",
        }
    }
}

impl FromStr for RunStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GATHER_DATA" => Ok(RunStage::GatherData),
            "PRE_PATCH" => Ok(RunStage::PrePatch),
            "PATCH_MGR" => Ok(RunStage::PatchMgr),
            "POST_PATCH" => Ok(RunStage::PostPatch),
            "CLEANUP" => Ok(RunStage::Cleanup),
            "POSTCHECK" => Ok(RunStage::Postcheck),
            other => Err(format!("unknown run stage '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// Per-node progress as reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Ok,
    AlreadyAtVersion,
    Ineligible,
    Failed,
    /// Queued behind a node whose patch failed, never attempted
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::InProgress => "in_progress",
            NodeStatus::Ok => "ok",
            NodeStatus::AlreadyAtVersion => "already_at_version",
            NodeStatus::Ineligible => "ineligible",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NodeStatus::Pending),
            "in_progress" => Ok(NodeStatus::InProgress),
            "ok" => Ok(NodeStatus::Ok),
            "already_at_version" => Ok(NodeStatus::AlreadyAtVersion),
            "ineligible" => Ok(NodeStatus::Ineligible),
            "failed" => Ok(NodeStatus::Failed),
            "skipped" => Ok(NodeStatus::Skipped),
            other => Err(format!("unknown node status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProgress {
    pub node: String,
    pub status: NodeStatus,
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate result handed back upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    pub request_id: String,
    pub status: RunStatus,
    pub code: ErrorCode,
    pub suggestion: Option<String>,
    /// Failures of best-effort stages that did not replace the primary code
    #[serde(default)]
    pub additional_errors: Vec<ErrorCode>,
    pub nodes: Vec<NodeProgress>,
    /// Wall-clock seconds per stage that ran
    #[serde(default)]
    pub stage_timings: BTreeMap<RunStage, u64>,
}

impl PatchResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn node(&self, name: &str) -> Option<&NodeProgress> {
        self.nodes.iter().find(|n| n.node == name)
    }
}
