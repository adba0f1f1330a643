//! Common test data constants and request builders

use orchestrator::model::{OperationStyle, PatchRequest, TargetClass, TaskKind};

pub const CLUSTER: &str = "rack-a";

pub mod versions {
    pub const OLD: &str = "23.1.0.0.0.230101";
    pub const TARGET: &str = "24.1.0.0.0.240101";
}

pub mod hosts {
    pub const HV1: &str = "hv01";
    pub const HV2: &str = "hv02";
    pub const GUEST1: &str = "gv01";
    pub const GUEST2: &str = "gv02";
    pub const CELL_A: &str = "cel01";
    pub const CELL_B: &str = "cel02";
    pub const SWITCH1: &str = "sw01";
    pub const SWITCH2: &str = "sw02";
    pub const LAUNCH: &str = "launch01";
}

pub fn request(task: TaskKind, target: TargetClass, style: OperationStyle) -> PatchRequest {
    PatchRequest {
        cluster: CLUSTER.to_string(),
        task,
        target,
        style,
        node_limit: None,
        include_nodes: vec![],
        target_version: versions::TARGET.to_string(),
        oneoff: None,
    }
}

pub fn storage_patch(style: OperationStyle) -> PatchRequest {
    request(TaskKind::Patch, TargetClass::StorageNode, style)
}
