//! Result codes that differ by target class

use crate::errors::ErrorCode;
use crate::model::{TargetClass, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassCodes {
    pub unreachable: ErrorCode,
    pub services: ErrorCode,
    pub image_status: ErrorCode,
    pub rollback_blocked: ErrorCode,
    pub patch_failed: ErrorCode,
    pub rollback_failed: ErrorCode,
    pub precheck_failed: ErrorCode,
    pub rollback_precheck_failed: ErrorCode,
    pub expected_higher: ErrorCode,
    pub expected_lower: ErrorCode,
    pub expected_equal: ErrorCode,
    pub vm_shutdown: ErrorCode,
    pub vm_startup: ErrorCode,
    /// Unexpected error inside a stage
    pub exception: ErrorCode,
}

impl ClassCodes {
    pub fn for_class(class: TargetClass) -> Self {
        match class {
            TargetClass::StorageNode => Self {
                unreachable: ErrorCode::CELL_PING_FAILED,
                services: ErrorCode::CELL_SERVICES_NOT_RUNNING,
                image_status: ErrorCode::CELL_IMAGE_STATUS_NOT_SUCCESSFUL,
                rollback_blocked: ErrorCode::CELL_NOT_ELIGIBLE_FOR_ROLLBACK,
                patch_failed: ErrorCode::CELL_PATCH_FAILED,
                rollback_failed: ErrorCode::CELL_PATCH_FAILED,
                precheck_failed: ErrorCode::PATCHMGR_PRECHECK_EXECUTION_FAILED_ERROR,
                rollback_precheck_failed: ErrorCode::PATCHMGR_PRECHECK_EXECUTION_FAILED_ERROR,
                expected_higher: ErrorCode::CELL_CURRENT_VERSION_EXPECTED_HIGHER_THAN_ORIGINAL_VERSION,
                expected_lower: ErrorCode::CELL_CURRENT_VERSION_EXPECTED_LOWER_THAN_ORIGINAL_VERSION,
                expected_equal: ErrorCode::CELL_CURRENT_VERSION_EXPECTED_EQUAL_TO_ORIGINAL_VERSION,
                vm_shutdown: ErrorCode::CELL_FAILED_TO_SHUTDOWN_VMS,
                vm_startup: ErrorCode::CELL_FAILED_TO_BRINGUP_VMS,
                exception: ErrorCode::CELL_PATCH_EXCEPTION,
            },
            TargetClass::Hypervisor => Self {
                unreachable: ErrorCode::DOM0_NOT_PINGABLE,
                services: ErrorCode::INFRA_PATCHING_DOM0_SERVICES_NOT_RUNNING,
                image_status: ErrorCode::DOM0_IMAGE_NOT_SUCCESS,
                rollback_blocked: ErrorCode::DOM0_ROLLBACK_NOT_ALLOWED_ERROR,
                patch_failed: ErrorCode::DOM0_PATCHING_FAILED_ERROR,
                rollback_failed: ErrorCode::DOM0_PATCHING_FAILED_ERROR,
                precheck_failed: ErrorCode::PATCHMGR_PRECHECK_EXECUTION_FAILED_ERROR,
                rollback_precheck_failed: ErrorCode::PATCHMGR_PRECHECK_EXECUTION_FAILED_ERROR,
                expected_higher: ErrorCode::DOM0_NOT_AT_REQUESTED_VERSION,
                expected_lower: ErrorCode::VERSION_MISMATCH_DURING_ROLLBACK,
                expected_equal: ErrorCode::DOM0_VERSION_CHANGED_DURING_CHECK,
                vm_shutdown: ErrorCode::DOM0_FAILED_TO_SHUTDOWN_VMS,
                vm_startup: ErrorCode::DOMU_DOWN_ERROR,
                exception: ErrorCode::INFRA_PATCHING_TASK_HANDLER_PATCH_REQUEST_EXCEPTION,
            },
            TargetClass::GuestVm => Self {
                unreachable: ErrorCode::PATCHING_NODE_SSH_CHECK_FAILED,
                services: ErrorCode::DOMU_CRITICAL_SERVICES_NOT_RUNNING,
                image_status: ErrorCode::DOMU_IMAGE_STATUS_FAILED,
                rollback_blocked: ErrorCode::ROLLBACK_CANNOT_BE_PERFORMED,
                patch_failed: ErrorCode::DOMU_PATCHMGR_UPGRADE_EXECUTION_FAILED,
                rollback_failed: ErrorCode::DOMU_PATCHMGR_ROLLBACK_EXECUTION_FAILED,
                precheck_failed: ErrorCode::PATCHMGR_PRECHECK_EXECUTION_FAILED_ERROR,
                rollback_precheck_failed: ErrorCode::PATCHMGR_PRECHECK_EXECUTION_FAILED_ERROR,
                expected_higher: ErrorCode::DOMU_VERSION_LOWER_THAN_EXPECTED_VERSION,
                expected_lower: ErrorCode::DOMU_VERSION_NOT_LOWER_AFTER_ROLLBACK,
                expected_equal: ErrorCode::DOMU_VERSION_CHANGED_DURING_CHECK,
                vm_shutdown: ErrorCode::DOM0_FAILED_TO_SHUTDOWN_VMS,
                vm_startup: ErrorCode::DOMU_DOWN_ERROR,
                exception: ErrorCode::INFRA_PATCHING_TASK_HANDLER_PATCH_REQUEST_EXCEPTION,
            },
            TargetClass::FabricSwitch => Self {
                unreachable: ErrorCode::SWITCH_PING_CHECK_FAILED,
                services: ErrorCode::SWITCH_POSTCHECK_FAILED,
                image_status: ErrorCode::SWITCH_POSTCHECK_FAILED,
                rollback_blocked: ErrorCode::ROLLBACK_CANNOT_BE_PERFORMED,
                patch_failed: ErrorCode::SWITCH_PATCH_FAILED,
                rollback_failed: ErrorCode::SWITCH_ROLLBACK_FAILED,
                precheck_failed: ErrorCode::SWITCH_PATCH_PRECHECK_FAILED,
                rollback_precheck_failed: ErrorCode::SWITCH_ROLLBACK_PRECHECK_FAILED,
                expected_higher: ErrorCode::SWITCH_CURRENT_VERSION_EXPECTED_HIGHER_THAN_ORIGINAL_VER,
                expected_lower: ErrorCode::SWITCH_CURRENT_VERSION_SHOULD_BE_LOWER_THAN_ORIGINAL_VER,
                expected_equal: ErrorCode::SWITCH_POSTCHECK_FAILED,
                vm_shutdown: ErrorCode::DOM0_FAILED_TO_SHUTDOWN_VMS,
                vm_startup: ErrorCode::DOMU_DOWN_ERROR,
                exception: ErrorCode::INFRA_PATCHING_TASK_HANDLER_PATCH_REQUEST_EXCEPTION,
            },
        }
    }

    /// Code for a non-zero patchmgr exit
    pub fn tool_failure(&self, task: TaskKind) -> ErrorCode {
        match task {
            TaskKind::PrereqCheck => self.precheck_failed,
            TaskKind::RollbackPrereqCheck => self.rollback_precheck_failed,
            TaskKind::Rollback => self.rollback_failed,
            _ => self.patch_failed,
        }
    }

    /// Code for a postcheck version that moved the wrong way
    pub fn version_deviation(&self, task: TaskKind) -> ErrorCode {
        match task {
            TaskKind::Patch => self.expected_higher,
            TaskKind::Rollback => self.expected_lower,
            _ => self.expected_equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(TargetClass::StorageNode, TaskKind::Patch => ErrorCode::CELL_PATCH_FAILED)]
    #[test_case(TargetClass::StorageNode, TaskKind::PrereqCheck => ErrorCode::PATCHMGR_PRECHECK_EXECUTION_FAILED_ERROR)]
    #[test_case(TargetClass::GuestVm, TaskKind::Rollback => ErrorCode::DOMU_PATCHMGR_ROLLBACK_EXECUTION_FAILED)]
    #[test_case(TargetClass::FabricSwitch, TaskKind::RollbackPrereqCheck => ErrorCode::SWITCH_ROLLBACK_PRECHECK_FAILED)]
    #[test_case(TargetClass::Hypervisor, TaskKind::Rollback => ErrorCode::DOM0_PATCHING_FAILED_ERROR)]
    fn tool_failure_codes(class: TargetClass, task: TaskKind) -> ErrorCode {
        ClassCodes::for_class(class).tool_failure(task)
    }

    #[test_case(TargetClass::StorageNode, TaskKind::Rollback => ErrorCode::CELL_CURRENT_VERSION_EXPECTED_LOWER_THAN_ORIGINAL_VERSION)]
    #[test_case(TargetClass::Hypervisor, TaskKind::Patch => ErrorCode::DOM0_NOT_AT_REQUESTED_VERSION)]
    #[test_case(TargetClass::GuestVm, TaskKind::PrereqCheck => ErrorCode::DOMU_VERSION_CHANGED_DURING_CHECK)]
    #[test_case(TargetClass::FabricSwitch, TaskKind::Patch => ErrorCode::SWITCH_CURRENT_VERSION_EXPECTED_HIGHER_THAN_ORIGINAL_VER)]
    fn postcheck_codes(class: TargetClass, task: TaskKind) -> ErrorCode {
        ClassCodes::for_class(class).version_deviation(task)
    }
}
