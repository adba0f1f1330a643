//! Business Rule Tests: Storage Node Patching
//!
//! These tests drive complete storage runs against a scripted fleet and check
//! the per-node results, the result code and which remote commands were (or
//! were not) issued.

mod common;

use common::fixtures::*;
use orchestrator::errors::ErrorCode;
use orchestrator::model::{NodeStatus, OperationStyle, RunStatus, TargetClass, TaskKind};

fn cells_only() -> ClusterBuilder {
    ClusterBuilder::new()
        .hypervisors(&[hosts::HV1, hosts::HV2])
        .storage(&[hosts::CELL_A, hosts::CELL_B])
}

#[tokio::test]
async fn test_rolling_patch_skips_node_already_at_target() {
    let fleet = FakeFleet::new();
    fleet
        .image_versions(hosts::CELL_A, versions::OLD, versions::TARGET)
        .image_version(hosts::CELL_B, versions::TARGET);
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::Rolling))
        .await
        .expect("Run should start");

    assert!(result.is_success(), "unexpected result: {:?}", result);
    assert_eq!(result.code, ErrorCode::PATCH_SUCCESS_EXIT_CODE);
    assert_eq!(result.node(hosts::CELL_A).map(|n| n.status), Some(NodeStatus::Ok));
    assert_eq!(
        result.node(hosts::CELL_B).map(|n| n.status),
        Some(NodeStatus::AlreadyAtVersion)
    );

    // One rolling patchmgr run, launched from the first hypervisor
    let launches = harness.fleet.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].host, hosts::HV1);
    assert!(launches[0].command.contains("--cells"));
    assert!(launches[0].command.contains("--patch"));
    assert!(launches[0].command.contains("--rolling"));

    // The node list only names the node being patched
    let node_lists = harness.fleet.calls_matching("printf");
    assert_eq!(node_lists.len(), 1);
    assert!(node_lists[0].command.contains(hosts::CELL_A));
    assert!(!node_lists[0].command.contains(hosts::CELL_B));

    // Services on the skipped node were re-verified
    assert!(harness
        .fleet
        .calls()
        .iter()
        .any(|c| c.host == hosts::CELL_B && c.command.contains("list cell detail")));

    // Rolling runs never touch guests
    assert_eq!(harness.fleet.count("virsh shutdown"), 0);

    let stored = harness
        .database
        .get_run(&result.request_id)
        .await
        .unwrap()
        .expect("Run should be stored");
    assert_eq!(stored.status, RunStatus::Succeeded);
    assert!(stored
        .console_log_path
        .as_deref()
        .is_some_and(|p| p.ends_with("PatchmgrConsole.out")));
}

#[tokio::test]
async fn test_postcheck_fails_when_version_did_not_move() {
    let fleet = FakeFleet::new();
    fleet
        .image_version(hosts::CELL_A, versions::OLD)
        .image_version(hosts::CELL_B, versions::TARGET);
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::Rolling))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(
        result.code,
        ErrorCode::CELL_CURRENT_VERSION_EXPECTED_HIGHER_THAN_ORIGINAL_VERSION
    );
    assert_eq!(
        result.node(hosts::CELL_A).map(|n| n.status),
        Some(NodeStatus::Failed)
    );
}

#[tokio::test]
async fn test_rollback_refused_when_no_node_can_roll_back() {
    let fleet = FakeFleet::new();
    fleet
        .image_version(hosts::CELL_A, versions::TARGET)
        .image_version(hosts::CELL_B, versions::TARGET)
        .on("imageinfo -inactive -ver", out("undefined"))
        .with_guests(hosts::HV1, &["vm1"])
        .with_guests(hosts::HV2, &["vm2"]);
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let mut request = storage_patch(OperationStyle::NonRolling);
    request.task = TaskKind::Rollback;
    request.target_version = versions::OLD.to_string();

    let result = harness.service.run_now(request).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.code, ErrorCode::CELL_NOT_ELIGIBLE_FOR_ROLLBACK);
    assert_eq!(harness.fleet.count("virsh shutdown"), 0);
    assert!(harness.fleet.launches().is_empty());
    assert_eq!(harness.fleet.running_guests(hosts::HV1), vec!["vm1".to_string()]);
}

#[tokio::test]
async fn test_non_rolling_tool_failure_restarts_every_guest() {
    let fleet = FakeFleet::new();
    fleet
        .image_version(hosts::CELL_A, versions::OLD)
        .image_version(hosts::CELL_B, versions::OLD)
        .on("Exit status", out("Exit status:1"))
        .with_guests(hosts::HV1, &["vm1"])
        .with_guests(hosts::HV2, &["vm2"]);
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::NonRolling))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.code, ErrorCode::CELL_PATCH_FAILED);

    // Both hypervisors had their guest stopped and started again
    for (host, guest) in [(hosts::HV1, "vm1"), (hosts::HV2, "vm2")] {
        assert!(harness
            .fleet
            .calls()
            .iter()
            .any(|c| c.host == host && c.command == format!("virsh shutdown {}", guest)));
        assert!(harness
            .fleet
            .calls()
            .iter()
            .any(|c| c.host == host && c.command == format!("virsh start {}", guest)));
        assert_eq!(harness.fleet.running_guests(host), vec![guest.to_string()]);
    }

    // The restart already happened, so nothing is left for the hypervisor run
    assert!(harness
        .database
        .pending_vm_restarts(CLUSTER)
        .await
        .unwrap()
        .is_empty());

    // No postcheck after a failed patch
    assert_eq!(harness.fleet.count("ping -c"), 0);
}

#[tokio::test]
async fn test_failed_restart_after_failed_patch_keeps_patch_code() {
    let fleet = FakeFleet::new();
    fleet
        .image_version(hosts::CELL_A, versions::OLD)
        .image_version(hosts::CELL_B, versions::OLD)
        .on("Exit status", out("Exit status:1"))
        .with_guests(hosts::HV1, &["vm1"])
        .with_guests(hosts::HV2, &["vm2"])
        .on_host(hosts::HV2, "virsh start", exit(1));
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::NonRolling))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.code, ErrorCode::CELL_PATCH_FAILED);
    assert!(
        result
            .additional_errors
            .contains(&ErrorCode::CELL_FAILED_TO_BRINGUP_VMS),
        "unexpected additional errors: {:?}",
        result.additional_errors
    );
    assert_eq!(harness.fleet.running_guests(hosts::HV1), vec!["vm1".to_string()]);
    assert!(harness.fleet.running_guests(hosts::HV2).is_empty());

    let stored = harness
        .database
        .get_run(&result.request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.error_code, Some(ErrorCode::CELL_PATCH_FAILED));
}

#[tokio::test]
async fn test_non_rolling_success_leaves_guests_to_hypervisor_run() {
    let fleet = FakeFleet::new();
    fleet
        .image_versions(hosts::CELL_A, versions::OLD, versions::TARGET)
        .image_versions(hosts::CELL_B, versions::OLD, versions::TARGET)
        .with_guests(hosts::HV1, &["vm1"])
        .with_guests(hosts::HV2, &["vm2"]);
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::NonRolling))
        .await
        .unwrap();

    assert!(result.is_success(), "unexpected result: {:?}", result);
    assert_eq!(harness.fleet.count("virsh start"), 0);
    assert!(harness.fleet.running_guests(hosts::HV1).is_empty());

    let pending = harness.database.pending_vm_restarts(CLUSTER).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request_id, result.request_id);
    assert_eq!(pending[0].inventory[hosts::HV2], vec!["vm2".to_string()]);
}

#[tokio::test]
async fn test_non_rolling_subset_restarts_guests_itself() {
    let fleet = FakeFleet::new();
    fleet
        .image_versions(hosts::CELL_A, versions::OLD, versions::TARGET)
        .image_version(hosts::CELL_B, versions::OLD)
        .with_guests(hosts::HV1, &["vm1"]);
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let mut request = storage_patch(OperationStyle::NonRolling);
    request.node_limit = Some(1);

    let result = harness.service.run_now(request).await.unwrap();

    assert!(result.is_success(), "unexpected result: {:?}", result);
    assert_eq!(
        result.node(hosts::CELL_B).map(|n| n.status),
        Some(NodeStatus::Ineligible)
    );
    assert_eq!(harness.fleet.running_guests(hosts::HV1), vec!["vm1".to_string()]);
    assert!(harness
        .database
        .pending_vm_restarts(CLUSTER)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_grid_disk_gate_blocks_rolling_patch() {
    let fleet = FakeFleet::new();
    fleet
        .image_version(hosts::CELL_A, versions::OLD)
        .image_version(hosts::CELL_B, versions::OLD)
        .on_host(hosts::CELL_B, "asmmodestatus'", out("DATAC1_CD_00_cel02   OFFLINE\n"));
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::Rolling))
        .await
        .unwrap();

    assert_eq!(result.code, ErrorCode::CELL_ASMDEACTIVATION_OUTCOME_ERROR);
    assert!(harness.fleet.launches().is_empty());
    // One cell service restart before giving up on the node
    assert_eq!(harness.fleet.count("alter cell restart services all"), 1);
}

#[tokio::test]
async fn test_grid_disk_gate_ignores_nodes_not_being_patched() {
    let fleet = FakeFleet::new();
    fleet
        .image_versions(hosts::CELL_A, versions::OLD, versions::TARGET)
        .image_version(hosts::CELL_B, versions::TARGET)
        .on_host(hosts::CELL_B, "asmmodestatus'", out("DATAC1_CD_00_cel02   OFFLINE\n"));
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::Rolling))
        .await
        .unwrap();

    assert!(result.is_success(), "unexpected result: {:?}", result);
    assert_eq!(harness.fleet.launches().len(), 1);
    assert!(!harness
        .fleet
        .calls()
        .iter()
        .any(|c| c.host == hosts::CELL_B && c.command.contains("asmmodestatus")));
}

#[tokio::test]
async fn test_unreachable_node_fails_gathering() {
    let fleet = FakeFleet::new();
    fleet
        .image_version(hosts::CELL_A, versions::OLD)
        .unreachable(hosts::CELL_B);
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::Rolling))
        .await
        .unwrap();

    assert_eq!(result.code, ErrorCode::CELL_PING_FAILED);
    assert!(result.suggestion.unwrap_or_default().contains(hosts::CELL_B));
    assert!(harness.fleet.launches().is_empty());
}

#[tokio::test]
async fn test_failed_service_query_fails_gathering() {
    let fleet = FakeFleet::new();
    fleet
        .image_version(hosts::CELL_A, versions::OLD)
        .image_version(hosts::CELL_B, versions::OLD)
        .unreachable_for(hosts::CELL_B, "list cell detail");
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::Rolling))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.code, ErrorCode::CELL_PING_FAILED);
    assert!(result.suggestion.unwrap_or_default().contains(hosts::CELL_B));
    assert!(harness.fleet.launches().is_empty());
}

#[tokio::test]
async fn test_precheck_twice_on_compliant_nodes_never_runs_patchmgr() {
    let fleet = FakeFleet::new();
    fleet
        .image_version(hosts::CELL_A, versions::TARGET)
        .image_version(hosts::CELL_B, versions::TARGET);
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let request = common::fixtures::request(
        TaskKind::PrereqCheck,
        TargetClass::StorageNode,
        OperationStyle::Rolling,
    );
    let first = harness.service.run_now(request.clone()).await.unwrap();
    let second = harness.service.run_now(request).await.unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(first.code, second.code);
    assert_eq!(first.code, ErrorCode::PATCH_SUCCESS_EXIT_CODE);
    assert_eq!(harness.fleet.count("./patchmgr"), 0);
}

#[tokio::test]
async fn test_patch_with_nothing_to_do_reports_no_action() {
    let fleet = FakeFleet::new();
    fleet
        .image_version(hosts::CELL_A, versions::TARGET)
        .image_version(hosts::CELL_B, versions::TARGET);
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::Rolling))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.code, ErrorCode::NO_ACTION_REQUIRED);
    assert!(harness.fleet.launches().is_empty());
}

#[tokio::test]
async fn test_existing_console_log_is_resumed_not_relaunched() {
    let fleet = FakeFleet::new();
    fleet
        .image_versions(hosts::CELL_A, versions::OLD, versions::TARGET)
        .image_version(hosts::CELL_B, versions::TARGET)
        .on("test -f", exit(0));
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::Rolling))
        .await
        .unwrap();

    assert!(result.is_success(), "unexpected result: {:?}", result);
    assert!(harness.fleet.launches().is_empty());
    assert_eq!(harness.fleet.count("--cleanup"), 1);
    // Pre-patch checks belong to the attempt that launched the tool
    assert_eq!(harness.fleet.count("ssh -o BatchMode=yes"), 0);
}

#[tokio::test]
async fn test_running_session_blocks_launch() {
    let fleet = FakeFleet::new();
    fleet
        .image_version(hosts::CELL_A, versions::OLD)
        .image_version(hosts::CELL_B, versions::TARGET)
        .on("pgrep -f", out("48213"));
    let harness = Harness::with_fleet(cells_only(), fleet).await;

    let result = harness
        .service
        .run_now(storage_patch(OperationStyle::Rolling))
        .await
        .unwrap();

    assert_eq!(result.code, ErrorCode::PATCHMGR_SESSION_ALREADY_EXIST);
    assert!(harness.fleet.launches().is_empty());
    assert_eq!(
        result.node(hosts::CELL_A).map(|n| n.status),
        Some(NodeStatus::Failed)
    );
}
