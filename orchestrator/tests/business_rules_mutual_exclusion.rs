//! One run per (cluster, target class): lock contention, release and
//! restart recovery.

mod common;

use common::fixtures::*;
use orchestrator::errors::ErrorCode;
use orchestrator::model::{OperationStyle, RunStatus, TargetClass, TaskKind};
use orchestrator::operation_tracker::OperationKey;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

async fn wait_for_terminal(harness: &Harness, request_id: &str) -> RunStatus {
    for _ in 0..200 {
        if let Some(run) = harness.database.get_run(request_id).await.unwrap() {
            if matches!(run.status, RunStatus::Succeeded | RunStatus::Failed) {
                return run.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run {} did not finish", request_id);
}

#[tokio::test]
async fn test_busy_cluster_class_is_refused() {
    let harness = Harness::new(standard_cluster()).await;
    let key = OperationKey::new(CLUSTER, TargetClass::StorageNode);
    assert_ok!(harness.tracker.try_start_operation(&key, "PATCH", "held").await);

    let err = assert_err!(
        harness
            .service
            .run_now(storage_patch(OperationStyle::Rolling))
            .await
    );

    assert_eq!(err.code, ErrorCode::INFRA_PATCHING_SYSTEM_BUSY_LOCK_NOT_ACQUIRED);
    assert!(err.message.contains("held"));
    assert!(harness.fleet.calls().is_empty());
    assert!(harness.database.list_runs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_other_classes_are_not_blocked() {
    let harness = Harness::new(standard_cluster()).await;
    let key = OperationKey::new(CLUSTER, TargetClass::StorageNode);
    assert_ok!(harness.tracker.try_start_operation(&key, "PATCH", "held").await);

    let result = assert_ok!(
        harness
            .service
            .run_now(request(
                TaskKind::Postcheck,
                TargetClass::Hypervisor,
                OperationStyle::Rolling,
            ))
            .await
    );

    assert!(result.is_success(), "unexpected result: {:?}", result);
    assert!(harness.tracker.is_busy(&key).await);
}

#[tokio::test]
async fn test_lock_released_after_run() {
    let fleet = FakeFleet::new();
    fleet.on_host(hosts::CELL_B, "list cell detail", out("cellsrvStatus: stopped\n"));
    let harness = Harness::with_fleet(standard_cluster(), fleet).await;
    let key = OperationKey::new(CLUSTER, TargetClass::StorageNode);

    let first = harness
        .service
        .run_now(request(
            TaskKind::Postcheck,
            TargetClass::StorageNode,
            OperationStyle::Rolling,
        ))
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Failed);
    assert!(!harness.tracker.is_busy(&key).await);

    // A failed run must not leave the class locked
    let second = harness
        .service
        .run_now(request(
            TaskKind::Postcheck,
            TargetClass::StorageNode,
            OperationStyle::Rolling,
        ))
        .await;
    assert_ok!(second);
    assert_eq!(harness.tracker.get_operation_status().await.total_active, 0);
}

#[tokio::test]
async fn test_unknown_cluster_is_invalid_option() {
    let harness = Harness::new(standard_cluster()).await;
    let mut request = storage_patch(OperationStyle::Rolling);
    request.cluster = "rack-z".to_string();

    let err = harness.service.run_now(request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::INVALID_PATCH_OPTION);
    assert!(err.message.contains("rack-z"));
}

#[tokio::test]
async fn test_submitted_run_holds_lock_until_done() {
    let harness = Harness::new(standard_cluster()).await;

    let request_id = harness
        .service
        .submit(request(
            TaskKind::Postcheck,
            TargetClass::StorageNode,
            OperationStyle::Rolling,
        ))
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&harness, &request_id).await, RunStatus::Succeeded);
    let run = harness.database.get_run(&request_id).await.unwrap().unwrap();
    assert_eq!(run.cluster, CLUSTER);
    assert!(run.result.is_some());
    assert!(!harness
        .tracker
        .is_busy(&OperationKey::new(CLUSTER, TargetClass::StorageNode))
        .await);
}

#[tokio::test]
async fn test_unfinished_runs_resume_after_restart() {
    let harness = Harness::new(standard_cluster()).await;
    let stored = request(
        TaskKind::Postcheck,
        TargetClass::StorageNode,
        OperationStyle::Rolling,
    );
    harness.database.create_run("left-over", &stored).await.unwrap();
    harness
        .database
        .set_run_status("left-over", RunStatus::Running)
        .await
        .unwrap();

    let resumed = harness.service.resume_unfinished().await.unwrap();

    assert_eq!(resumed, 1);
    assert_eq!(wait_for_terminal(&harness, "left-over").await, RunStatus::Succeeded);
    assert!(harness.database.unfinished_runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rerun_keeps_request_id() {
    let harness = Harness::new(standard_cluster()).await;
    let first = harness
        .service
        .run_now(request(
            TaskKind::Postcheck,
            TargetClass::GuestVm,
            OperationStyle::Rolling,
        ))
        .await
        .unwrap();

    let again = harness.service.rerun(&first.request_id).await.unwrap();

    assert_eq!(again.request_id, first.request_id);
    assert_eq!(again.status, RunStatus::Succeeded);

    let missing = harness.service.rerun("no-such-run").await.unwrap_err();
    assert_eq!(missing.code, ErrorCode::INVALID_PATCH_OPTION);
}
