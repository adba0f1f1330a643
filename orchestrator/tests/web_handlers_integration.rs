//! Integration tests for the patch API routes, driven through the router
//! without binding a socket.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::fixtures::*;
use orchestrator::model::{OperationStyle, RunStatus, TargetClass, TaskKind};
use orchestrator::operation_tracker::OperationKey;
use orchestrator::web::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn router(harness: &Harness) -> Router {
    let state = AppState::new(harness.config(), Arc::new(harness.service.clone()));
    create_router(state)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_submit_returns_request_id_and_run_completes() {
    let harness = Harness::new(standard_cluster()).await;

    let (status, body) = send(
        router(&harness),
        post_json(
            "/api/patch",
            json!({
                "cluster": CLUSTER,
                "task": "POSTCHECK",
                "target": "STORAGE_NODE",
                "style": "ROLLING"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let request_id = body["data"]["request_id"].as_str().unwrap().to_string();

    let mut finished = None;
    for _ in 0..200 {
        let (status, body) = send(router(&harness), get(&format!("/api/patch/{}", request_id))).await;
        assert_eq!(status, StatusCode::OK);
        if body["data"]["status"] == "succeeded" {
            finished = Some(body);
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let body = finished.expect("run should finish");
    assert_eq!(body["data"]["cluster"], CLUSTER);
    assert_eq!(body["data"]["nodes"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_submit_rejects_invalid_option() {
    let harness = Harness::new(standard_cluster()).await;

    let (status, body) = send(
        router(&harness),
        post_json(
            "/api/patch",
            json!({
                "cluster": CLUSTER,
                "task": "PATCH",
                "target": "FABRIC_SWITCH",
                "style": "NON_ROLLING",
                "target_version": "9.3.11"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("rolling"));
    assert!(harness.fleet.calls().is_empty());
}

#[tokio::test]
async fn test_submit_unknown_cluster_is_bad_request() {
    let harness = Harness::new(standard_cluster()).await;

    let (status, _) = send(
        router(&harness),
        post_json(
            "/api/patch",
            json!({ "cluster": "rack-z", "task": "POSTCHECK", "target": "GUEST_VM" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_while_busy_is_conflict() {
    let harness = Harness::new(standard_cluster()).await;
    let key = OperationKey::new(CLUSTER, TargetClass::StorageNode);
    harness
        .tracker
        .try_start_operation(&key, "PATCH", "held")
        .await
        .unwrap();

    let (status, body) = send(
        router(&harness),
        post_json(
            "/api/patch",
            json!({
                "cluster": CLUSTER,
                "task": "PATCH",
                "target": "STORAGE_NODE",
                "target_version": versions::TARGET
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("busy"));

    let (status, body) = send(router(&harness), get("/api/operations")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_active"], 1);
    assert_eq!(body["data"]["active"][0]["request_id"], "held");
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let harness = Harness::new(standard_cluster()).await;

    let (status, body) = send(router(&harness), get("/api/patch/no-such-run")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_list_runs_newest_first_with_limit() {
    let harness = Harness::new(standard_cluster()).await;
    for _ in 0..3 {
        let result = harness
            .service
            .run_now(request(
                TaskKind::Postcheck,
                TargetClass::GuestVm,
                OperationStyle::Rolling,
            ))
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Succeeded);
    }

    let (status, body) = send(router(&harness), get("/api/patch?limit=2")).await;

    assert_eq!(status, StatusCode::OK);
    let runs = body["data"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r["status"] == "succeeded"));
}
