//! Router-level tests for the command agent

use agent::types::{CommandResponse, HealthResponse};
use agent::{create_router, AppState};
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use rstest::rstest;
use std::sync::Arc;
use tower::util::ServiceExt;

const KEY: &str = "test-key";

fn router() -> axum::Router {
    create_router(Arc::new(AppState::new(KEY.to_string())))
}

fn execute_request(auth: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/command/execute")
        .header("content-type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[rstest]
#[case(None)]
#[case(Some("Bearer wrong-key"))]
#[case(Some("test-key"))]
#[tokio::test]
async fn command_requires_bearer_key(#[case] auth: Option<&str>) {
    let response = router()
        .oneshot(execute_request(auth, serde_json::json!({ "command": "true" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn command_reports_exit_code_and_output() {
    let response = router()
        .oneshot(execute_request(
            Some("Bearer test-key"),
            serde_json::json!({ "command": "echo hello; exit 2", "timeout_secs": 10 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: CommandResponse = read_json(response).await;
    assert!(body.success);
    assert_eq!(body.exit_code, Some(2));
    assert_eq!(body.stdout.trim(), "hello");
    assert!(!body.timed_out);
}

#[tokio::test]
async fn command_timeout_is_flagged() {
    let response = router()
        .oneshot(execute_request(
            Some("Bearer test-key"),
            serde_json::json!({ "command": "sleep 5", "timeout_secs": 1 }),
        ))
        .await
        .unwrap();
    let body: CommandResponse = read_json(response).await;
    assert!(!body.success);
    assert!(body.timed_out);
    assert_eq!(body.exit_code, None);
}

#[tokio::test]
async fn health_needs_no_key() {
    let response = router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: HealthResponse = read_json(response).await;
    assert_eq!(body.status, "ok");
}
