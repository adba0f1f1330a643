//! HTTP request handlers for the agent server

use axum::{extract::Json, response::Json as ResponseJson};
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info};

use crate::middleware::ApiKeyAuth;
use crate::services::commands;
use crate::types::*;

pub async fn execute_command(
    _auth: ApiKeyAuth,
    Json(request): Json<CommandRequest>,
) -> ResponseJson<CommandResponse> {
    info!(
        "Executing command with {}s timeout: {}",
        request.timeout_secs, request.command
    );
    let timeout = Duration::from_secs(request.timeout_secs.max(1));
    match commands::execute_shell_command(&request.command, timeout).await {
        Ok(response) => ResponseJson(response),
        Err(e) => {
            error!("Command could not be run: {}", e);
            ResponseJson(CommandResponse::error(e.to_string()))
        }
    }
}

pub async fn health() -> ResponseJson<HealthResponse> {
    ResponseJson(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        hostname: std::env::var("HOSTNAME").ok(),
        timestamp: Utc::now(),
    })
}
