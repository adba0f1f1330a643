// Patch request and cluster lock endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::constants::RUN_HISTORY_LIMIT;
use crate::database::PatchRunState;
use crate::errors::{ErrorCode, PatchError};
use crate::model::PatchRequest;
use crate::operation_tracker::OperationStatus;
use crate::web::AppState;

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    RUN_HISTORY_LIMIT
}

fn rejection_status(err: &PatchError) -> StatusCode {
    match err.code {
        ErrorCode::INFRA_PATCHING_SYSTEM_BUSY_LOCK_NOT_ACQUIRED => StatusCode::CONFLICT,
        ErrorCode::INVALID_PATCH_OPTION | ErrorCode::INVALID_TARGET_VERSION => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Submit a patch request; it runs in the background
pub async fn submit_patch(
    State(state): State<AppState>,
    Json(request): Json<PatchRequest>,
) -> ApiResult<Value> {
    info!(
        "Patch request: {} {} on {}",
        request.task, request.target, request.cluster
    );

    if let Err(e) = request.validate() {
        warn!("Rejected patch request: {}", e);
        return Err((StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string()))));
    }

    match state.patch_service.submit(request).await {
        Ok(request_id) => Ok(Json(ApiResponse::success(json!({
            "request_id": request_id,
            "message": format!("Patch request {} accepted", request_id)
        })))),
        Err(e) => {
            warn!("Patch request not started: {}", e);
            Err((rejection_status(&e), Json(ApiResponse::error(e.to_string()))))
        }
    }
}

pub async fn list_patch_runs(
    Query(query): Query<ListQuery>,
    State(state): State<AppState>,
) -> ApiResult<Vec<PatchRunState>> {
    match state.database.list_runs(query.limit.clamp(1, 500)).await {
        Ok(runs) => Ok(Json(ApiResponse::success(runs))),
        Err(e) => {
            error!("Failed to list patch runs: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            ))
        }
    }
}

pub async fn get_patch_run(
    Path(request_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<PatchRunState> {
    match state.database.get_run(&request_id).await {
        Ok(Some(run)) => Ok(Json(ApiResponse::success(run))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Patch run {} not found", request_id))),
        )),
        Err(e) => {
            error!("Failed to load patch run {}: {}", request_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            ))
        }
    }
}

pub async fn get_active_operations(State(state): State<AppState>) -> ApiResult<OperationStatus> {
    let operations = state.operation_tracker.get_operation_status().await;
    Ok(Json(ApiResponse::success(operations)))
}
