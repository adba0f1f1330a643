pub mod handlers;
pub mod middleware;
pub mod services;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

// Application state
#[derive(Clone)]
pub struct AppState {
    pub api_key: String,
}

impl AppState {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/command/execute", post(handlers::execute_command))
        .route("/health", get(handlers::health))
        .with_state(state)
}
