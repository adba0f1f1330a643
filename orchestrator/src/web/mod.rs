pub mod handlers;
pub mod server;

pub use server::{create_router, start_web_server};

use std::sync::Arc;

use crate::config::Config;
use crate::database::Database;
use crate::operation_tracker::OperationTracker;
use crate::services::PatchService;

// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Arc<Database>,
    pub patch_service: Arc<PatchService>,
    pub operation_tracker: OperationTracker,
}

impl AppState {
    pub fn new(config: Arc<Config>, patch_service: Arc<PatchService>) -> Self {
        Self {
            config,
            database: patch_service.database().clone(),
            operation_tracker: patch_service.tracker().clone(),
            patch_service,
        }
    }
}
