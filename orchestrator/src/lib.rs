pub mod config;
pub mod constants;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod model;
pub mod operation_tracker;
pub mod parallel;
pub mod patch_tool;
pub mod remote;
pub mod services;
pub mod version;
pub mod web;

// Re-export commonly used types
pub use config::{Cluster, Config, ConfigManager, RunSettings};
pub use database::Database;
pub use errors::{ErrorCode, PatchError};
pub use handlers::{HandlerContext, TargetHandler};
pub use model::{OperationStyle, PatchRequest, PatchResult, TargetClass, TaskKind};
pub use operation_tracker::OperationTracker;
pub use remote::{CommandOutput, RemoteExecutor, SharedExecutor};
pub use services::PatchService;
