use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use orchestrator::config::manager::resolve_config_dir;
use orchestrator::constants::operations;
use orchestrator::web::{start_web_server, AppState};
use orchestrator::{ConfigManager, Database, OperationTracker, PatchService};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("orchestrator=info".parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting patch rollout orchestrator");

    let config_manager = ConfigManager::new(resolve_config_dir()).await?;
    let config = config_manager.get_current_config();
    info!(
        "Configuration loaded: {} clusters, listening on {}:{}",
        config.clusters.len(),
        config.host,
        config.port
    );

    let database = Arc::new(Database::new(&config.database_path).await?);
    info!("Database initialized");

    let operation_tracker = OperationTracker::new();
    let patch_service = Arc::new(PatchService::new(
        config.clone(),
        database.clone(),
        operation_tracker.clone(),
    ));

    match patch_service.resume_unfinished().await {
        Ok(0) => {}
        Ok(count) => info!("Resumed {} unfinished patch runs", count),
        Err(e) => warn!("Unable to resume unfinished runs: {}", e),
    }

    // Periodic sweep for locks abandoned by crashed runs
    let tracker = operation_tracker.clone();
    let max_hours = config.operation_cleanup_hours;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(operations::CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let cleaned = tracker.cleanup_old_operations(max_hours).await;
            if cleaned > 0 {
                warn!("Cleaned up {} locks older than {} hours", cleaned, max_hours);
            }
        }
    });

    start_web_server(AppState::new(config, patch_service)).await?;

    Ok(())
}
