use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use agent::{create_router, AppState};

const DEFAULT_BIND: &str = "0.0.0.0:8745";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let bind = std::env::var("AGENT_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    info!("Starting patch command agent on {}", bind);

    let api_key = std::env::var("AGENT_API_KEY")
        .unwrap_or_else(|_| "default-development-key".to_string());

    if api_key == "default-development-key" {
        warn!("Using default development API key - set AGENT_API_KEY environment variable for production");
    }

    let app = create_router(Arc::new(AppState::new(api_key)));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Command agent listening on {}", bind);

    axum::serve(listener, app).await?;
    Ok(())
}
