//! Database layer for the patch orchestrator.
//!
//! This module provides SQLite persistence for:
//! - Patch runs (request, stage, status, result, artifacts)
//! - Per-node progress of each run
//! - Data a retried run needs to resume (precheck snapshot, VM inventory)
//!
//! The module is organized into submodules:
//! - `records` - Record types
//! - `runs` - Run and node progress operations

mod records;
mod runs;

pub use records::*;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::{error, info};

pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Expose pool for integration test queries
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn new(database_path: &str) -> Result<Self> {
        info!("=== Starting database initialization ===");
        info!("Database path: {}", database_path);

        let in_memory = database_path == ":memory:";

        if !in_memory {
            if let Some(parent) = Path::new(database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    info!("Ensuring parent directory exists: {:?}", parent);
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        error!("FAILED to create parent directory {:?}: {}", parent, e);
                        return Err(e.into());
                    }
                }
            }
        }

        let database_url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", database_path)
        };
        info!("Connecting to database with URL: {}", database_url);

        // An in-memory database lives and dies with its connection
        let max_connections = if in_memory { 1 } else { 5 };
        let options = SqliteConnectOptions::from_str(&database_url)?;
        let pool = match SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
        {
            Ok(pool) => {
                info!("Successfully connected to SQLite database");
                pool
            }
            Err(e) => {
                error!("FAILED to connect to database: {}", e);
                error!("   Connection URL: {}", database_url);
                return Err(e.into());
            }
        };

        let database = Self { pool };

        info!("Starting table initialization...");
        match database.initialize_tables().await {
            Ok(_) => info!("Database tables initialized successfully"),
            Err(e) => {
                error!("CRITICAL: Database table initialization failed: {}", e);
                return Err(e);
            }
        }

        info!("=== Database initialization completed successfully ===");
        Ok(database)
    }

    async fn initialize_tables(&self) -> Result<()> {
        info!("Step 1: Creating patch_runs table...");
        let runs_table_sql = r#"
            CREATE TABLE IF NOT EXISTS patch_runs (
                request_id TEXT PRIMARY KEY,
                cluster TEXT NOT NULL,
                target TEXT NOT NULL,
                task TEXT NOT NULL,
                request_json TEXT NOT NULL,
                stage TEXT,
                status TEXT NOT NULL,
                error_code TEXT,
                suggestion TEXT,
                console_log_path TEXT,
                result_json TEXT,
                precheck_json TEXT,
                vm_inventory_json TEXT,
                vm_restart_pending INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
        "#;
        if let Err(e) = sqlx::query(runs_table_sql).execute(&self.pool).await {
            error!("FAILED to create patch_runs table: {}", e);
            return Err(e.into());
        }
        info!("patch_runs table created");

        info!("Step 2: Creating patch_runs indexes...");
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON patch_runs(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_runs_cluster_created ON patch_runs(cluster, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;
        info!("patch_runs indexes created");

        info!("Step 3: Creating node_progress table...");
        let progress_table_sql = r#"
            CREATE TABLE IF NOT EXISTS node_progress (
                request_id TEXT NOT NULL,
                node TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (request_id, node)
            )
        "#;
        if let Err(e) = sqlx::query(progress_table_sql).execute(&self.pool).await {
            error!("FAILED to create node_progress table: {}", e);
            return Err(e.into());
        }
        info!("node_progress table created");

        Ok(())
    }
}
