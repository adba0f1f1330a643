//! Patch run and node progress database operations.

use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, error};

use super::records::{PatchRunState, PendingVmRestart, VmInventory};
use super::Database;
use crate::errors::{DatabaseError, ErrorCode};
use crate::model::{
    NodeProgress, NodeRecord, NodeStatus, PatchRequest, PatchResult, RunStage, RunStatus,
};

const RUN_COLUMNS: &str = "request_id, cluster, request_json, stage, status, error_code, suggestion, \
     console_log_path, result_json, created_at, updated_at";

impl Database {
    pub async fn create_run(&self, request_id: &str, request: &PatchRequest) -> Result<()> {
        debug!("Storing patch run: {}", request_id);
        let now = Utc::now();
        let request_json = serde_json::to_string(request).map_err(DatabaseError::from)?;

        if let Err(e) = sqlx::query(
            r#"
            INSERT INTO patch_runs (
                request_id, cluster, target, task, request_json, status,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request_id)
        .bind(&request.cluster)
        .bind(request.target.as_str())
        .bind(request.task.as_str())
        .bind(&request_json)
        .bind(RunStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        {
            error!("Failed to store patch run {}: {}", request_id, e);
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn get_run(&self, request_id: &str) -> Result<Option<PatchRunState>> {
        let sql = format!("SELECT {} FROM patch_runs WHERE request_id = ?", RUN_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.run_from_row(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn list_runs(&self, limit: i64) -> Result<Vec<PatchRunState>> {
        let sql = format!(
            "SELECT {} FROM patch_runs ORDER BY created_at DESC LIMIT ?",
            RUN_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            runs.push(self.run_from_row(row).await?);
        }
        Ok(runs)
    }

    /// Runs that never reached a terminal status, oldest first
    pub async fn unfinished_runs(&self) -> Result<Vec<PatchRunState>> {
        let sql = format!(
            "SELECT {} FROM patch_runs WHERE status IN (?, ?) ORDER BY created_at ASC",
            RUN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(RunStatus::Pending.as_str())
            .bind(RunStatus::Running.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            runs.push(self.run_from_row(row).await?);
        }
        Ok(runs)
    }

    pub async fn set_run_status(&self, request_id: &str, status: RunStatus) -> Result<()> {
        self.update_column(request_id, "status", Some(status.as_str().to_string()))
            .await
    }

    pub async fn set_run_stage(&self, request_id: &str, stage: RunStage) -> Result<()> {
        self.update_column(request_id, "stage", Some(stage.as_str().to_string()))
            .await
    }

    pub async fn set_console_log(&self, request_id: &str, path: &str) -> Result<()> {
        self.update_column(request_id, "console_log_path", Some(path.to_string()))
            .await
    }

    pub async fn save_precheck_records(&self, request_id: &str, records: &[NodeRecord]) -> Result<()> {
        let json = serde_json::to_string(records).map_err(DatabaseError::from)?;
        self.update_column(request_id, "precheck_json", Some(json)).await
    }

    pub async fn load_precheck_records(&self, request_id: &str) -> Result<Option<Vec<NodeRecord>>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT precheck_json FROM patch_runs WHERE request_id = ?")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten();
        match json {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).map_err(DatabaseError::from)?,
            )),
            None => Ok(None),
        }
    }

    /// Record the VMs a run shut down. `restart_pending` marks inventories a
    /// later hypervisor run must bring back.
    pub async fn save_vm_inventory(
        &self,
        request_id: &str,
        inventory: &VmInventory,
        restart_pending: bool,
    ) -> Result<()> {
        let json = serde_json::to_string(inventory).map_err(DatabaseError::from)?;
        sqlx::query(
            "UPDATE patch_runs SET vm_inventory_json = ?, vm_restart_pending = ?, updated_at = ? WHERE request_id = ?",
        )
        .bind(json)
        .bind(restart_pending)
        .bind(Utc::now())
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_vm_inventory(&self, request_id: &str) -> Result<Option<VmInventory>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT vm_inventory_json FROM patch_runs WHERE request_id = ?")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten();
        match json {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).map_err(DatabaseError::from)?,
            )),
            None => Ok(None),
        }
    }

    pub async fn pending_vm_restarts(&self, cluster: &str) -> Result<Vec<PendingVmRestart>> {
        let rows = sqlx::query(
            "SELECT request_id, vm_inventory_json FROM patch_runs WHERE cluster = ? AND vm_restart_pending = 1",
        )
        .bind(cluster)
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let json: Option<String> = row.try_get("vm_inventory_json")?;
            let inventory = match json {
                Some(json) => serde_json::from_str(&json).map_err(DatabaseError::from)?,
                None => VmInventory::new(),
            };
            pending.push(PendingVmRestart {
                request_id: row.try_get("request_id")?,
                inventory,
            });
        }
        Ok(pending)
    }

    pub async fn clear_vm_restart(&self, request_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE patch_runs SET vm_restart_pending = 0, updated_at = ? WHERE request_id = ?",
        )
        .bind(Utc::now())
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_node_progress(
        &self,
        request_id: &str,
        node: &str,
        status: NodeStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO node_progress (request_id, node, status, detail, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(request_id, node) DO UPDATE SET
                status = excluded.status,
                detail = excluded.detail,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(request_id)
        .bind(node)
        .bind(status.as_str())
        .bind(detail)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn node_progress(&self, request_id: &str) -> Result<Vec<NodeProgress>> {
        let rows = sqlx::query(
            "SELECT node, status, detail, updated_at FROM node_progress WHERE request_id = ? ORDER BY node",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(NodeProgress {
                    node: row.try_get("node")?,
                    status: status.parse().map_err(|e: String| anyhow!(e))?,
                    detail: row.try_get("detail")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    /// Store the final result and move the run to its terminal status
    pub async fn finish_run(&self, result: &PatchResult) -> Result<()> {
        let json = serde_json::to_string(result).map_err(DatabaseError::from)?;
        let code = (!result.code.is_success()).then(|| result.code.code().to_string());

        sqlx::query(
            r#"
            UPDATE patch_runs
            SET status = ?, error_code = ?, suggestion = ?, result_json = ?, updated_at = ?
            WHERE request_id = ?
            "#,
        )
        .bind(result.status.as_str())
        .bind(code)
        .bind(&result.suggestion)
        .bind(json)
        .bind(Utc::now())
        .bind(&result.request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_column(&self, request_id: &str, column: &str, value: Option<String>) -> Result<()> {
        let sql = format!(
            "UPDATE patch_runs SET {} = ?, updated_at = ? WHERE request_id = ?",
            column
        );
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(Utc::now())
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("Patch run {} not found", request_id));
        }
        Ok(())
    }

    async fn run_from_row(&self, row: SqliteRow) -> Result<PatchRunState> {
        let request_id: String = row.try_get("request_id")?;
        let request_json: String = row.try_get("request_json")?;
        let stage: Option<String> = row.try_get("stage")?;
        let status: String = row.try_get("status")?;
        let error_code: Option<String> = row.try_get("error_code")?;
        let result_json: Option<String> = row.try_get("result_json")?;

        let request: PatchRequest =
            serde_json::from_str(&request_json).map_err(DatabaseError::from)?;
        let result: Option<PatchResult> = match result_json {
            Some(json) => Some(serde_json::from_str(&json).map_err(DatabaseError::from)?),
            None => None,
        };

        Ok(PatchRunState {
            nodes: self.node_progress(&request_id).await?,
            request_id,
            cluster: row.try_get("cluster")?,
            request,
            stage: stage
                .map(|s| s.parse::<RunStage>())
                .transpose()
                .map_err(|e| anyhow!(e))?,
            status: status.parse().map_err(|e: String| anyhow!(e))?,
            error_code: error_code.as_deref().and_then(ErrorCode::lookup),
            suggestion: row.try_get("suggestion")?,
            console_log_path: row.try_get("console_log_path")?,
            result,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
