//! Stage bookkeeping and the stage helpers shared by every handler

use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::HandlerContext;
use crate::constants::callbacks::READY_FOR_PATCH;
use crate::errors::{ErrorCode, PatchError};
use crate::health::GridDiskMode;
use crate::model::{NodeProgress, NodeStatus, PatchResult, RunStage, RunStatus, TaskKind};
use crate::parallel::{ItemFailure, WorkItem};
use crate::patch_tool::{DriverState, PatchToolDriver, ToolOutcome};

/// First failure is the one reported upstream. Later failures, typically from
/// best-effort stages, are kept as additional codes.
#[derive(Debug, Default)]
pub struct ErrorLedger {
    primary: Option<PatchError>,
    additional: Vec<ErrorCode>,
}

impl ErrorLedger {
    pub fn record(&mut self, err: PatchError) {
        match self.primary {
            None => self.primary = Some(err),
            Some(_) => self.additional.push(err.code),
        }
    }

    pub fn primary(&self) -> Option<&PatchError> {
        self.primary.as_ref()
    }

    pub fn additional(&self) -> &[ErrorCode] {
        &self.additional
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none()
    }
}

/// Mutable state of one handler run: current stage, per-node progress, errors
pub struct PatchRun<'a> {
    ctx: &'a HandlerContext,
    ledger: ErrorLedger,
    success_code: Option<(ErrorCode, String)>,
    stage: Option<(RunStage, Instant)>,
    timings: BTreeMap<RunStage, u64>,
    nodes: BTreeMap<String, NodeProgress>,
}

impl<'a> PatchRun<'a> {
    pub async fn begin(ctx: &'a HandlerContext) -> PatchRun<'a> {
        if let Err(e) = ctx
            .database
            .set_run_status(&ctx.request_id, RunStatus::Running)
            .await
        {
            warn!("Unable to mark run {} as running: {}", ctx.request_id, e);
        }
        Self {
            ctx,
            ledger: ErrorLedger::default(),
            success_code: None,
            stage: None,
            timings: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }

    fn close_stage(&mut self) {
        if let Some((stage, started)) = self.stage.take() {
            let elapsed = started.elapsed().as_secs();
            *self.timings.entry(stage).or_insert(0) += elapsed;
        }
    }

    pub async fn enter(&mut self, stage: RunStage) {
        self.close_stage();
        info!("Run {} entering {}", self.ctx.request_id, stage.as_str());
        self.stage = Some((stage, Instant::now()));
        if let Err(e) = self.ctx.database.set_run_stage(&self.ctx.request_id, stage).await {
            warn!("Unable to persist stage {} for {}: {}", stage.as_str(), self.ctx.request_id, e);
        }
    }

    pub async fn mark(&mut self, node: &str, status: NodeStatus, detail: Option<String>) {
        if let Err(e) = self
            .ctx
            .database
            .upsert_node_progress(&self.ctx.request_id, node, status, detail.as_deref())
            .await
        {
            warn!("Unable to persist progress of {}: {}", node, e);
        }
        self.nodes.insert(
            node.to_string(),
            NodeProgress {
                node: node.to_string(),
                status,
                detail,
                updated_at: Utc::now(),
            },
        );
    }

    pub async fn mark_all(&mut self, nodes: &[String], status: NodeStatus, detail: Option<&str>) {
        for node in nodes {
            self.mark(node, status, detail.map(str::to_string)).await;
        }
    }

    pub fn node_status(&self, node: &str) -> Option<NodeStatus> {
        self.nodes.get(node).map(|p| p.status)
    }

    pub fn fail(&mut self, err: PatchError) {
        if self.ledger.is_empty() {
            error!("Run {} failed: {}", self.ctx.request_id, err);
        } else {
            warn!("Run {} additional failure: {}", self.ctx.request_id, err);
        }
        self.ledger.record(err);
    }

    pub fn failed(&self) -> bool {
        !self.ledger.is_empty()
    }

    /// Nothing needed doing. PATCH reports this with its own code.
    pub fn nothing_to_do(&mut self) {
        let message = format!(
            "All candidate nodes are already at {}",
            self.ctx.request.target_version
        );
        info!("Run {}: {}", self.ctx.request_id, message);
        if self.ctx.request.task == TaskKind::Patch {
            self.success_code = Some((ErrorCode::NO_ACTION_REQUIRED, message));
        }
    }

    pub async fn finish(mut self) -> PatchResult {
        self.close_stage();

        let (status, code, suggestion) = match self.ledger.primary() {
            Some(err) => (RunStatus::Failed, err.code, Some(err.message.clone())),
            None => match self.success_code.take() {
                Some((code, message)) => (RunStatus::Succeeded, code, Some(message)),
                None => (RunStatus::Succeeded, ErrorCode::PATCH_SUCCESS_EXIT_CODE, None),
            },
        };

        let result = PatchResult {
            request_id: self.ctx.request_id.clone(),
            status,
            code,
            suggestion,
            additional_errors: self.ledger.additional().to_vec(),
            nodes: self.nodes.into_values().collect(),
            stage_timings: self.timings,
        };

        if let Err(e) = self.ctx.database.finish_run(&result).await {
            error!("Unable to store result of {}: {}", result.request_id, e);
        }
        info!(
            "Run {} finished: {} ({})",
            result.request_id,
            result.status.as_str(),
            result.code
        );
        result
    }
}

/// Map a tool outcome to the error reported for the class and task
pub fn tool_error(ctx: &HandlerContext, outcome: &ToolOutcome) -> Option<PatchError> {
    match outcome {
        ToolOutcome::Succeeded => None,
        ToolOutcome::Failed { code, detail }
            if matches!(
                code,
                ErrorCode::PATCHMGR_COMMAND_FAILED | ErrorCode::DOMU_PATCHMGR_COMMAND_FAILED
            ) =>
        {
            Some(PatchError::new(
                ctx.codes().tool_failure(ctx.request.task),
                detail.clone(),
            ))
        }
        ToolOutcome::Failed { code, detail } | ToolOutcome::TimedOut { code, detail } => {
            Some(PatchError::new(*code, detail.clone()))
        }
    }
}

/// Whether any console log for this request already exists on the launch node
pub async fn previously_attempted(
    ctx: &HandlerContext,
    launch: &str,
    nodes: &[String],
    per_node: bool,
) -> Result<bool, PatchError> {
    if per_node {
        for node in nodes {
            if ctx.driver(launch, ctx.artifacts(Some(node))).console_log_exists().await? {
                return Ok(true);
            }
        }
        Ok(false)
    } else {
        ctx.driver(launch, ctx.artifacts(None)).console_log_exists().await
    }
}

/// Precondition checks done right before the tool is launched
pub async fn pre_patch_checks(ctx: &HandlerContext, launch: &str, nodes: &[String]) -> Result<(), PatchError> {
    if ctx.request.task == TaskKind::Patch
        && !ctx.callbacks.condition_holds(READY_FOR_PATCH, nodes).await
    {
        return Err(PatchError::new(
            ErrorCode::PATCH_OPERATION_DID_NOT_START,
            format!(
                "Condition '{}' does not hold for the nodes to patch",
                READY_FOR_PATCH
            ),
        ));
    }

    let class = ctx.class();
    let items = nodes
        .iter()
        .map(|node| {
            let health = ctx.health.clone();
            let launch = launch.to_string();
            let user = ctx.cluster.settings.ssh_user.clone();
            let node = node.clone();
            WorkItem::new(node.clone(), async move {
                let check = health.ssh_reachable(&launch, &node, &user, class).await;
                match check.error_code() {
                    None => Ok(()),
                    Some(code) => Err(ItemFailure::new(code, check.detail())),
                }
            })
        })
        .collect();

    let report = ctx
        .coordinator
        .run("ssh reachability", items)
        .await
        .into_checked()?;
    match report.first_error(ErrorCode::PATCHING_NODE_SSH_CHECK_FAILED) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Grid disk check across storage nodes; any failing node fails the gate
pub async fn griddisk_gate(
    ctx: &HandlerContext,
    hosts: &[String],
    mode: GridDiskMode,
) -> Result<(), PatchError> {
    if hosts.is_empty() {
        return Ok(());
    }
    let results = ctx
        .health
        .grid_disk_consistency(&ctx.coordinator, hosts, mode)
        .await?;
    let failing: Vec<&String> = results
        .iter()
        .filter(|(_, ok)| !**ok)
        .map(|(host, _)| host)
        .collect();
    if failing.is_empty() {
        return Ok(());
    }

    let (code, what) = match mode {
        GridDiskMode::Rolling => (
            ErrorCode::CELL_ASMDEACTIVATION_OUTCOME_ERROR,
            "grid disks are not all ONLINE or SYNCING",
        ),
        GridDiskMode::NonRolling => (
            ErrorCode::CELL_ASM_MODE_STATUS_STILL_ONLINE_ERROR,
            "grid disks cannot be deactivated",
        ),
    };
    Err(PatchError::new(
        code,
        format!(
            "On {}: {}",
            failing
                .iter()
                .map(|h| h.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            what
        ),
    ))
}

/// Drivers launched during the PATCH_MGR stage and how each one ended
pub struct ToolPhase {
    pub runs: Vec<(PatchToolDriver, bool)>,
    pub patched: Vec<String>,
    pub error: Option<PatchError>,
}

impl ToolPhase {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Run the tool once for `nodes`, or once per node in order when `per_node`
/// is set. A per-node sequence stops at the first failure and the nodes it
/// never reached are marked skipped. A console log left
/// by an earlier attempt is resumed instead of relaunched.
pub async fn tool_phase(
    ctx: &HandlerContext,
    run: &mut PatchRun<'_>,
    launch: &str,
    nodes: &[String],
    per_node: bool,
) -> ToolPhase {
    let mut phase = ToolPhase {
        runs: Vec::new(),
        patched: Vec::new(),
        error: None,
    };

    let batches: Vec<(Option<&str>, Vec<String>)> = if per_node {
        nodes.iter().map(|n| (Some(n.as_str()), vec![n.clone()])).collect()
    } else {
        vec![(None, nodes.to_vec())]
    };

    let scales = ctx.request.style.is_rolling() && ctx.request.task.mutates_nodes();
    for (node, batch) in batches {
        let timeout: Duration = ctx
            .settings
            .scaled_patch_timeout(ctx.class(), batch.len(), scales);
        let artifacts = ctx.artifacts(node);
        if let Err(e) = ctx
            .database
            .set_console_log(&ctx.request_id, &artifacts.console_log)
            .await
        {
            warn!("Unable to record console log for {}: {}", ctx.request_id, e);
        }
        let mut driver = ctx.driver(launch, artifacts);
        run.mark_all(&batch, NodeStatus::InProgress, Some("patchmgr running"))
            .await;

        let outcome = match driver.console_log_exists().await {
            Ok(true) => driver.resume(timeout).await,
            Ok(false) => driver.run(&batch, timeout).await,
            Err(e) => ToolOutcome::Failed {
                code: e.code,
                detail: e.message,
            },
        };
        let launched = driver.state() != DriverState::Idle;

        match tool_error(ctx, &outcome) {
            None => {
                run.mark_all(&batch, NodeStatus::Ok, Some("patchmgr completed"))
                    .await;
                phase.patched.extend(batch);
                if launched {
                    phase.runs.push((driver, true));
                }
            }
            Some(err) => {
                run.mark_all(&batch, NodeStatus::Failed, Some(&err.message)).await;
                if launched {
                    phase.runs.push((driver, false));
                }
                phase.error = Some(err);
                break;
            }
        }
    }

    if phase.error.is_some() {
        let untouched: Vec<String> = nodes
            .iter()
            .filter(|n| run.node_status(n) == Some(NodeStatus::Pending))
            .cloned()
            .collect();
        run.mark_all(&untouched, NodeStatus::Skipped, Some("not attempted after an earlier failure"))
            .await;
    }
    phase
}

/// Cleanup for every launched driver. Returns true when any cleanup failed.
pub async fn cleanup_phase(run: &mut PatchRun<'_>, phase: &ToolPhase) -> bool {
    let mut failed = false;
    for (driver, succeeded) in &phase.runs {
        if let Err(e) = driver.cleanup(*succeeded).await {
            failed = true;
            run.fail(e);
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_stays_primary() {
        let mut ledger = ErrorLedger::default();
        assert!(ledger.is_empty());

        ledger.record(PatchError::new(ErrorCode::CELL_PATCH_FAILED, "patch failed"));
        ledger.record(PatchError::new(
            ErrorCode::PATCHMGR_CLEANUP_FAILED_AFTER_PATCH_FAILURE,
            "cleanup failed",
        ));
        ledger.record(PatchError::new(ErrorCode::CELL_FAILED_TO_BRINGUP_VMS, "vms"));

        assert_eq!(ledger.primary().map(|e| e.code), Some(ErrorCode::CELL_PATCH_FAILED));
        assert_eq!(
            ledger.additional(),
            &[
                ErrorCode::PATCHMGR_CLEANUP_FAILED_AFTER_PATCH_FAILURE,
                ErrorCode::CELL_FAILED_TO_BRINGUP_VMS
            ]
        );
    }
}
