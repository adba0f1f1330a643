//! ONEOFF and ONEOFF_V2: a script run on every candidate node

use tracing::info;

use super::run::PatchRun;
use super::HandlerContext;
use crate::errors::{ErrorCode, PatchError};
use crate::model::{NodeStatus, OutcomeStatus, RunStage, TaskKind};
use crate::parallel::{ItemFailure, WorkItem};

/// Single-quote `arg` for a POSIX shell
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Command line for the request: the cluster's configured script for ONEOFF,
/// the script carried by the request for ONEOFF_V2
pub fn script_command(ctx: &HandlerContext) -> Result<String, PatchError> {
    match ctx.request.task {
        TaskKind::OneoffV2 => {
            let spec = ctx.request.oneoff.as_ref().ok_or_else(|| {
                PatchError::new(
                    ErrorCode::INVALID_PATCH_OPTION,
                    "ONEOFF_V2 requires a script in the request",
                )
            })?;
            let mut parts = vec![shell_quote(&spec.script)];
            parts.extend(spec.args.iter().map(|a| shell_quote(a)));
            Ok(parts.join(" "))
        }
        _ => ctx
            .cluster
            .settings
            .oneoff_script
            .clone()
            .ok_or_else(|| {
                PatchError::new(
                    ErrorCode::INVALID_PATCH_OPTION,
                    format!("Cluster {} has no one-off script configured", ctx.cluster.name),
                )
            }),
    }
}

pub async fn apply(ctx: &HandlerContext, run: &mut PatchRun<'_>) -> Result<(), PatchError> {
    let command = script_command(ctx)?;
    let candidates = ctx.candidates()?;
    let code = match ctx.request.task {
        TaskKind::OneoffV2 => ErrorCode::ONEOFFV2_APPLY_FAILED,
        _ => ErrorCode::ONEOFF_APPLY_FAILED,
    };

    run.enter(RunStage::PatchMgr).await;
    run.mark_all(&candidates, NodeStatus::InProgress, Some("one-off script running"))
        .await;
    info!("Running '{}' on {} nodes", command, candidates.len());

    let timeout = ctx.settings.patch_timeout(ctx.class());
    let items = candidates
        .iter()
        .map(|node| {
            let executor = ctx.executor.clone();
            let node = node.clone();
            let command = command.clone();
            WorkItem::new(node.clone(), async move {
                match executor.run(&node, &command, timeout).await {
                    Ok(out) if out.success() => Ok(()),
                    Ok(out) => Err(ItemFailure::new(
                        code,
                        format!("exit {}: {}", out.exit_code, out.stderr.trim()),
                    )),
                    Err(e) => Err(ItemFailure::new(code, e.to_string())),
                }
            })
        })
        .collect();

    let report = ctx
        .coordinator
        .with_item_timeout(timeout)
        .run("one-off script", items)
        .await;
    for outcome in &report.outcomes {
        let status = match outcome.status {
            OutcomeStatus::Ok => NodeStatus::Ok,
            _ => NodeStatus::Failed,
        };
        run.mark(&outcome.node, status, outcome.diagnostic.clone()).await;
    }

    let report = report.into_checked()?;
    match report.first_error(code) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
