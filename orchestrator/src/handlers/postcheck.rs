//! Post-patch verification and the standalone POSTCHECK task

use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::time::sleep;
use tracing::{debug, info};

use super::run::PatchRun;
use super::HandlerContext;
use crate::database::VmInventory;
use crate::errors::PatchError;
use crate::model::{NodeRecord, NodeStatus, OutcomeStatus, RunStage, TargetClass, TaskKind};
use crate::parallel::{ItemFailure, WorkItem};
use crate::version::compare_versions;

/// Direction the version must have moved for a task
pub fn expected_ordering(task: TaskKind) -> Ordering {
    match task {
        TaskKind::Patch => Ordering::Greater,
        TaskKind::Rollback => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn effective_before(record: &NodeRecord) -> &str {
    match (&record.overlay_version, record.class) {
        (Some(overlay), TargetClass::GuestVm) => overlay,
        _ => &record.version,
    }
}

/// Check each node and mark it `ok` or `failed`. When `before` is given the
/// version must have moved as the task demands. A node reports the last check
/// that failed.
pub async fn verify(
    ctx: &HandlerContext,
    run: &mut PatchRun<'_>,
    via: &str,
    nodes: &[String],
    before: Option<&BTreeMap<String, NodeRecord>>,
    vms: Option<&VmInventory>,
) {
    if nodes.is_empty() {
        return;
    }
    let class = ctx.class();
    let task = ctx.request.task;
    let codes = ctx.codes();

    if before.is_some() && class == TargetClass::StorageNode && !ctx.settings.postcheck_settle.is_zero() {
        info!(
            "Waiting {}s for storage services to settle before postcheck",
            ctx.settings.postcheck_settle.as_secs()
        );
        sleep(ctx.settings.postcheck_settle).await;
    }

    let items = nodes
        .iter()
        .map(|node| {
            let health = ctx.health.clone();
            let via = via.to_string();
            let node = node.clone();
            let previous = before.and_then(|b| b.get(&node)).cloned();
            let expected_vms = vms.and_then(|v| v.get(&node)).cloned();
            WorkItem::new(node.clone(), async move {
                let mut last: Option<PatchError> = None;

                if !health.ping(&via, &node).await {
                    last = Some(PatchError::new(
                        codes.unreachable,
                        format!("{} does not answer ping from {}", node, via),
                    ));
                }

                if let Some(previous) = &previous {
                    match health.image_version(&node, class).await {
                        Ok(Some(after)) => {
                            let was = effective_before(previous);
                            let now = after.effective(class);
                            let expected = expected_ordering(task);
                            if compare_versions(now, was) != expected {
                                last = Some(PatchError::new(
                                    codes.version_deviation(task),
                                    format!(
                                        "{} is at {} after {} (was {})",
                                        node, now, task, was
                                    ),
                                ));
                            }
                        }
                        Ok(None) => {
                            last = Some(PatchError::new(
                                codes.unreachable,
                                format!("Unable to read the image version of {}", node),
                            ))
                        }
                        Err(e) => last = Some(e),
                    }
                }

                if class != TargetClass::FabricSwitch {
                    let status = health.image_status(&node).await;
                    if !status.succeeded {
                        last = Some(PatchError::new(
                            codes.image_status,
                            format!(
                                "Image status on {} is {}",
                                node,
                                status.status.as_deref().unwrap_or("empty")
                            ),
                        ));
                    }

                    let snapshot = health.service_status(&node, class).await;
                    let healthy = match (&snapshot, &previous) {
                        (None, _) => false,
                        (Some(now), Some(prev)) if !prev.services.is_empty() => prev
                            .services
                            .iter()
                            .filter(|(_, was_running)| **was_running)
                            .all(|(name, _)| now.get(name).copied().unwrap_or(false)),
                        (Some(now), _) => now.values().all(|r| *r),
                    };
                    if !healthy {
                        debug!("Service snapshot on {}: {:?}", node, snapshot);
                        last = Some(PatchError::new(
                            codes.services,
                            format!("Required services are not running on {}", node),
                        ));
                    }
                }

                if let Some(expected) = expected_vms.filter(|v| !v.is_empty()) {
                    let running = health.running_vms(&node).await.unwrap_or_default();
                    let down: Vec<&String> =
                        expected.iter().filter(|g| !running.contains(g)).collect();
                    if !down.is_empty() {
                        last = Some(PatchError::new(
                            codes.vm_startup,
                            format!(
                                "Guests not running on {}: {}",
                                node,
                                down.iter().map(|g| g.as_str()).collect::<Vec<_>>().join(", ")
                            ),
                        ));
                    }
                }

                match last {
                    None => Ok(()),
                    Some(err) => Err(ItemFailure::from(err)),
                }
            })
        })
        .collect();

    let report = ctx.coordinator.run("postcheck", items).await;
    for outcome in &report.outcomes {
        if outcome.status == OutcomeStatus::Ok {
            run.mark(&outcome.node, NodeStatus::Ok, Some("postcheck passed".to_string()))
                .await;
            continue;
        }
        let detail = outcome.diagnostic.clone().unwrap_or_default();
        run.mark(&outcome.node, NodeStatus::Failed, Some(detail.clone()))
            .await;
        run.fail(PatchError::new(outcome.code.unwrap_or(codes.exception), detail));
    }
    if let Err(e) = report.into_checked() {
        run.fail(e);
    }
}

/// POSTCHECK task: health of every candidate without a version comparison
pub async fn standalone(ctx: &HandlerContext, run: &mut PatchRun<'_>) -> Result<(), PatchError> {
    let candidates = ctx.candidates()?;
    let via = ctx.launch_node(&[])?;
    run.enter(RunStage::Postcheck).await;
    verify(ctx, run, &via, &candidates, None, None).await;
    Ok(())
}
