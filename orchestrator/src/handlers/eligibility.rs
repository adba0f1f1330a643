//! Pre-patch data gathering and eligibility filtering

use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::run::PatchRun;
use super::HandlerContext;
use crate::errors::{ErrorCode, PatchError};
use crate::health::RollbackProbe;
use crate::model::{
    EligibilityResult, NodeRecord, NodeStatus, Reachability, RunStage, TargetClass, TaskKind,
};
use crate::parallel::{ItemFailure, WorkItem};
use crate::version::{compare_versions, comparison_basis, ComparisonBasis, ImageVersion};

/// Storage sets at least this large are spread out across the patch order
const STORAGE_STRIDE_THRESHOLD: usize = 7;
const STORAGE_STRIDE: usize = 3;

/// Sort candidates. Large storage sets without an explicit include list are
/// taken every third node with wrap-around so neighbours are not patched
/// back to back.
pub fn order_candidates(class: TargetClass, mut nodes: Vec<String>, allow_stride: bool) -> Vec<String> {
    nodes.sort();
    nodes.dedup();
    let total = nodes.len();
    if class != TargetClass::StorageNode || !allow_stride || total < STORAGE_STRIDE_THRESHOLD {
        return nodes;
    }

    let mut chosen = vec![false; total];
    let mut ordered = Vec::with_capacity(total);
    let mut index = 0;
    while ordered.len() < total {
        while chosen[index] {
            index = (index + 1) % total;
        }
        chosen[index] = true;
        ordered.push(nodes[index].clone());
        index = (index + STORAGE_STRIDE) % total;
    }
    ordered
}

pub struct Prepared {
    pub records: BTreeMap<String, NodeRecord>,
    pub eligibility: EligibilityResult,
}

/// GATHER_DATA: read versions and services, or reuse what an earlier attempt
/// of the same request stored, then filter.
pub async fn prepare(
    ctx: &HandlerContext,
    run: &mut PatchRun<'_>,
    candidates: &[String],
) -> Result<Prepared, PatchError> {
    run.enter(RunStage::GatherData).await;

    let stored = ctx
        .database
        .load_precheck_records(&ctx.request_id)
        .await
        .map_err(|e| ctx.stage_exception(e))?;

    let (records, eligibility) = match stored {
        Some(records) => {
            info!(
                "Reusing precheck data of {} nodes from an earlier attempt of {}",
                records.len(),
                ctx.request_id
            );
            let eligibility = filter(ctx, &records, false).await?;
            (records, eligibility)
        }
        None => {
            let records = gather_records(ctx, candidates).await?;
            let eligibility = filter(ctx, &records, true).await?;
            ctx.database
                .save_precheck_records(&ctx.request_id, &records)
                .await
                .map_err(|e| ctx.stage_exception(e))?;
            (records, eligibility)
        }
    };

    run.mark_all(&eligibility.to_patch, NodeStatus::Pending, None)
        .await;
    run.mark_all(
        &eligibility.already_at_version,
        NodeStatus::AlreadyAtVersion,
        Some(&ctx.request.target_version),
    )
    .await;
    run.mark_all(
        &eligibility.ineligible,
        NodeStatus::Ineligible,
        Some("deferred by node count limit"),
    )
    .await;

    info!(
        "Eligibility for {}: {} to patch, {} already at version, {} deferred",
        ctx.request_id,
        eligibility.to_patch.len(),
        eligibility.already_at_version.len(),
        eligibility.ineligible.len()
    );

    Ok(Prepared {
        records: records
            .into_iter()
            .map(|r| (r.hostname.clone(), r))
            .collect(),
        eligibility,
    })
}

/// Version and service snapshot of each candidate, in candidate order
pub async fn gather_records(ctx: &HandlerContext, candidates: &[String]) -> Result<Vec<NodeRecord>, PatchError> {
    let class = ctx.class();
    let items = candidates
        .iter()
        .map(|node| {
            let health = ctx.health.clone();
            let node = node.clone();
            WorkItem::new(node.clone(), async move {
                let version = health.image_version(&node, class).await?;
                let record = match version {
                    Some(version) => {
                        // A failed service query counts as unreachable
                        let services = health.service_status(&node, class).await;
                        NodeRecord {
                            hostname: node.clone(),
                            class,
                            version: version.base,
                            overlay_version: version.overlay,
                            reachability: if services.is_some() {
                                Reachability::Reachable
                            } else {
                                Reachability::Unreachable
                            },
                            services: services.unwrap_or_default(),
                        }
                    }
                    None => NodeRecord {
                        hostname: node.clone(),
                        class,
                        version: String::new(),
                        overlay_version: None,
                        reachability: Reachability::Unreachable,
                        services: BTreeMap::new(),
                    },
                };
                Ok::<_, ItemFailure>(record)
            })
        })
        .collect();

    let mut report = ctx
        .coordinator
        .run("gather node data", items)
        .await
        .into_checked()?;
    if let Some(err) = report.first_error(ctx.codes().exception) {
        return Err(err);
    }

    Ok(candidates
        .iter()
        .filter_map(|node| report.values.remove(node))
        .collect())
}

fn image_of(record: &NodeRecord) -> ImageVersion {
    ImageVersion {
        base: record.version.clone(),
        overlay: record.overlay_version.clone(),
    }
}

/// Partition gathered records. `live_checks` adds the remote checks (image
/// status, services, rollback probes) that only make sense before anything
/// was touched.
pub async fn filter(
    ctx: &HandlerContext,
    records: &[NodeRecord],
    live_checks: bool,
) -> Result<EligibilityResult, PatchError> {
    let class = ctx.class();
    let task = ctx.request.task;
    let codes = ctx.codes();
    let target = ctx.request.target_version.as_str();

    let unreachable: Vec<&str> = records
        .iter()
        .filter(|r| r.reachability == Reachability::Unreachable)
        .map(|r| r.hostname.as_str())
        .collect();
    if !unreachable.is_empty() {
        return Err(PatchError::new(
            codes.unreachable,
            format!("Nodes not reachable: {}", unreachable.join(", ")),
        ));
    }

    let mut result = EligibilityResult::default();
    for record in records {
        let image = image_of(record);
        let at_target = match comparison_basis(&image, class, task) {
            ComparisonBasis::RollbackNoop => {
                info!(
                    "{} has no live update to roll back (overlay equals base {})",
                    record.hostname, record.version
                );
                true
            }
            ComparisonBasis::Version(current) => {
                let ordering = compare_versions(current, target);
                match task {
                    TaskKind::Patch | TaskKind::PrereqCheck => ordering != Ordering::Less,
                    TaskKind::Rollback | TaskKind::RollbackPrereqCheck => {
                        ordering != Ordering::Greater
                    }
                    _ => false,
                }
            }
        };
        if at_target {
            result.already_at_version.push(record.hostname.clone());
        } else {
            result.to_patch.push(record.hostname.clone());
        }
    }

    if live_checks {
        if matches!(task, TaskKind::Patch | TaskKind::PrereqCheck) && class != TargetClass::FabricSwitch {
            check_image_status(ctx, &result.to_patch).await?;
        }
        if task.is_rollback() {
            check_rollback_possible(ctx, records, &result.to_patch).await?;
        }
        if !task.is_prereq() {
            check_services(ctx, &result.already_at_version).await?;
        }
    }

    if let Some(limit) = ctx.request.node_limit {
        if result.to_patch.len() > limit {
            result.ineligible = result.to_patch.split_off(limit);
        }
    }

    Ok(result)
}

async fn check_image_status(ctx: &HandlerContext, nodes: &[String]) -> Result<(), PatchError> {
    let items = nodes
        .iter()
        .map(|node| {
            let health = ctx.health.clone();
            let node = node.clone();
            WorkItem::new(node.clone(), async move {
                let status = health.image_status(&node).await;
                if status.succeeded {
                    Ok(())
                } else {
                    Err(ItemFailure::new(
                        ErrorCode::IMAGE_INFO_STATUS_EMPTY_OR_INVALID,
                        format!(
                            "image status is {}; {}",
                            status.status.as_deref().unwrap_or("empty"),
                            status.diagnostics.join(" | ")
                        ),
                    ))
                }
            })
        })
        .collect();

    let report = ctx
        .coordinator
        .run("image status", items)
        .await
        .into_checked()?;
    match report.first_error(ErrorCode::IMAGE_INFO_STATUS_EMPTY_OR_INVALID) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Nodes left out as already at version must still be healthy
async fn check_services(ctx: &HandlerContext, nodes: &[String]) -> Result<(), PatchError> {
    let class = ctx.class();
    let code = ctx.codes().services;
    let items = nodes
        .iter()
        .map(|node| {
            let health = ctx.health.clone();
            let node = node.clone();
            WorkItem::new(node.clone(), async move {
                if health.services_running(&node, class).await {
                    Ok(())
                } else {
                    Err(ItemFailure::new(code, "required services are not running"))
                }
            })
        })
        .collect();

    let report = ctx
        .coordinator
        .run("service status", items)
        .await
        .into_checked()?;
    match report.first_error(code) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Any node that cannot roll back aborts the whole rollback
async fn check_rollback_possible(
    ctx: &HandlerContext,
    records: &[NodeRecord],
    nodes: &[String],
) -> Result<(), PatchError> {
    let class = ctx.class();
    let codes = ctx.codes();
    let items = records
        .iter()
        .filter(|r| nodes.contains(&r.hostname))
        .map(|record| {
            let health = ctx.health.clone();
            let node = record.hostname.clone();
            let image = image_of(record);
            WorkItem::new(node.clone(), async move {
                let probe = health.rollback_probe(&node, class, &image).await;
                match probe {
                    RollbackProbe::Possible { .. } => Ok(()),
                    RollbackProbe::Unknown(_) if class == TargetClass::StorageNode => Err(
                        ItemFailure::new(
                            ErrorCode::UNABLE_TO_GET_INACTIVE_PARTITION_IMAGE_VERSION,
                            probe.describe(),
                        ),
                    ),
                    _ => Err(ItemFailure::new(codes.rollback_blocked, probe.describe())),
                }
            })
        })
        .collect();

    let report = ctx
        .coordinator
        .run("rollback probe", items)
        .await
        .into_checked()?;
    let blocked = report.failed_nodes();
    if !blocked.is_empty() {
        warn!("Rollback blocked on {}", blocked.join(", "));
    }
    match report.first_error(codes.rollback_blocked) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("cell{:02}", i)).collect()
    }

    #[test]
    fn small_sets_keep_sorted_order() {
        let mut nodes = hosts(4);
        nodes.reverse();
        assert_eq!(
            order_candidates(TargetClass::StorageNode, nodes, true),
            hosts(4)
        );
    }

    #[test]
    fn seven_cells_are_strided_by_three() {
        let ordered = order_candidates(TargetClass::StorageNode, hosts(7), true);
        assert_eq!(
            ordered,
            vec!["cell01", "cell04", "cell07", "cell03", "cell06", "cell02", "cell05"]
        );
    }

    #[test]
    fn stride_skips_already_chosen_nodes() {
        let ordered = order_candidates(TargetClass::StorageNode, hosts(9), true);
        assert_eq!(ordered.len(), 9);
        assert_eq!(&ordered[..4], &["cell01", "cell04", "cell07", "cell02"]);
        let mut sorted = ordered.clone();
        sorted.sort();
        assert_eq!(sorted, hosts(9));
    }

    #[test]
    fn include_list_disables_stride() {
        assert_eq!(
            order_candidates(TargetClass::StorageNode, hosts(8), false),
            hosts(8)
        );
        assert_eq!(order_candidates(TargetClass::Hypervisor, hosts(8), true), hosts(8));
    }
}
