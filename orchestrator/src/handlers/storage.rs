//! Storage node state machine
//!
//! One patchmgr run covers every storage node to patch, and the operation
//! style is handed to the tool. Rolling runs are gated on grid disk
//! redundancy. Non-rolling runs take the whole cluster down: every guest VM on
//! every hypervisor is stopped and the grid disks must be ready for
//! deactivation before the tool starts.

use tracing::{info, instrument, warn};

use super::eligibility;
use super::postcheck;
use super::run::{self, PatchRun};
use super::vm_lifecycle::{self, restart_required};
use super::HandlerContext;
use crate::database::VmInventory;
use crate::errors::PatchError;
use crate::health::GridDiskMode;
use crate::model::{RunStage, TargetClass};

pub struct StorageHandler;

impl StorageHandler {
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub(super) async fn drive(&self, ctx: &HandlerContext, run: &mut PatchRun<'_>) -> Result<(), PatchError> {
        let request = &ctx.request;
        let codes = ctx.codes();
        let candidates = ctx.candidates()?;
        let launch = ctx.launch_node(&[])?;

        let resuming = run::previously_attempted(ctx, &launch, &[], false).await?;
        if resuming {
            info!(
                "Console log for {} found on {}; resuming instead of relaunching",
                ctx.request_id, launch
            );
        }

        let prepared = eligibility::prepare(ctx, run, &candidates).await?;
        let to_patch = prepared.eligibility.to_patch.clone();
        if to_patch.is_empty() {
            run.nothing_to_do();
            return Ok(());
        }

        run.enter(RunStage::PrePatch).await;
        let mutating = request.task.mutates_nodes();
        let rolling = request.style.is_rolling();
        let hypervisors = ctx.cluster.nodes_of(TargetClass::Hypervisor).to_vec();
        let mut inventory = VmInventory::new();
        let mut gate_error: Option<PatchError> = None;

        if resuming {
            inventory = ctx
                .database
                .load_vm_inventory(&ctx.request_id)
                .await
                .map_err(|e| ctx.stage_exception(e))?
                .unwrap_or_default();
        } else {
            run::pre_patch_checks(ctx, &launch, &to_patch).await?;
            if mutating && rolling {
                run::griddisk_gate(ctx, &to_patch, GridDiskMode::Rolling).await?;
            } else if mutating {
                inventory =
                    vm_lifecycle::running_inventory(ctx, &hypervisors, codes.vm_shutdown).await?;
                ctx.database
                    .save_vm_inventory(&ctx.request_id, &inventory, false)
                    .await
                    .map_err(|e| ctx.stage_exception(e))?;
                gate_error = match vm_lifecycle::stop_all(ctx, &inventory, codes.vm_shutdown).await {
                    Ok(()) => run::griddisk_gate(ctx, &to_patch, GridDiskMode::NonRolling)
                        .await
                        .err(),
                    Err(e) => Some(e),
                };
            }
        }

        let phase = match gate_error {
            Some(err) => {
                run.fail(err);
                None
            }
            None => {
                run.enter(RunStage::PatchMgr).await;
                let phase = run::tool_phase(ctx, run, &launch, &to_patch, false).await;
                if let Some(err) = &phase.error {
                    run.fail(err.clone());
                }
                Some(phase)
            }
        };
        let patch_failed = phase.as_ref().map_or(true, |p| !p.succeeded());

        run.enter(RunStage::PostPatch).await;
        let mut vms_restarted = false;
        if !inventory.is_empty() && restart_required(request.is_subset(), patch_failed, false) {
            self.restart_vms(ctx, run, &inventory).await;
            vms_restarted = true;
        }

        run.enter(RunStage::Cleanup).await;
        let cleanup_failed = match &phase {
            Some(phase) => run::cleanup_phase(run, phase).await,
            None => false,
        };
        if !inventory.is_empty() && !vms_restarted {
            if cleanup_failed {
                self.restart_vms(ctx, run, &inventory).await;
            } else {
                info!("Guest VM restart left to the hypervisor run of {}", ctx.cluster.name);
                if let Err(e) = ctx
                    .database
                    .save_vm_inventory(&ctx.request_id, &inventory, true)
                    .await
                {
                    run.fail(ctx.stage_exception(e));
                }
            }
        }

        if patch_failed {
            return Ok(());
        }
        run.enter(RunStage::Postcheck).await;
        postcheck::verify(ctx, run, &launch, &to_patch, Some(&prepared.records), None).await;
        Ok(())
    }

    async fn restart_vms(&self, ctx: &HandlerContext, run: &mut PatchRun<'_>, inventory: &VmInventory) {
        if let Err(e) = vm_lifecycle::start_all(ctx, inventory, ctx.codes().vm_startup, true).await {
            warn!("Guest VM restart after storage patching failed: {}", e);
            run.fail(e);
        }
    }
}
