//! Hypervisor state machine
//!
//! Rolling runs patch one hypervisor at a time from a node outside the set and
//! expect every guest that was running before to be back afterwards.
//! Non-rolling runs stop every guest on the hypervisors being patched, patch
//! them together and start the guests again, including guests a storage run
//! left pending. Every other PATCH or ROLLBACK starts those pending guests
//! before it does anything else, even when no hypervisor needs patching.

use tracing::{info, instrument, warn};

use super::eligibility;
use super::postcheck;
use super::run::{self, PatchRun};
use super::vm_lifecycle::{self, merge_inventory};
use super::HandlerContext;
use crate::database::{PendingVmRestart, VmInventory};
use crate::errors::PatchError;
use crate::health::GridDiskMode;
use crate::model::{RunStage, TargetClass};

pub struct HypervisorHandler;

impl HypervisorHandler {
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub(super) async fn drive(&self, ctx: &HandlerContext, run: &mut PatchRun<'_>) -> Result<(), PatchError> {
        let request = &ctx.request;
        let codes = ctx.codes();
        let candidates = ctx.candidates()?;

        let prepared = eligibility::prepare(ctx, run, &candidates).await?;
        let mut to_patch = prepared.eligibility.to_patch.clone();
        let rolling = request.style.is_rolling();
        let mutating = request.task.mutates_nodes();

        // Non-rolling runs fold pending guests into their own restart
        if mutating && (rolling || to_patch.is_empty()) {
            self.restart_pending(ctx).await?;
        }
        if to_patch.is_empty() {
            run.nothing_to_do();
            return Ok(());
        }
        to_patch.sort();

        let launch = ctx.launch_node(&to_patch)?;
        let resuming = run::previously_attempted(ctx, &launch, &to_patch, rolling).await?;
        let storage = ctx.cluster.nodes_of(TargetClass::StorageNode).to_vec();

        run.enter(RunStage::PrePatch).await;
        let inventory = if resuming {
            info!("Resuming {} from the console logs on {}", ctx.request_id, launch);
            ctx.database
                .load_vm_inventory(&ctx.request_id)
                .await
                .map_err(|e| ctx.stage_exception(e))?
                .unwrap_or_default()
        } else {
            run::pre_patch_checks(ctx, &launch, &to_patch).await?;
            let inventory = vm_lifecycle::running_inventory(ctx, &to_patch, codes.vm_shutdown).await?;
            ctx.database
                .save_vm_inventory(&ctx.request_id, &inventory, false)
                .await
                .map_err(|e| ctx.stage_exception(e))?;
            inventory
        };

        let mut gate_error: Option<PatchError> = None;
        if mutating && !resuming {
            if rolling {
                run::griddisk_gate(ctx, &storage, GridDiskMode::Rolling).await?;
            } else {
                gate_error = match vm_lifecycle::stop_all(ctx, &inventory, codes.vm_shutdown).await {
                    Ok(()) => run::griddisk_gate(ctx, &storage, GridDiskMode::NonRolling)
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
                let phase = run::tool_phase(ctx, run, &launch, &to_patch, rolling).await;
                if let Some(err) = &phase.error {
                    run.fail(err.clone());
                }
                Some(phase)
            }
        };

        if mutating && !rolling {
            run.enter(RunStage::PostPatch).await;
            self.restart_guests(ctx, run, &inventory).await;
        }

        run.enter(RunStage::Cleanup).await;
        if let Some(phase) = &phase {
            run::cleanup_phase(run, phase).await;
        }

        let patched = match &phase {
            Some(phase) if phase.succeeded() => phase.patched.clone(),
            _ => return Ok(()),
        };
        run.enter(RunStage::Postcheck).await;
        postcheck::verify(
            ctx,
            run,
            &launch,
            &patched,
            Some(&prepared.records),
            Some(&inventory),
        )
        .await;
        Ok(())
    }

    /// Start the guests stopped by this run together with any a storage run of
    /// the same cluster left behind
    async fn restart_guests(&self, ctx: &HandlerContext, run: &mut PatchRun<'_>, own: &VmInventory) {
        let pending = match ctx.database.pending_vm_restarts(&ctx.cluster.name).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Unable to read pending VM restarts of {}: {}", ctx.cluster.name, e);
                Vec::new()
            }
        };

        let mut inventory = own.clone();
        for restart in &pending {
            info!(
                "Including guests left stopped by {} in the restart",
                restart.request_id
            );
            merge_inventory(&mut inventory, &restart.inventory);
        }

        match vm_lifecycle::start_all(ctx, &inventory, ctx.codes().vm_startup, false).await {
            Ok(()) => clear_pending(ctx, &pending).await,
            Err(e) => run.fail(e),
        }
    }

    /// Start the guests storage runs of this cluster left stopped, ahead of
    /// the run's own work
    async fn restart_pending(&self, ctx: &HandlerContext) -> Result<(), PatchError> {
        let pending = ctx
            .database
            .pending_vm_restarts(&ctx.cluster.name)
            .await
            .map_err(|e| ctx.stage_exception(e))?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut inventory = VmInventory::new();
        for restart in &pending {
            info!("Starting guests left stopped by {}", restart.request_id);
            merge_inventory(&mut inventory, &restart.inventory);
        }
        vm_lifecycle::start_all(ctx, &inventory, ctx.codes().vm_startup, false).await?;
        clear_pending(ctx, &pending).await;
        Ok(())
    }
}

async fn clear_pending(ctx: &HandlerContext, pending: &[PendingVmRestart]) {
    for restart in pending.iter().filter(|r| r.request_id != ctx.request_id) {
        if let Err(e) = ctx.database.clear_vm_restart(&restart.request_id).await {
            warn!("Unable to clear pending restart of {}: {}", restart.request_id, e);
        }
    }
}
