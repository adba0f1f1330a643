//! Guest VM state machine

use tracing::{info, instrument};

use super::eligibility;
use super::postcheck;
use super::run::{self, PatchRun};
use super::HandlerContext;
use crate::constants::callbacks::PATCH_IN_PROGRESS;
use crate::errors::PatchError;
use crate::model::{RunStage, TaskKind};

pub struct GuestVmHandler;

impl GuestVmHandler {
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub(super) async fn drive(&self, ctx: &HandlerContext, run: &mut PatchRun<'_>) -> Result<(), PatchError> {
        let candidates = ctx.candidates()?;
        let prepared = eligibility::prepare(ctx, run, &candidates).await?;
        let mut to_patch = prepared.eligibility.to_patch.clone();
        if to_patch.is_empty() {
            run.nothing_to_do();
            return Ok(());
        }
        to_patch.sort();

        let launch = ctx.launch_node(&[])?;
        let per_node = ctx.request.style.is_rolling();

        run.enter(RunStage::PrePatch).await;
        if run::previously_attempted(ctx, &launch, &to_patch, per_node).await? {
            info!("Resuming {} from the console logs on {}", ctx.request_id, launch);
        } else {
            run::pre_patch_checks(ctx, &launch, &to_patch).await?;
        }

        run.enter(RunStage::PatchMgr).await;
        let phase = run::tool_phase(ctx, run, &launch, &to_patch, per_node).await;
        if let Some(err) = &phase.error {
            run.fail(err.clone());
        }

        run.enter(RunStage::Cleanup).await;
        run::cleanup_phase(run, &phase).await;

        if ctx.request.task == TaskKind::Patch {
            for node in &phase.patched {
                if let Err(e) = ctx
                    .callbacks
                    .ensure_marker(node, PATCH_IN_PROGRESS, false)
                    .await
                {
                    run.fail(e);
                }
            }
        }

        if !phase.succeeded() {
            return Ok(());
        }
        run.enter(RunStage::Postcheck).await;
        postcheck::verify(ctx, run, &launch, &phase.patched, Some(&prepared.records), None)
            .await;
        Ok(())
    }
}
