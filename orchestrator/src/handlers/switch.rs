//! Fabric switch state machine. One patchmgr run covers all switches; there
//! are no guests to move and no grid disks to check.

use tracing::{info, instrument};

use super::eligibility;
use super::postcheck;
use super::run::{self, PatchRun};
use super::HandlerContext;
use crate::errors::PatchError;
use crate::model::RunStage;

pub struct SwitchHandler;

impl SwitchHandler {
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub(super) async fn drive(&self, ctx: &HandlerContext, run: &mut PatchRun<'_>) -> Result<(), PatchError> {
        let candidates = ctx.candidates()?;
        let prepared = eligibility::prepare(ctx, run, &candidates).await?;
        let to_patch = prepared.eligibility.to_patch.clone();
        if to_patch.is_empty() {
            run.nothing_to_do();
            return Ok(());
        }

        let launch = ctx.launch_node(&[])?;
        run.enter(RunStage::PrePatch).await;
        if run::previously_attempted(ctx, &launch, &[], false).await? {
            info!("Resuming {} from the console log on {}", ctx.request_id, launch);
        } else {
            run::pre_patch_checks(ctx, &launch, &to_patch).await?;
        }

        run.enter(RunStage::PatchMgr).await;
        let phase = run::tool_phase(ctx, run, &launch, &to_patch, false).await;
        if let Some(err) = &phase.error {
            run.fail(err.clone());
        }

        run.enter(RunStage::Cleanup).await;
        run::cleanup_phase(run, &phase).await;

        if !phase.succeeded() {
            return Ok(());
        }
        run.enter(RunStage::Postcheck).await;
        postcheck::verify(ctx, run, &launch, &phase.patched, Some(&prepared.records), None)
            .await;
        Ok(())
    }
}
