//! Per-class patch state machines
//!
//! Every target class has its own handler driving
//! ENVIRONMENT_SET -> IDEMPOTENCY_CHECKED -> ELIGIBILITY_FILTERED ->
//! PRE_PATCH_DATA_GATHERED -> [VM_SHUTDOWN] -> PATCHING -> [VM_STARTUP] ->
//! CLEANUP -> POSTCHECK -> DONE.
//! The handlers share the stage helpers in this module tree and receive their
//! collaborators through `HandlerContext`.

mod callbacks;
mod codes;
mod eligibility;
mod guest_vm;
mod hypervisor;
mod oneoff;
mod postcheck;
mod run;
mod storage;
mod switch;
mod vm_lifecycle;

use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::{Cluster, RunSettings};
use crate::database::Database;
use crate::errors::{ErrorCode, PatchError};
use crate::health::HealthCheckEngine;
use crate::model::{PatchRequest, PatchResult, TargetClass, TaskKind};
use crate::parallel::ParallelCoordinator;
use crate::patch_tool::{PatchCommand, PatchToolDriver, RunArtifacts};
use crate::remote::SharedExecutor;
use crate::version::validate_target;

pub use callbacks::{MarkerFileCallbacks, NoopCallbacks, PatchCallbacks};
pub use codes::ClassCodes;
pub use eligibility::order_candidates;
pub use run::ErrorLedger;

use guest_vm::GuestVmHandler;
use hypervisor::HypervisorHandler;
use run::PatchRun;
use storage::StorageHandler;
use switch::SwitchHandler;

/// Collaborators and inputs of one run
pub struct HandlerContext {
    pub request_id: String,
    pub request: PatchRequest,
    pub cluster: Cluster,
    pub settings: Arc<RunSettings>,
    pub executor: SharedExecutor,
    pub health: Arc<HealthCheckEngine>,
    pub coordinator: ParallelCoordinator,
    pub database: Arc<Database>,
    pub callbacks: Arc<dyn PatchCallbacks>,
}

impl HandlerContext {
    pub fn new(
        request_id: String,
        request: PatchRequest,
        cluster: Cluster,
        settings: Arc<RunSettings>,
        executor: SharedExecutor,
        database: Arc<Database>,
        callbacks: Arc<dyn PatchCallbacks>,
    ) -> Self {
        let health = Arc::new(HealthCheckEngine::new(
            executor.clone(),
            settings.clone(),
            cluster.settings.hypervisor_flavor,
        ));
        let coordinator = ParallelCoordinator::new(&settings);
        Self {
            request_id,
            request,
            cluster,
            settings,
            executor,
            health,
            coordinator,
            database,
            callbacks,
        }
    }

    pub fn class(&self) -> TargetClass {
        self.request.target
    }

    pub fn codes(&self) -> ClassCodes {
        ClassCodes::for_class(self.class())
    }

    /// Wrap an unexpected failure in the class's generic stage code
    pub fn stage_exception(&self, err: impl fmt::Display) -> PatchError {
        PatchError::new(self.codes().exception, format!("Unexpected error: {}", err))
    }

    /// Nodes named by the request, in patch order
    pub fn candidates(&self) -> Result<Vec<String>, PatchError> {
        let class = self.class();
        let configured = self.cluster.nodes_of(class);
        if configured.is_empty() {
            return Err(PatchError::new(
                ErrorCode::INVALID_PATCH_OPTION,
                format!("Cluster {} has no {} nodes configured", self.cluster.name, class),
            ));
        }

        let include = &self.request.include_nodes;
        let selected: Vec<String> = if include.is_empty() {
            configured.to_vec()
        } else {
            if let Some(unknown) = include.iter().find(|n| !configured.contains(n)) {
                return Err(PatchError::new(
                    ErrorCode::INVALID_PATCH_OPTION,
                    format!(
                        "{} is not a {} node of cluster {}",
                        unknown, class, self.cluster.name
                    ),
                ));
            }
            include.clone()
        };

        Ok(order_candidates(class, selected, include.is_empty()))
    }

    /// Host that runs patchmgr. Configured launch nodes come first, then
    /// hypervisors, skipping anything in `exclude`.
    pub fn launch_node(&self, exclude: &[String]) -> Result<String, PatchError> {
        let mut hypervisors = self.cluster.nodes.hypervisors.clone();
        hypervisors.sort();
        self.cluster
            .settings
            .launch_nodes
            .iter()
            .chain(hypervisors.iter())
            .find(|node| !exclude.contains(node))
            .cloned()
            .ok_or_else(|| {
                PatchError::new(
                    ErrorCode::PATCH_OPERATION_DID_NOT_START,
                    format!(
                        "No launch node available in cluster {} outside the nodes being patched",
                        self.cluster.name
                    ),
                )
            })
    }

    pub fn patch_command(&self) -> PatchCommand {
        PatchCommand {
            class: self.class(),
            task: self.request.task,
            style: self.request.style.resolve(),
            target_version: self.request.target_version.clone(),
            iso_repo: self.cluster.settings.iso_repo.clone(),
            exasplice_repo: self.cluster.settings.exasplice_repo.clone(),
        }
    }

    pub fn artifacts(&self, node: Option<&str>) -> RunArtifacts {
        RunArtifacts::new(
            self.cluster.patch_base(self.class()),
            &self.request_id,
            self.class(),
            node,
        )
    }

    pub fn driver(&self, launch_node: &str, artifacts: RunArtifacts) -> PatchToolDriver {
        PatchToolDriver::new(
            self.executor.clone(),
            self.settings.clone(),
            launch_node.to_string(),
            self.patch_command(),
            artifacts,
        )
    }
}

/// Closed set of per-class state machines
pub enum TargetHandler {
    Storage(StorageHandler),
    Hypervisor(HypervisorHandler),
    GuestVm(GuestVmHandler),
    Switch(SwitchHandler),
}

impl TargetHandler {
    pub fn for_class(class: TargetClass) -> Self {
        match class {
            TargetClass::StorageNode => TargetHandler::Storage(StorageHandler),
            TargetClass::Hypervisor => TargetHandler::Hypervisor(HypervisorHandler),
            TargetClass::GuestVm => TargetHandler::GuestVm(GuestVmHandler),
            TargetClass::FabricSwitch => TargetHandler::Switch(SwitchHandler),
        }
    }

    pub fn class(&self) -> TargetClass {
        match self {
            TargetHandler::Storage(_) => TargetClass::StorageNode,
            TargetHandler::Hypervisor(_) => TargetClass::Hypervisor,
            TargetHandler::GuestVm(_) => TargetClass::GuestVm,
            TargetHandler::Switch(_) => TargetClass::FabricSwitch,
        }
    }

    /// Run the request to completion. Every failure ends up in the result;
    /// nothing is returned as an error.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, cluster = %ctx.cluster.name, class = %self.class(), task = %ctx.request.task))]
    pub async fn execute(&self, ctx: &HandlerContext) -> PatchResult {
        let mut run = PatchRun::begin(ctx).await;
        info!(
            "Starting {} on {} nodes of {}",
            ctx.request.task,
            self.class(),
            ctx.cluster.name
        );

        if let Err(e) = self.dispatch(ctx, &mut run).await {
            run.fail(e);
        }
        run.finish().await
    }

    async fn dispatch(&self, ctx: &HandlerContext, run: &mut PatchRun<'_>) -> Result<(), PatchError> {
        ctx.request.validate()?;
        if ctx.request.task.uses_patch_tool() {
            validate_target(&ctx.request.target_version, self.class())?;
        }

        match ctx.request.task {
            TaskKind::Postcheck => postcheck::standalone(ctx, run).await,
            TaskKind::Oneoff | TaskKind::OneoffV2 => oneoff::apply(ctx, run).await,
            _ => match self {
                TargetHandler::Storage(h) => h.drive(ctx, run).await,
                TargetHandler::Hypervisor(h) => h.drive(ctx, run).await,
                TargetHandler::GuestVm(h) => h.drive(ctx, run).await,
                TargetHandler::Switch(h) => h.drive(ctx, run).await,
            },
        }
    }
}
