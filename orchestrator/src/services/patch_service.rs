//! Background execution of patch requests
//!
//! Requests are stored, locked per (cluster, target class) and handed to the
//! class handler on a spawned task. Runs left unfinished by a previous process
//! are picked up again on startup; the handlers find their console logs and
//! resume instead of relaunching.

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{Cluster, Config, RunSettings};
use crate::database::Database;
use crate::errors::{ConfigError, ErrorCode, PatchError};
use crate::handlers::{HandlerContext, NoopCallbacks, PatchCallbacks, TargetHandler};
use crate::model::{PatchRequest, PatchResult, RunStatus};
use crate::operation_tracker::{OperationKey, OperationTracker};
use crate::remote::{executor_for, SharedExecutor};

#[derive(Clone)]
pub struct PatchService {
    config: Arc<Config>,
    settings: Arc<RunSettings>,
    database: Arc<Database>,
    tracker: OperationTracker,
    executor: Option<SharedExecutor>,
    callbacks: Arc<dyn PatchCallbacks>,
}

impl PatchService {
    pub fn new(config: Arc<Config>, database: Arc<Database>, tracker: OperationTracker) -> Self {
        let settings = Arc::new(RunSettings::from_config(&config));
        Self {
            config,
            settings,
            database,
            tracker,
            executor: None,
            callbacks: Arc::new(NoopCallbacks),
        }
    }

    /// Use one executor for every cluster instead of the configured transport
    pub fn with_executor(mut self, executor: SharedExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn PatchCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    fn cluster(&self, name: &str) -> Result<Cluster, PatchError> {
        self.config.cluster(name).cloned().ok_or_else(|| {
            PatchError::new(
                ErrorCode::INVALID_PATCH_OPTION,
                ConfigError::UnknownCluster {
                    cluster: name.to_string(),
                }
                .to_string(),
            )
        })
    }

    fn context(&self, request_id: &str, request: &PatchRequest, cluster: Cluster) -> HandlerContext {
        let executor = self
            .executor
            .clone()
            .unwrap_or_else(|| executor_for(&cluster, &self.settings));
        HandlerContext::new(
            request_id.to_string(),
            request.clone(),
            cluster,
            self.settings.clone(),
            executor,
            self.database.clone(),
            self.callbacks.clone(),
        )
    }

    /// Lock the target, store the request and start it in the background.
    /// Returns the request id.
    #[instrument(skip(self, request), fields(cluster = %request.cluster, target = %request.target, task = %request.task))]
    pub async fn submit(&self, request: PatchRequest) -> Result<String, PatchError> {
        let request_id = Uuid::new_v4().to_string();
        let key = self.acquire(&request_id, &request).await?;

        if let Err(e) = self.database.create_run(&request_id, &request).await {
            self.tracker.finish_operation(&key).await;
            return Err(PatchError::new(
                ErrorCode::INFRA_PATCHING_ONE_OR_MORE_PATCH_REQUEST_EXCEPTION,
                format!("Unable to store request: {}", e),
            ));
        }

        info!("Accepted {} {} on {} as {}", request.task, request.target, key, request_id);
        let service = self.clone();
        let id = request_id.clone();
        tokio::spawn(async move {
            service.execute_locked(&id, request, key).await;
        });
        Ok(request_id)
    }

    /// Store and run a request to completion on the current task
    pub async fn run_now(&self, request: PatchRequest) -> Result<PatchResult, PatchError> {
        let request_id = Uuid::new_v4().to_string();
        let key = self.acquire(&request_id, &request).await?;
        if let Err(e) = self.database.create_run(&request_id, &request).await {
            self.tracker.finish_operation(&key).await;
            return Err(PatchError::new(
                ErrorCode::INFRA_PATCHING_ONE_OR_MORE_PATCH_REQUEST_EXCEPTION,
                format!("Unable to store request: {}", e),
            ));
        }
        Ok(self.execute_locked(&request_id, request, key).await)
    }

    /// Re-run a stored request under its original id
    pub async fn rerun(&self, request_id: &str) -> Result<PatchResult, PatchError> {
        let state = self
            .database
            .get_run(request_id)
            .await
            .map_err(|e| {
                PatchError::new(
                    ErrorCode::INFRA_PATCHING_ONE_OR_MORE_PATCH_REQUEST_EXCEPTION,
                    e.to_string(),
                )
            })?
            .ok_or_else(|| {
                PatchError::new(
                    ErrorCode::INVALID_PATCH_OPTION,
                    format!("Unknown request {}", request_id),
                )
            })?;
        let key = self.acquire(request_id, &state.request).await?;
        Ok(self.execute_locked(request_id, state.request, key).await)
    }

    /// Resubmit runs a previous process left pending or running
    pub async fn resume_unfinished(&self) -> Result<usize> {
        let runs = self.database.unfinished_runs().await?;
        let mut resumed = 0;
        for run in runs {
            let key = match self.acquire(&run.request_id, &run.request).await {
                Ok(key) => key,
                Err(e) => {
                    warn!("Not resuming {}: {}", run.request_id, e);
                    continue;
                }
            };
            info!(
                "Resuming {} ({} {} on {}, last stage {})",
                run.request_id,
                run.request.task,
                run.request.target,
                run.cluster,
                run.stage.map(|s| s.as_str()).unwrap_or("none")
            );
            let service = self.clone();
            tokio::spawn(async move {
                service.execute_locked(&run.request_id, run.request, key).await;
            });
            resumed += 1;
        }
        Ok(resumed)
    }

    async fn acquire(&self, request_id: &str, request: &PatchRequest) -> Result<OperationKey, PatchError> {
        self.cluster(&request.cluster)?;
        let key = OperationKey::new(request.cluster.clone(), request.target);
        self.tracker
            .try_start_operation(&key, request.task.as_str(), request_id)
            .await?;
        Ok(key)
    }

    /// Run the handler on its own task so a panic is reported as a coded
    /// failure, then release the lock
    async fn execute_locked(&self, request_id: &str, request: PatchRequest, key: OperationKey) -> PatchResult {
        let result = match self.cluster(&request.cluster) {
            Ok(cluster) => {
                let ctx = self.context(request_id, &request, cluster);
                let handle = tokio::spawn(async move {
                    let handler = TargetHandler::for_class(ctx.request.target);
                    handler.execute(&ctx).await
                });
                match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!("Handler for {} aborted: {}", request_id, e);
                        self.record_failure(
                            request_id,
                            PatchError::new(
                                ErrorCode::INFRA_PATCHING_ONE_OR_MORE_PATCH_REQUEST_EXCEPTION,
                                format!("Handler aborted: {}", e),
                            ),
                        )
                        .await
                    }
                }
            }
            Err(e) => self.record_failure(request_id, e).await,
        };

        self.tracker.finish_operation(&key).await;
        result
    }

    async fn record_failure(&self, request_id: &str, err: PatchError) -> PatchResult {
        let nodes = self
            .database
            .node_progress(request_id)
            .await
            .unwrap_or_default();
        let result = PatchResult {
            request_id: request_id.to_string(),
            status: RunStatus::Failed,
            code: err.code,
            suggestion: Some(err.message),
            additional_errors: Vec::new(),
            nodes,
            stage_timings: BTreeMap::new(),
        };
        if let Err(e) = self.database.finish_run(&result).await {
            error!("Unable to store failure of {}: {}", request_id, e);
        }
        result
    }
}
