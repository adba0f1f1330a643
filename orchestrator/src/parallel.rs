//! Bounded parallel fan-out over remote hosts
//!
//! Every multi-host step of a run (version gathering, service checks, VM
//! shutdown, grid disk checks) goes through `ParallelCoordinator::run`.
//!
//! # Timers
//!
//! Each work item has its own max-execution-time. An item that exceeds it is
//! recorded as `killed` while the others keep running. The coordinator also
//! holds a join deadline for the whole group. When that expires, every item
//! still outstanding is aborted and the fan-out is reported as `Killed`, which
//! callers must treat as a hard failure. A heartbeat line is logged while
//! items are outstanding.
//!
//! # Shared state
//!
//! Workers only append to one outcome list. It is read back once, after the
//! join, so no caller ever sees a partially written list.

use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, instrument, warn};

use crate::config::RunSettings;
use crate::errors::{ErrorCode, PatchError};
use crate::model::{OutcomeStatus, TaskOutcome};

/// Failure reported by a work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub code: Option<ErrorCode>,
    pub detail: String,
}

impl ItemFailure {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            detail: detail.into(),
        }
    }

    pub fn uncoded(detail: impl Into<String>) -> Self {
        Self {
            code: None,
            detail: detail.into(),
        }
    }
}

impl From<PatchError> for ItemFailure {
    fn from(err: PatchError) -> Self {
        Self {
            code: Some(err.code),
            detail: err.message,
        }
    }
}

pub type ItemResult<T> = Result<T, ItemFailure>;

/// One unit of work bound to a host
pub struct WorkItem<T> {
    node: String,
    future: BoxFuture<'static, ItemResult<T>>,
}

impl<T> WorkItem<T> {
    pub fn new<F>(node: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = ItemResult<T>> + Send + 'static,
    {
        Self {
            node: node.into(),
            future: future.boxed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutStatus {
    Completed,
    Killed,
}

#[derive(Debug)]
pub struct FanOutReport<T> {
    pub label: String,
    pub status: FanOutStatus,
    /// One outcome per item, in submission order
    pub outcomes: Vec<TaskOutcome>,
    /// Values returned by items that finished `ok`
    pub values: HashMap<String, T>,
}

impl<T> FanOutReport<T> {
    pub fn failed(&self) -> Vec<&TaskOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status != OutcomeStatus::Ok)
            .collect()
    }

    pub fn all_ok(&self) -> bool {
        self.status == FanOutStatus::Completed && self.failed().is_empty()
    }

    pub fn outcome(&self, node: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.node == node)
    }

    pub fn failed_nodes(&self) -> Vec<String> {
        self.failed().into_iter().map(|o| o.node.clone()).collect()
    }

    /// First failed item as a coded error. Items that carried no code get
    /// `fallback`.
    pub fn first_error(&self, fallback: ErrorCode) -> Option<PatchError> {
        self.failed().first().map(|outcome| {
            PatchError::new(
                outcome.code.unwrap_or(fallback),
                format!(
                    "{} failed on {}: {}",
                    self.label,
                    outcome.node,
                    outcome.diagnostic.as_deref().unwrap_or("no detail")
                ),
            )
        })
    }

    /// A killed fan-out never degrades to partial success
    pub fn into_checked(self) -> Result<Self, PatchError> {
        match self.status {
            FanOutStatus::Completed => Ok(self),
            FanOutStatus::Killed => Err(PatchError::new(
                ErrorCode::PATCH_REQUEST_TIMEOUT,
                format!(
                    "Parallel step '{}' did not finish within its join timeout; outstanding work was aborted",
                    self.label
                ),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParallelCoordinator {
    max_in_flight: usize,
    item_timeout: Duration,
    join_timeout: Duration,
    heartbeat: Duration,
}

impl ParallelCoordinator {
    pub fn new(settings: &RunSettings) -> Self {
        Self::with_limits(
            settings.max_in_flight,
            settings.item_timeout,
            settings.join_timeout,
            settings.heartbeat,
        )
    }

    pub fn with_limits(
        max_in_flight: usize,
        item_timeout: Duration,
        join_timeout: Duration,
        heartbeat: Duration,
    ) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            item_timeout,
            join_timeout,
            heartbeat: heartbeat.max(Duration::from_millis(10)),
        }
    }

    /// Same limits with a different per-item timeout, for steps such as VM
    /// shutdown that have their own budget
    pub fn with_item_timeout(&self, item_timeout: Duration) -> Self {
        let mut coordinator = self.clone();
        coordinator.item_timeout = item_timeout;
        if coordinator.join_timeout < item_timeout {
            coordinator.join_timeout = item_timeout + self.heartbeat;
        }
        coordinator
    }

    #[instrument(skip(self, items), fields(label = %label, items = items.len()))]
    pub async fn run<T: Send + 'static>(&self, label: &str, items: Vec<WorkItem<T>>) -> FanOutReport<T> {
        let total = items.len();
        let nodes: Vec<String> = items.iter().map(|i| i.node.clone()).collect();
        let recorded: Arc<Mutex<Vec<(usize, TaskOutcome, Option<T>)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(total)));
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));

        let mut handles = Vec::with_capacity(total);
        for (index, item) in items.into_iter().enumerate() {
            let WorkItem { node, future } = item;
            let recorded = recorded.clone();
            let semaphore = semaphore.clone();
            let item_timeout = self.item_timeout;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let entry = match tokio::time::timeout(item_timeout, future).await {
                    Ok(Ok(value)) => (index, TaskOutcome::ok(&node), Some(value)),
                    Ok(Err(failure)) => {
                        debug!("Work item for {} failed: {}", node, failure.detail);
                        (
                            index,
                            TaskOutcome::failed(&node, failure.code, failure.detail),
                            None,
                        )
                    }
                    Err(_) => {
                        warn!(
                            "Work item for {} exceeded its {}s limit",
                            node,
                            item_timeout.as_secs()
                        );
                        (
                            index,
                            TaskOutcome::killed(
                                &node,
                                format!("exceeded item timeout of {:?}", item_timeout),
                            ),
                            None,
                        )
                    }
                };
                recorded.lock().await.push(entry);
            }));
        }

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let join = join_all(handles);
        tokio::pin!(join);
        let deadline = sleep(self.join_timeout);
        tokio::pin!(deadline);
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);

        let status = loop {
            tokio::select! {
                joined = &mut join => {
                    let panicked = joined.iter().filter(|r| r.is_err()).count();
                    if panicked > 0 {
                        error!("{} work items for '{}' panicked", panicked, label);
                    }
                    break FanOutStatus::Completed;
                }
                _ = &mut deadline => {
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    error!(
                        "Parallel step '{}' exceeded its join timeout of {:?}; aborting outstanding work",
                        label, self.join_timeout
                    );
                    break FanOutStatus::Killed;
                }
                _ = heartbeat.tick() => {
                    let done = recorded.lock().await.len();
                    warn!(
                        "Still waiting on {} of {} work items for '{}'",
                        total.saturating_sub(done), total, label
                    );
                }
            }
        };

        let entries = std::mem::take(&mut *recorded.lock().await);
        let mut slots: Vec<Option<(TaskOutcome, Option<T>)>> = (0..total).map(|_| None).collect();
        for (index, outcome, value) in entries {
            slots[index] = Some((outcome, value));
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut values = HashMap::new();
        for (slot, node) in slots.into_iter().zip(nodes) {
            match slot {
                Some((outcome, value)) => {
                    if let Some(value) = value {
                        values.insert(node, value);
                    }
                    outcomes.push(outcome);
                }
                None if status == FanOutStatus::Killed => {
                    outcomes.push(TaskOutcome::killed(node, "aborted at join timeout".to_string()));
                }
                None => outcomes.push(TaskOutcome::failed(
                    node,
                    Some(ErrorCode::INFRA_PATCHING_ONE_OR_MORE_PATCH_REQUEST_EXCEPTION),
                    "work item panicked".to_string(),
                )),
            }
        }

        FanOutReport {
            label: label.to_string(),
            status,
            outcomes,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(item_ms: u64, join_ms: u64) -> ParallelCoordinator {
        ParallelCoordinator::with_limits(
            8,
            Duration::from_millis(item_ms),
            Duration::from_millis(join_ms),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn slow_items_are_killed_individually() {
        let items: Vec<WorkItem<u32>> = (0..5u32)
            .map(|i| {
                WorkItem::new(format!("node{}", i), async move {
                    let delay = if i == 1 || i == 3 { 2_000 } else { 10 };
                    sleep(Duration::from_millis(delay)).await;
                    Ok(i)
                })
            })
            .collect();

        let report = coordinator(200, 5_000).run("sample", items).await;

        assert_eq!(report.status, FanOutStatus::Completed);
        assert_eq!(report.outcomes.len(), 5);
        let killed: Vec<_> = report
            .outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Killed)
            .map(|o| o.node.as_str())
            .collect();
        assert_eq!(killed, vec!["node1", "node3"]);
        assert_eq!(
            report
                .outcomes
                .iter()
                .filter(|o| o.status == OutcomeStatus::Ok)
                .count(),
            3
        );
        assert_eq!(report.values.get("node4"), Some(&4));
        assert!(report.into_checked().is_ok());
    }

    #[tokio::test]
    async fn join_timeout_reports_killed() {
        let items = vec![
            WorkItem::new("fast", async { Ok(()) }),
            WorkItem::new("stuck", async {
                sleep(Duration::from_secs(30)).await;
                Ok(())
            }),
        ];

        let report = coordinator(60_000, 150).run("stuck", items).await;

        assert_eq!(report.status, FanOutStatus::Killed);
        assert_eq!(report.outcome("fast").map(|o| o.status), Some(OutcomeStatus::Ok));
        assert_eq!(
            report.outcome("stuck").map(|o| o.status),
            Some(OutcomeStatus::Killed)
        );
        let err = report.into_checked().unwrap_err();
        assert_eq!(err.code, ErrorCode::PATCH_REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn failures_do_not_stop_other_items() {
        let items = vec![
            WorkItem::new("a", async {
                Err::<(), _>(ItemFailure::new(ErrorCode::CELL_PING_FAILED, "no route"))
            }),
            WorkItem::new("b", async { Ok(()) }),
        ];

        let report = coordinator(1_000, 2_000).run("mixed", items).await;

        assert_eq!(report.status, FanOutStatus::Completed);
        assert!(!report.all_ok());
        assert_eq!(report.failed_nodes(), vec!["a".to_string()]);
        assert_eq!(
            report.outcome("a").and_then(|o| o.code),
            Some(ErrorCode::CELL_PING_FAILED)
        );
    }

    #[tokio::test]
    async fn empty_fan_out_completes() {
        let report = coordinator(100, 100).run::<()>("empty", vec![]).await;
        assert_eq!(report.status, FanOutStatus::Completed);
        assert!(report.outcomes.is_empty());
    }
}
