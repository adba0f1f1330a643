//! Config, in-memory database, lock tracker and patch service wired to a
//! `FakeFleet`

use orchestrator::config::Config;
use orchestrator::database::Database;
use orchestrator::handlers::PatchCallbacks;
use orchestrator::operation_tracker::OperationTracker;
use orchestrator::remote::SharedExecutor;
use orchestrator::services::PatchService;
use std::sync::Arc;

use super::fake_fleet::FakeFleet;
use super::test_config::{ClusterBuilder, TestConfig, TestConfigBuilder};
use super::test_data::{hosts, CLUSTER};

pub struct Harness {
    pub fleet: Arc<FakeFleet>,
    pub database: Arc<Database>,
    pub tracker: OperationTracker,
    pub service: PatchService,
    test_config: TestConfig,
}

impl Harness {
    pub async fn new(cluster: ClusterBuilder) -> Self {
        Self::with_fleet(cluster, FakeFleet::new()).await
    }

    pub async fn with_fleet(cluster: ClusterBuilder, fleet: FakeFleet) -> Self {
        let test_config = TestConfigBuilder::new()
            .with_cluster(CLUSTER, cluster)
            .build()
            .await;
        let database = Arc::new(
            Database::new(":memory:")
                .await
                .expect("Failed to create in-memory database"),
        );
        let tracker = OperationTracker::new();
        let fleet = Arc::new(fleet);
        let executor: SharedExecutor = fleet.clone();
        let service = PatchService::new(test_config.config.clone(), database.clone(), tracker.clone())
            .with_executor(executor);

        Self {
            fleet,
            database,
            tracker,
            service,
            test_config,
        }
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn PatchCallbacks>) -> Self {
        self.service = self.service.with_callbacks(callbacks);
        self
    }

    pub fn config(&self) -> Arc<Config> {
        self.test_config.config.clone()
    }
}

/// Two hypervisors, two guests, two cells and two switches
pub fn standard_cluster() -> ClusterBuilder {
    ClusterBuilder::new()
        .hypervisors(&[hosts::HV1, hosts::HV2])
        .guest_vms(&[hosts::GUEST1, hosts::GUEST2])
        .storage(&[hosts::CELL_A, hosts::CELL_B])
        .switches(&[hosts::SWITCH1, hosts::SWITCH2])
}
