use std::time::Duration;

use super::Config;
use crate::model::TargetClass;

/// Timeouts and thresholds for one run, built once from `Config` and shared
/// read-only by every collaborator of that run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_in_flight: usize,
    pub item_timeout: Duration,
    pub join_timeout: Duration,
    pub heartbeat: Duration,
    pub patchmgr_poll_interval: Duration,
    pub storage_timeout: Duration,
    pub hypervisor_timeout: Duration,
    pub guest_timeout: Duration,
    pub switch_timeout: Duration,
    pub medium_batch_multiplier: f64,
    pub large_batch_multiplier: f64,
    pub cleanup_retries: u32,
    pub cleanup_retry_delay: Duration,
    pub vm_operation_timeout: Duration,
    pub vm_poll_interval: Duration,
    pub postcheck_settle: Duration,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            command_timeout: Duration::from_secs(config.command_timeout_seconds),
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds),
            max_in_flight: config.parallel.max_in_flight.max(1),
            item_timeout: Duration::from_secs(config.parallel.item_timeout_seconds),
            join_timeout: Duration::from_secs(config.parallel.join_timeout_seconds),
            heartbeat: Duration::from_secs(config.parallel.heartbeat_seconds.max(1)),
            patchmgr_poll_interval: Duration::from_secs(config.patchmgr.poll_interval_seconds),
            storage_timeout: Duration::from_secs(config.patchmgr.storage_timeout_seconds),
            hypervisor_timeout: Duration::from_secs(config.patchmgr.hypervisor_timeout_seconds),
            guest_timeout: Duration::from_secs(config.patchmgr.guest_timeout_seconds),
            switch_timeout: Duration::from_secs(config.patchmgr.switch_timeout_seconds),
            medium_batch_multiplier: config.patchmgr.medium_batch_multiplier,
            large_batch_multiplier: config.patchmgr.large_batch_multiplier,
            cleanup_retries: config.patchmgr.cleanup_retries.max(1),
            cleanup_retry_delay: Duration::from_secs(config.patchmgr.cleanup_retry_delay_seconds),
            vm_operation_timeout: Duration::from_secs(config.vm.operation_timeout_seconds),
            vm_poll_interval: Duration::from_secs(config.vm.poll_interval_seconds),
            postcheck_settle: Duration::from_secs(config.postcheck_settle_seconds),
        }
    }

    pub fn patch_timeout(&self, class: TargetClass) -> Duration {
        match class {
            TargetClass::StorageNode => self.storage_timeout,
            TargetClass::Hypervisor => self.hypervisor_timeout,
            TargetClass::GuestVm => self.guest_timeout,
            TargetClass::FabricSwitch => self.switch_timeout,
        }
    }

    /// Per-class timeout scaled by batch size. Only rolling runs that change
    /// the image scale, since they take one node at a time.
    pub fn scaled_patch_timeout(&self, class: TargetClass, nodes: usize, scales: bool) -> Duration {
        let base = self.patch_timeout(class);
        if !scales {
            return base;
        }
        match nodes {
            0..=5 => base,
            6..=9 => base.mul_f64(self.medium_batch_multiplier),
            _ => base.mul_f64(self.large_batch_multiplier),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        let config: Config = Config {
            host: "0.0.0.0".to_string(),
            port: 8096,
            database_path: String::new(),
            command_timeout_seconds: 300,
            connect_timeout_seconds: 10,
            parallel: Default::default(),
            patchmgr: Default::default(),
            vm: Default::default(),
            postcheck_settle_seconds: 60,
            operation_cleanup_hours: 48,
            clusters: Default::default(),
        };
        Self::from_config(&config)
    }
}
