pub mod manager;
pub mod settings;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::TargetClass;

pub use manager::ConfigManager;
pub use settings::RunSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub patchmgr: PatchmgrConfig,
    #[serde(default)]
    pub vm: VmConfig,
    #[serde(default = "default_postcheck_settle")]
    pub postcheck_settle_seconds: u64,
    #[serde(default = "default_operation_cleanup_hours")]
    pub operation_cleanup_hours: i64,
    // Populated from individual cluster config files
    #[serde(skip)]
    pub clusters: HashMap<String, Cluster>,
}

fn default_database_path() -> String {
    "data/orchestrator.db".to_string()
}

fn default_command_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_postcheck_settle() -> u64 {
    60
}

fn default_operation_cleanup_hours() -> i64 {
    48
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_item_timeout")]
    pub item_timeout_seconds: u64,
    #[serde(default = "default_join_timeout")]
    pub join_timeout_seconds: u64,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_seconds: u64,
}

fn default_max_in_flight() -> usize {
    50
}

fn default_item_timeout() -> u64 {
    1800
}

fn default_join_timeout() -> u64 {
    3600
}

fn default_heartbeat() -> u64 {
    60
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            item_timeout_seconds: default_item_timeout(),
            join_timeout_seconds: default_join_timeout(),
            heartbeat_seconds: default_heartbeat(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchmgrConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_storage_timeout")]
    pub storage_timeout_seconds: u64,
    #[serde(default = "default_hypervisor_timeout")]
    pub hypervisor_timeout_seconds: u64,
    #[serde(default = "default_guest_timeout")]
    pub guest_timeout_seconds: u64,
    #[serde(default = "default_switch_timeout")]
    pub switch_timeout_seconds: u64,
    /// Applied to rolling runs of 6 to 9 nodes
    #[serde(default = "default_medium_multiplier")]
    pub medium_batch_multiplier: f64,
    /// Applied to rolling runs of 10 or more nodes
    #[serde(default = "default_large_multiplier")]
    pub large_batch_multiplier: f64,
    #[serde(default = "default_cleanup_retries")]
    pub cleanup_retries: u32,
    #[serde(default = "default_cleanup_retry_delay")]
    pub cleanup_retry_delay_seconds: u64,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_storage_timeout() -> u64 {
    6 * 3600
}

fn default_hypervisor_timeout() -> u64 {
    5 * 3600
}

fn default_guest_timeout() -> u64 {
    5 * 3600
}

fn default_switch_timeout() -> u64 {
    3 * 3600
}

fn default_medium_multiplier() -> f64 {
    1.5
}

fn default_large_multiplier() -> f64 {
    2.0
}

fn default_cleanup_retries() -> u32 {
    3
}

fn default_cleanup_retry_delay() -> u64 {
    30
}

impl Default for PatchmgrConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            storage_timeout_seconds: default_storage_timeout(),
            hypervisor_timeout_seconds: default_hypervisor_timeout(),
            guest_timeout_seconds: default_guest_timeout(),
            switch_timeout_seconds: default_switch_timeout(),
            medium_batch_multiplier: default_medium_multiplier(),
            large_batch_multiplier: default_large_multiplier(),
            cleanup_retries: default_cleanup_retries(),
            cleanup_retry_delay_seconds: default_cleanup_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmConfig {
    #[serde(default = "default_vm_timeout")]
    pub operation_timeout_seconds: u64,
    #[serde(default = "default_vm_poll")]
    pub poll_interval_seconds: u64,
}

fn default_vm_timeout() -> u64 {
    1800
}

fn default_vm_poll() -> u64 {
    30
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            operation_timeout_seconds: default_vm_timeout(),
            poll_interval_seconds: default_vm_poll(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Ssh,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorFlavor {
    #[default]
    Kvm,
    Ovm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub transport: Transport,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    pub ssh_identity_file: Option<String>,
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    pub api_key: Option<String>,
    #[serde(default)]
    pub hypervisor_flavor: HypervisorFlavor,
    #[serde(default)]
    pub launch_nodes: Vec<String>,
    pub dbnode_patch_base: String,
    pub cell_patch_base: String,
    pub switch_patch_base: Option<String>,
    pub iso_repo: Option<String>,
    pub exasplice_repo: Option<String>,
    pub oneoff_script: Option<String>,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_agent_port() -> u16 {
    8745
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeLists {
    #[serde(default)]
    pub hypervisors: Vec<String>,
    #[serde(default)]
    pub guest_vms: Vec<String>,
    #[serde(default)]
    pub storage: Vec<String>,
    #[serde(default)]
    pub switches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfigFile {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub nodes: NodeLists,
}

/// A cluster as used at run time: connection settings plus its node inventory
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub name: String,
    pub settings: ClusterConfig,
    pub nodes: NodeLists,
}

impl Cluster {
    pub fn nodes_of(&self, class: TargetClass) -> &[String] {
        match class {
            TargetClass::Hypervisor => &self.nodes.hypervisors,
            TargetClass::GuestVm => &self.nodes.guest_vms,
            TargetClass::StorageNode => &self.nodes.storage,
            TargetClass::FabricSwitch => &self.nodes.switches,
        }
    }

    /// Patch base directory holding the unzipped tool for a class
    pub fn patch_base(&self, class: TargetClass) -> &str {
        match class {
            TargetClass::Hypervisor | TargetClass::GuestVm => &self.settings.dbnode_patch_base,
            TargetClass::StorageNode => &self.settings.cell_patch_base,
            TargetClass::FabricSwitch => self
                .settings
                .switch_patch_base
                .as_deref()
                .unwrap_or(&self.settings.cell_patch_base),
        }
    }
}

impl Config {
    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.get(name)
    }
}
