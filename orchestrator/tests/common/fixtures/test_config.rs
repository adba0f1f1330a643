//! Test configuration builder for creating test configs programmatically

use orchestrator::config::{Config, ConfigManager};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Builder for a config directory holding `main.toml` and cluster files
pub struct TestConfigBuilder {
    temp_dir: TempDir,
    main_toml: String,
    clusters: Vec<(String, ClusterBuilder)>,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self {
            temp_dir,
            main_toml: fast_main_toml(),
            clusters: Vec::new(),
        }
    }

    pub fn with_main_toml(mut self, main_toml: &str) -> Self {
        self.main_toml = main_toml.to_string();
        self
    }

    pub fn with_cluster(mut self, name: &str, cluster: ClusterBuilder) -> Self {
        self.clusters.push((name.to_string(), cluster));
        self
    }

    /// Write the files without loading them
    pub fn write(self) -> (TempDir, PathBuf) {
        let config_dir = self.temp_dir.path().join("config");
        fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        fs::write(config_dir.join("main.toml"), &self.main_toml).expect("Failed to write main.toml");
        for (name, cluster) in &self.clusters {
            fs::write(config_dir.join(format!("{}.toml", name)), cluster.to_toml())
                .expect("Failed to write cluster config");
        }
        (self.temp_dir, config_dir)
    }

    /// Write the files and load them through `ConfigManager`
    pub async fn build(self) -> TestConfig {
        let (temp_dir, config_dir) = self.write();
        let manager = ConfigManager::new(config_dir.to_string_lossy().to_string())
            .await
            .expect("Failed to load test config");
        TestConfig {
            _temp_dir: temp_dir,
            config_dir,
            config: manager.get_current_config(),
        }
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestConfig {
    _temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub config: Arc<Config>,
}

/// Timeouts short enough for tests; polling intervals of zero
pub fn fast_main_toml() -> String {
    r#"
host = "127.0.0.1"
port = 0
database_path = ":memory:"
command_timeout_seconds = 5
connect_timeout_seconds = 1
postcheck_settle_seconds = 0
operation_cleanup_hours = 48

[parallel]
max_in_flight = 8
item_timeout_seconds = 20
join_timeout_seconds = 40
heartbeat_seconds = 30

[patchmgr]
poll_interval_seconds = 0
storage_timeout_seconds = 10
hypervisor_timeout_seconds = 10
guest_timeout_seconds = 10
switch_timeout_seconds = 10
cleanup_retries = 1
cleanup_retry_delay_seconds = 0

[vm]
operation_timeout_seconds = 3
poll_interval_seconds = 0
"#
    .to_string()
}

/// One cluster file
#[derive(Clone)]
pub struct ClusterBuilder {
    hypervisors: Vec<String>,
    guest_vms: Vec<String>,
    storage: Vec<String>,
    switches: Vec<String>,
    launch_nodes: Vec<String>,
    transport: String,
    api_key: Option<String>,
    oneoff_script: Option<String>,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn toml_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("\"{}\"", i)).collect();
    format!("[{}]", quoted.join(", "))
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self {
            hypervisors: Vec::new(),
            guest_vms: Vec::new(),
            storage: Vec::new(),
            switches: Vec::new(),
            launch_nodes: Vec::new(),
            transport: "ssh".to_string(),
            api_key: None,
            oneoff_script: None,
        }
    }

    pub fn hypervisors(mut self, names: &[&str]) -> Self {
        self.hypervisors = owned(names);
        self
    }

    pub fn guest_vms(mut self, names: &[&str]) -> Self {
        self.guest_vms = owned(names);
        self
    }

    pub fn storage(mut self, names: &[&str]) -> Self {
        self.storage = owned(names);
        self
    }

    pub fn switches(mut self, names: &[&str]) -> Self {
        self.switches = owned(names);
        self
    }

    pub fn launch_nodes(mut self, names: &[&str]) -> Self {
        self.launch_nodes = owned(names);
        self
    }

    pub fn agent_transport(mut self, api_key: Option<&str>) -> Self {
        self.transport = "agent".to_string();
        self.api_key = api_key.map(str::to_string);
        self
    }

    pub fn oneoff_script(mut self, script: &str) -> Self {
        self.oneoff_script = Some(script.to_string());
        self
    }

    pub fn to_toml(&self) -> String {
        let mut toml = format!(
            r#"[cluster]
transport = "{}"
ssh_user = "root"
launch_nodes = {}
dbnode_patch_base = "/u01/patches/dbnode"
cell_patch_base = "/u01/patches/cell"
switch_patch_base = "/u01/patches/switch"
iso_repo = "/u01/repo/exadata_ol8.zip"
exasplice_repo = "/u01/repo/exasplice.zip"
"#,
            self.transport,
            toml_list(&self.launch_nodes)
        );
        if let Some(key) = &self.api_key {
            toml.push_str(&format!("api_key = \"{}\"\n", key));
        }
        if let Some(script) = &self.oneoff_script {
            toml.push_str(&format!("oneoff_script = \"{}\"\n", script));
        }
        toml.push_str(&format!(
            "\n[nodes]\nhypervisors = {}\nguest_vms = {}\nstorage = {}\nswitches = {}\n",
            toml_list(&self.hypervisors),
            toml_list(&self.guest_vms),
            toml_list(&self.storage),
            toml_list(&self.switches)
        ));
        toml
    }
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
