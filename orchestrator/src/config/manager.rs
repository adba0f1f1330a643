use super::{Cluster, ClusterConfigFile, Config};
use anyhow::{anyhow, Result};
use glob::glob;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::Transport;

pub struct ConfigManager {
    current_config: Arc<Config>,
}

impl ConfigManager {
    pub async fn new(config_dir: String) -> Result<Self> {
        let config = Self::load_configuration(&config_dir).await?;
        Ok(Self {
            current_config: Arc::new(config),
        })
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }

    async fn load_configuration(config_dir: &str) -> Result<Config> {
        let main_config_path = format!("{}/main.toml", config_dir);
        let main_config_content = fs::read_to_string(&main_config_path)
            .await
            .map_err(|e| anyhow!("Failed to read main config {}: {}", main_config_path, e))?;

        let mut config: Config = toml::from_str(&main_config_content)
            .map_err(|e| anyhow!("Failed to parse main config: {}", e))?;

        let pattern = format!("{}/*.toml", config_dir);
        let mut clusters = HashMap::new();

        for entry in glob(&pattern).map_err(|e| anyhow!("Glob pattern error: {}", e))? {
            let path = entry.map_err(|e| anyhow!("Glob entry error: {}", e))?;
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("Invalid filename"))?;

            if filename == "main.toml" {
                continue;
            }

            let cluster_name = filename
                .strip_suffix(".toml")
                .ok_or_else(|| anyhow!("Invalid config filename: {}", filename))?;

            debug!("Loading cluster config: {}", path.display());

            let content = fs::read_to_string(&path)
                .await
                .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;

            let file: ClusterConfigFile = toml::from_str(&content)
                .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;

            Self::validate_cluster(cluster_name, &file)?;

            clusters.insert(
                cluster_name.to_string(),
                Cluster {
                    name: cluster_name.to_string(),
                    settings: file.cluster,
                    nodes: file.nodes,
                },
            );
        }

        config.clusters = clusters;

        let node_count: usize = config
            .clusters
            .values()
            .map(|c| {
                c.nodes.hypervisors.len()
                    + c.nodes.guest_vms.len()
                    + c.nodes.storage.len()
                    + c.nodes.switches.len()
            })
            .sum();

        info!(
            "Loaded {} clusters with {} nodes",
            config.clusters.len(),
            node_count
        );

        Ok(config)
    }

    fn validate_cluster(name: &str, file: &ClusterConfigFile) -> Result<()> {
        if file.cluster.transport == Transport::Agent && file.cluster.api_key.is_none() {
            return Err(anyhow!(
                "Cluster {} uses the agent transport but has no api_key",
                name
            ));
        }
        if file.cluster.launch_nodes.is_empty() && file.nodes.hypervisors.is_empty() {
            warn!(
                "Cluster {} has no launch nodes and no hypervisors; patch tool runs will fail",
                name
            );
        }
        Ok(())
    }
}

/// Config directory from `ORCHESTRATOR_CONFIG_DIR`, defaulting to `config`
pub fn resolve_config_dir() -> String {
    std::env::var("ORCHESTRATOR_CONFIG_DIR").unwrap_or_else(|_| "config".to_string())
}
