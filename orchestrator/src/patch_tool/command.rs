//! patchmgr command lines and artifact paths

use crate::constants::patchmgr::{BINARY, CONSOLE_LOG, LOG_DIR_PREFIX};
use crate::model::{OperationStyle, TargetClass, TaskKind};
use crate::version::is_exasplice;

/// Paths owned by one tool run. Every name is derived from the request id
/// (and the node, for per-node runs) so a retry finds the same files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    pub patch_base: String,
    pub log_dir: String,
    pub console_log: String,
    pub node_list: String,
}

impl RunArtifacts {
    pub fn new(patch_base: &str, request_id: &str, class: TargetClass, node: Option<&str>) -> Self {
        let base = patch_base.trim_end_matches('/');
        let scope = match node {
            Some(node) => format!("{}_{}", request_id, node),
            None => request_id.to_string(),
        };
        let log_dir = format!("{}/{}{}", base, LOG_DIR_PREFIX, scope);
        Self {
            patch_base: base.to_string(),
            console_log: format!("{}/{}", log_dir, CONSOLE_LOG),
            node_list: format!("{}/{}_{}_nodes.txt", base, scope, class.artifact_tag()),
            log_dir,
        }
    }
}

/// Everything needed to compose one patchmgr invocation
#[derive(Debug, Clone)]
pub struct PatchCommand {
    pub class: TargetClass,
    pub task: TaskKind,
    pub style: OperationStyle,
    pub target_version: String,
    pub iso_repo: Option<String>,
    pub exasplice_repo: Option<String>,
}

impl PatchCommand {
    fn class_flag(&self) -> &'static str {
        match self.class {
            TargetClass::Hypervisor | TargetClass::GuestVm => "--dbnodes",
            TargetClass::StorageNode => "--cells",
            TargetClass::FabricSwitch => "--roceswitches",
        }
    }

    fn operation_flags(&self) -> Option<&'static str> {
        match (self.class, self.task) {
            (TargetClass::StorageNode, TaskKind::PrereqCheck) => Some("--patch_check_prereq"),
            (TargetClass::StorageNode, TaskKind::Patch) => Some("--patch"),
            (TargetClass::StorageNode, TaskKind::RollbackPrereqCheck) => Some("--rollback_check_prereq"),
            (TargetClass::StorageNode, TaskKind::Rollback) => Some("--rollback"),
            (TargetClass::Hypervisor | TargetClass::GuestVm, TaskKind::PrereqCheck)
            | (TargetClass::Hypervisor | TargetClass::GuestVm, TaskKind::RollbackPrereqCheck) => {
                Some("--precheck")
            }
            (TargetClass::Hypervisor | TargetClass::GuestVm, TaskKind::Patch) => Some("--upgrade"),
            (TargetClass::Hypervisor | TargetClass::GuestVm, TaskKind::Rollback) => Some("--rollback"),
            (TargetClass::FabricSwitch, TaskKind::PrereqCheck) => Some("--upgrade --roceswitch-precheck"),
            (TargetClass::FabricSwitch, TaskKind::Patch) => Some("--upgrade"),
            (TargetClass::FabricSwitch, TaskKind::RollbackPrereqCheck) => {
                Some("--downgrade --roceswitch-precheck")
            }
            (TargetClass::FabricSwitch, TaskKind::Rollback) => Some("--downgrade"),
            _ => None,
        }
    }

    fn repo_flags(&self) -> Option<String> {
        let dbnodes = matches!(self.class, TargetClass::Hypervisor | TargetClass::GuestVm);
        if !dbnodes || !matches!(self.task, TaskKind::PrereqCheck | TaskKind::Patch) {
            return None;
        }
        if is_exasplice(&self.target_version) {
            self.exasplice_repo
                .as_ref()
                .map(|repo| format!("--exasplice_repo {}", repo))
        } else {
            self.iso_repo.as_ref().map(|repo| {
                format!(
                    "--iso_repo {} --target_version {}",
                    repo, self.target_version
                )
            })
        }
    }

    /// Full background invocation, or `None` when the task does not run the tool
    pub fn invocation(&self, artifacts: &RunArtifacts) -> Option<String> {
        let operation = self.operation_flags()?;
        let mut parts = vec![
            format!("cd {}", artifacts.patch_base),
            "&&".to_string(),
            BINARY.to_string(),
            self.class_flag().to_string(),
            artifacts.node_list.clone(),
            operation.to_string(),
        ];
        if let Some(repo) = self.repo_flags() {
            parts.push(repo);
        }
        if self.task.mutates_nodes()
            && self.style.is_rolling()
            && self.class != TargetClass::FabricSwitch
        {
            parts.push("--rolling".to_string());
        }
        parts.push(format!("--log_dir {}", artifacts.log_dir));
        parts.push(format!("</dev/null &> {} &", artifacts.console_log));
        Some(parts.join(" "))
    }

    /// Cleanup sub-command; switches have none
    pub fn cleanup(&self, artifacts: &RunArtifacts) -> Option<String> {
        if self.class == TargetClass::FabricSwitch {
            return None;
        }
        Some(format!(
            "cd {} && {} {} {} --cleanup --log_dir {}",
            artifacts.patch_base,
            BINARY,
            self.class_flag(),
            artifacts.node_list,
            artifacts.log_dir
        ))
    }
}

/// Command that writes the node list (sorted, one per line)
pub fn node_list_command(artifacts: &RunArtifacts, nodes: &[String]) -> String {
    let mut sorted = nodes.to_vec();
    sorted.sort();
    sorted.dedup();
    format!(
        "mkdir -p {} && printf '%s\\n' {} > {}",
        artifacts.log_dir,
        sorted.join(" "),
        artifacts.node_list
    )
}

/// Exit status reported in the console log, e.g. `Exit status:0`
pub fn parse_exit_status(output: &str) -> Option<i32> {
    output.lines().rev().find_map(|line| {
        let lower = line.to_ascii_lowercase();
        let pos = lower.find("exit status")?;
        let rest = line[pos + "exit status".len()..].trim_start_matches(|c: char| c == ':' || c.is_whitespace());
        let digits: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '-')
            .collect();
        digits.parse().ok()
    })
}
