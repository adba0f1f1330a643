use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::parsers;
use super::types::{GridDiskMode, ImageStatusCheck, RollbackProbe, ServiceSnapshot, SshCheck};
use crate::config::{HypervisorFlavor, RunSettings};
use crate::constants::{griddisk, image, services, vm};
use crate::errors::{PatchError, RemoteError};
use crate::model::TargetClass;
use crate::parallel::{ParallelCoordinator, WorkItem};
use crate::remote::{CommandOutput, SharedExecutor};
use crate::version::{compare_versions, ImageVersion};

/// Remote checks against one host or a set of hosts.
///
/// Connectivity problems are logged and reported as a negative result.
/// Contract violations, such as a node reporting no image version, are
/// returned as errors.
pub struct HealthCheckEngine {
    executor: SharedExecutor,
    settings: Arc<RunSettings>,
    flavor: HypervisorFlavor,
    cell_service_failures: Mutex<HashMap<String, u32>>,
}

impl HealthCheckEngine {
    pub fn new(executor: SharedExecutor, settings: Arc<RunSettings>, flavor: HypervisorFlavor) -> Self {
        Self {
            executor,
            settings,
            flavor,
            cell_service_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &SharedExecutor {
        &self.executor
    }

    pub fn flavor(&self) -> HypervisorFlavor {
        self.flavor
    }

    async fn exec(&self, host: &str, command: &str) -> Result<CommandOutput, RemoteError> {
        self.executor
            .run(host, command, self.settings.command_timeout)
            .await
    }

    /// Installed image version. `Ok(None)` means the host could not be reached.
    pub async fn image_version(
        &self,
        host: &str,
        class: TargetClass,
    ) -> Result<Option<ImageVersion>, PatchError> {
        let result = match class {
            TargetClass::FabricSwitch => self.exec(host, image::SWITCH_VERSION).await.map(|out| {
                let raw = parsers::switch_version(&out.stdout).unwrap_or_default();
                CommandOutput {
                    exit_code: out.exit_code,
                    stdout: raw,
                    stderr: out.stderr,
                }
            }),
            TargetClass::StorageNode => self.exec(host, image::VERSION).await,
            TargetClass::Hypervisor | TargetClass::GuestVm => {
                match self.exec(host, image::VERSION_LIVE_UPDATE).await {
                    Ok(out) if out.success() => Ok(out),
                    Ok(_) => self.exec(host, image::VERSION).await,
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(out) => ImageVersion::parse(&out.stdout).map(Some),
            Err(e) => {
                warn!("Unable to read image version on {}: {}", host, e);
                Ok(None)
            }
        }
    }

    /// Version of the inactive partition on a storage node
    pub async fn inactive_version(&self, host: &str) -> Result<Option<String>, RemoteError> {
        let out = self.exec(host, image::INACTIVE_VERSION).await?;
        let version = out
            .first_line()
            .filter(|v| !v.eq_ignore_ascii_case(image::UNDEFINED))
            .map(str::to_string);
        Ok(version.filter(|_| out.success()))
    }

    pub async fn rollback_probe(
        &self,
        host: &str,
        class: TargetClass,
        active: &ImageVersion,
    ) -> RollbackProbe {
        match class {
            TargetClass::StorageNode => match self.inactive_version(host).await {
                Ok(Some(inactive)) => {
                    if compare_versions(&inactive, &active.base).is_lt() {
                        RollbackProbe::Possible {
                            backup_version: Some(inactive),
                        }
                    } else {
                        RollbackProbe::SameAsActive
                    }
                }
                Ok(None) => RollbackProbe::NotAvailable,
                Err(e) => {
                    warn!("Rollback probe failed on {}: {}", host, e);
                    RollbackProbe::Unknown(e.to_string())
                }
            },
            TargetClass::Hypervisor | TargetClass::GuestVm => {
                match self.exec(host, image::ROLLBACK_PROBE).await {
                    Ok(out) => parsers::rollback_probe_from_exit(out.exit_code, &out.stdout),
                    Err(e) => {
                        warn!("Rollback probe failed on {}: {}", host, e);
                        RollbackProbe::Unknown(e.to_string())
                    }
                }
            }
            TargetClass::FabricSwitch => RollbackProbe::Possible {
                backup_version: None,
            },
        }
    }

    pub async fn image_status(&self, host: &str) -> ImageStatusCheck {
        let out = match self.exec(host, image::STATUS).await {
            Ok(out) => out,
            Err(e) => {
                warn!("Unable to read image status on {}: {}", host, e);
                return ImageStatusCheck {
                    succeeded: false,
                    status: None,
                    diagnostics: vec![e.to_string()],
                };
            }
        };

        let status = out.first_line().map(str::to_string);
        if parsers::image_status_ok(&out.stdout) {
            return ImageStatusCheck {
                succeeded: true,
                status,
                diagnostics: vec![],
            };
        }

        let diagnostics = match self.exec(host, image::DIAGNOSTICS).await {
            Ok(diag) => diag.lines().take(20).map(str::to_string).collect(),
            Err(e) => vec![format!("unable to collect diagnostics: {}", e)],
        };
        warn!(
            "Image status on {} is {:?}; {} diagnostic lines collected",
            host,
            status,
            diagnostics.len()
        );

        ImageStatusCheck {
            succeeded: false,
            status,
            diagnostics,
        }
    }

    /// Required services for the class and whether each one is running.
    /// `None` when the host could not be queried.
    pub async fn service_status(&self, host: &str, class: TargetClass) -> Option<ServiceSnapshot> {
        let (command, required, crs) = match class {
            TargetClass::StorageNode => (services::CELL_STATUS, services::CELL_REQUIRED, false),
            TargetClass::Hypervisor => (services::DBSERVER_STATUS, services::DBSERVER_REQUIRED, false),
            TargetClass::GuestVm => (services::CRS_CHECK, services::CRS_REQUIRED, true),
            TargetClass::FabricSwitch => return Some(BTreeMap::new()),
        };

        match self.exec(host, command).await {
            Ok(out) => Some(if crs {
                parsers::parse_crs_lines(&out.stdout, required)
            } else {
                parsers::parse_status_lines(&out.stdout, required)
            }),
            Err(e) => {
                warn!("Unable to read services on {}: {}", host, e);
                None
            }
        }
    }

    /// Short-circuit form of `service_status`
    pub async fn services_running(&self, host: &str, class: TargetClass) -> bool {
        let running = self
            .service_status(host, class)
            .await
            .map(|snapshot| snapshot.values().all(|r| *r))
            .unwrap_or(false);

        if !running && class == TargetClass::StorageNode {
            if let Ok(mut failures) = self.cell_service_failures.lock() {
                let count = failures.entry(host.to_string()).or_insert(0);
                *count += 1;
                warn!("Cell services not running on {} ({} failures so far)", host, count);
            }
        }
        running
    }

    pub fn cell_service_failures(&self, host: &str) -> u32 {
        self.cell_service_failures
            .lock()
            .map(|failures| failures.get(host).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Grid disk state on each storage node. A failing node gets one cell
    /// service restart and a second look before it is reported as failed.
    pub async fn grid_disk_consistency(
        &self,
        coordinator: &ParallelCoordinator,
        hosts: &[String],
        mode: GridDiskMode,
    ) -> Result<BTreeMap<String, bool>, PatchError> {
        let timeout = self.settings.command_timeout;
        let items = hosts
            .iter()
            .map(|host| {
                let executor = self.executor.clone();
                let host = host.clone();
                WorkItem::new(host.clone(), async move {
                    Ok(griddisk_check_with_restart(&executor, &host, mode, timeout).await)
                })
            })
            .collect();

        let report = coordinator
            .run("grid disk consistency", items)
            .await
            .into_checked()?;

        Ok(hosts
            .iter()
            .map(|h| (h.clone(), report.values.get(h).copied().unwrap_or(false)))
            .collect())
    }

    /// Passwordless SSH from the launch node to a target node
    pub async fn ssh_reachable(&self, launch: &str, host: &str, user: &str, class: TargetClass) -> SshCheck {
        let probe = match class {
            TargetClass::FabricSwitch => "'show version'",
            _ => "uptime",
        };
        let command = format!(
            "ssh -o BatchMode=yes -o ConnectTimeout={} {}@{} {}",
            self.settings.connect_timeout.as_secs().max(1),
            user,
            host,
            probe
        );
        match self.exec(launch, &command).await {
            Ok(out) => {
                let check = parsers::classify_ssh(out.exit_code, &out.stderr);
                if !check.is_reachable() {
                    warn!("{} is not reachable over ssh from {}: {}", host, launch, check.detail());
                }
                check
            }
            Err(e) => {
                warn!("Launch node {} unavailable for ssh check: {}", launch, e);
                SshCheck::Unreachable(e.to_string())
            }
        }
    }

    /// ICMP reachability of `host` as seen from `via`
    pub async fn ping(&self, via: &str, host: &str) -> bool {
        let command = format!("ping -c 1 -W 5 {}", host);
        match self.exec(via, &command).await {
            Ok(out) => out.success(),
            Err(e) => {
                debug!("Ping of {} via {} failed: {}", host, via, e);
                false
            }
        }
    }

    /// Guest VMs currently running on a hypervisor
    pub async fn running_vms(&self, host: &str) -> Option<Vec<String>> {
        let command = match self.flavor {
            HypervisorFlavor::Kvm => vm::KVM_LIST_RUNNING,
            HypervisorFlavor::Ovm => vm::OVM_LIST_RUNNING,
        };
        match self.exec(host, command).await {
            Ok(out) => Some(parsers::parse_vm_list(&out.stdout)),
            Err(e) => {
                warn!("Unable to list VMs on {}: {}", host, e);
                None
            }
        }
    }
}

async fn griddisk_query(
    executor: &SharedExecutor,
    host: &str,
    mode: GridDiskMode,
    timeout: Duration,
) -> bool {
    let command = match mode {
        GridDiskMode::Rolling => griddisk::ROLLING,
        GridDiskMode::NonRolling => griddisk::NON_ROLLING,
    };
    match executor.run(host, command, timeout).await {
        Ok(out) if out.success() => match mode {
            GridDiskMode::Rolling => parsers::griddisks_rolling_ok(&out.stdout),
            GridDiskMode::NonRolling => parsers::griddisks_deactivation_ok(&out.stdout),
        },
        Ok(out) => {
            warn!("Grid disk query on {} exited with {}", host, out.exit_code);
            false
        }
        Err(e) => {
            warn!("Grid disk query on {} failed: {}", host, e);
            false
        }
    }
}

async fn griddisk_check_with_restart(
    executor: &SharedExecutor,
    host: &str,
    mode: GridDiskMode,
    timeout: Duration,
) -> bool {
    if griddisk_query(executor, host, mode, timeout).await {
        return true;
    }

    info!("Grid disk check failed on {}; restarting cell services once", host);
    match executor.run(host, services::CELL_RESTART_ALL, timeout).await {
        Ok(out) if out.success() => griddisk_query(executor, host, mode, timeout).await,
        Ok(out) => {
            warn!("Cell service restart on {} exited with {}", host, out.exit_code);
            false
        }
        Err(e) => {
            warn!("Cell service restart on {} failed: {}", host, e);
            false
        }
    }
}
