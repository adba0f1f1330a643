//! Guest VM shutdown and startup around non-rolling patches

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{info, instrument, warn};

use super::HandlerContext;
use crate::config::{HypervisorFlavor, RunSettings};
use crate::constants::{services, vm};
use crate::database::VmInventory;
use crate::errors::{ErrorCode, PatchError};
use crate::health::HealthCheckEngine;
use crate::parallel::{ItemFailure, WorkItem};

/// The three conditions under which a storage run restarts the VMs it shut
/// down itself instead of leaving them to the hypervisor run.
pub fn restart_required(subset_requested: bool, patch_failed: bool, cleanup_failed: bool) -> bool {
    subset_requested || patch_failed || cleanup_failed
}

/// Union of two inventories
pub fn merge_inventory(into: &mut VmInventory, other: &VmInventory) {
    for (host, vms) in other {
        let entry = into.entry(host.clone()).or_default();
        for vm in vms {
            if !entry.contains(vm) {
                entry.push(vm.clone());
            }
        }
        entry.sort();
    }
}

fn stop_command(flavor: HypervisorFlavor, guest: &str) -> String {
    match flavor {
        HypervisorFlavor::Kvm => format!("{} {}", vm::KVM_SHUTDOWN, guest),
        HypervisorFlavor::Ovm => format!("{} {}", vm::OVM_SHUTDOWN, guest),
    }
}

fn start_command(flavor: HypervisorFlavor, guest: &str) -> String {
    match flavor {
        HypervisorFlavor::Kvm => format!("{} {}", vm::KVM_START, guest),
        HypervisorFlavor::Ovm => format!(
            "{} {}/{}/vm.cfg",
            vm::OVM_CREATE,
            vm::OVM_IMAGE_DIR,
            guest
        ),
    }
}

/// Running guests on every host. A host that cannot be listed fails the step.
pub async fn running_inventory(
    ctx: &HandlerContext,
    hosts: &[String],
    code: ErrorCode,
) -> Result<VmInventory, PatchError> {
    let items = hosts
        .iter()
        .map(|host| {
            let health = ctx.health.clone();
            let host = host.clone();
            WorkItem::new(host.clone(), async move {
                health
                    .running_vms(&host)
                    .await
                    .ok_or_else(|| ItemFailure::new(code, "unable to list running VMs"))
            })
        })
        .collect();

    let report = ctx
        .coordinator
        .run("list running VMs", items)
        .await
        .into_checked()?;
    if let Some(err) = report.first_error(code) {
        return Err(err);
    }
    Ok(report.values.into_iter().collect())
}

async fn wait_for(
    health: &HealthCheckEngine,
    settings: &RunSettings,
    host: &str,
    guests: &[String],
    running: bool,
) -> Result<(), Vec<String>> {
    let deadline = Instant::now() + settings.vm_operation_timeout;
    loop {
        let current: BTreeSet<String> = health
            .running_vms(host)
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();
        let pending: Vec<String> = guests
            .iter()
            .filter(|g| current.contains(*g) != running)
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(pending);
        }
        sleep(settings.vm_poll_interval).await;
    }
}

/// Shut down every guest in `inventory` and wait until none is running
#[instrument(skip_all, fields(hosts = inventory.len()))]
pub async fn stop_all(ctx: &HandlerContext, inventory: &VmInventory, code: ErrorCode) -> Result<(), PatchError> {
    let flavor = ctx.cluster.settings.hypervisor_flavor;
    let items = inventory
        .iter()
        .filter(|(_, guests)| !guests.is_empty())
        .map(|(host, guests)| {
            let health = ctx.health.clone();
            let settings = ctx.settings.clone();
            let host = host.clone();
            let guests = guests.clone();
            WorkItem::new(host.clone(), async move {
                for guest in &guests {
                    info!("Shutting down {} on {}", guest, host);
                    if let Err(e) = health
                        .executor()
                        .run(&host, &stop_command(flavor, guest), settings.command_timeout)
                        .await
                    {
                        warn!("Shutdown of {} on {} failed: {}", guest, host, e);
                    }
                }
                wait_for(&health, &settings, &host, &guests, false)
                    .await
                    .map_err(|still| {
                        ItemFailure::new(code, format!("still running: {}", still.join(", ")))
                    })
            })
        })
        .collect();

    let coordinator = ctx
        .coordinator
        .with_item_timeout(ctx.settings.vm_operation_timeout + ctx.settings.command_timeout);
    let report = coordinator.run("VM shutdown", items).await.into_checked()?;
    match report.first_error(code) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Start every guest in `inventory` that is not running and wait for all of
/// them. With `dbserver_services`, KVM hosts first get their esnp and edv
/// services started; failures there are only logged.
#[instrument(skip_all, fields(hosts = inventory.len()))]
pub async fn start_all(
    ctx: &HandlerContext,
    inventory: &VmInventory,
    code: ErrorCode,
    dbserver_services: bool,
) -> Result<(), PatchError> {
    let flavor = ctx.cluster.settings.hypervisor_flavor;
    let start_services = dbserver_services && flavor == HypervisorFlavor::Kvm;
    let items = inventory
        .iter()
        .filter(|(_, guests)| !guests.is_empty())
        .map(|(host, guests)| {
            let health: Arc<HealthCheckEngine> = ctx.health.clone();
            let settings = ctx.settings.clone();
            let host = host.clone();
            let guests = guests.clone();
            WorkItem::new(host.clone(), async move {
                let executor = health.executor().clone();
                if start_services {
                    for command in [services::ESNP_STARTUP, services::EDV_STARTUP] {
                        match executor.run(&host, command, settings.command_timeout).await {
                            Ok(out) if out.success() => {}
                            Ok(out) => warn!("'{}' on {} exited with {}", command, host, out.exit_code),
                            Err(e) => warn!("'{}' on {} failed: {}", command, host, e),
                        }
                    }
                }

                let running: BTreeSet<String> = health
                    .running_vms(&host)
                    .await
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                for guest in guests.iter().filter(|g| !running.contains(*g)) {
                    info!("Starting {} on {}", guest, host);
                    if let Err(e) = executor
                        .run(&host, &start_command(flavor, guest), settings.command_timeout)
                        .await
                    {
                        warn!("Start of {} on {} failed: {}", guest, host, e);
                    }
                }
                wait_for(&health, &settings, &host, &guests, true)
                    .await
                    .map_err(|down| {
                        ItemFailure::new(code, format!("not running: {}", down.join(", ")))
                    })
            })
        })
        .collect();

    let coordinator = ctx
        .coordinator
        .with_item_timeout(ctx.settings.vm_operation_timeout + ctx.settings.command_timeout);
    let report = coordinator.run("VM startup", items).await.into_checked()?;
    match report.first_error(code) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
