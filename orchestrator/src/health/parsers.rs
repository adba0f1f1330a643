//! Parsers for the text output of node-side tools

use std::collections::BTreeMap;

use super::types::{RollbackProbe, ServiceSnapshot, SshCheck};
use crate::constants::griddisk::ROLLING_OK;

/// `cellcli`/`dbmcli` status lines look like `msStatus:   running`
pub fn parse_status_lines(output: &str, required: &[&str]) -> ServiceSnapshot {
    let mut found: BTreeMap<String, bool> = BTreeMap::new();
    for line in output.lines() {
        if let Some((name, value)) = line.split_once(':') {
            found.insert(
                name.trim().to_string(),
                value.trim().eq_ignore_ascii_case("running"),
            );
        }
    }
    required
        .iter()
        .map(|name| (name.to_string(), found.get(*name).copied().unwrap_or(false)))
        .collect()
}

/// `crsctl check crs` lines look like `CRS-4537: Cluster Ready Services is online`
pub fn parse_crs_lines(output: &str, required: &[&str]) -> ServiceSnapshot {
    required
        .iter()
        .map(|service| {
            let online = output.lines().any(|line| {
                let message = line.split_once(':').map(|(_, m)| m.trim()).unwrap_or(line.trim());
                message.starts_with(service) && message.ends_with("is online")
            });
            (service.to_string(), online)
        })
        .collect()
}

pub fn image_status_ok(output: &str) -> bool {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.to_ascii_lowercase().starts_with("success"))
        .unwrap_or(false)
}

/// Every grid disk line must show an asmmodestatus that keeps redundancy
pub fn griddisks_rolling_ok(output: &str) -> bool {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .all(|line| match line.split_whitespace().nth(1) {
            Some(status) => ROLLING_OK.iter().any(|ok| status.eq_ignore_ascii_case(ok)),
            None => false,
        })
}

/// Every listed disk must report asmdeactivationoutcome = Yes
pub fn griddisks_deactivation_ok(output: &str) -> bool {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .all(|line| match line.split_whitespace().nth(2) {
            Some(outcome) => outcome.eq_ignore_ascii_case("yes"),
            None => false,
        })
}

/// Map the exit status of the dbserver backup helper
pub fn rollback_probe_from_exit(exit_code: i32, stdout: &str) -> RollbackProbe {
    match exit_code {
        0 => RollbackProbe::Possible {
            backup_version: stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string),
        },
        2 => RollbackProbe::SameAsActive,
        3 => RollbackProbe::NotAvailable,
        other => RollbackProbe::Unknown(format!("backup helper exited with {}", other)),
    }
}

/// First dotted token of a switch `version` output
pub fn switch_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|token| token.contains('.') && token.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(|t| t.trim_matches(|c: char| c == ',' || c == ';').to_string())
}

pub fn parse_vm_list(output: &str) -> Vec<String> {
    let mut vms: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "Domain-0")
        .map(str::to_string)
        .collect();
    vms.sort();
    vms.dedup();
    vms
}

/// Classify an ssh probe run from the launch node
pub fn classify_ssh(exit_code: i32, stderr: &str) -> SshCheck {
    if exit_code == 0 {
        SshCheck::Reachable
    } else if stderr.contains("Host key verification failed") {
        SshCheck::HostKeyVerificationFailed(stderr.trim().to_string())
    } else if stderr.contains("Connection closed by") {
        SshCheck::ConnectionClosed(stderr.trim().to_string())
    } else {
        SshCheck::Unreachable(format!("exit {}: {}", exit_code, stderr.trim()))
    }
}
