//! Result types for remote health checks

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ErrorCode;

/// service name -> running
pub type ServiceSnapshot = BTreeMap<String, bool>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStatusCheck {
    pub succeeded: bool,
    /// Raw first status line, if the node answered
    pub status: Option<String>,
    /// Log excerpts collected when the status is not success
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackProbe {
    Possible { backup_version: Option<String> },
    /// The backup image is the image already active
    SameAsActive,
    NotAvailable,
    Unknown(String),
}

impl RollbackProbe {
    pub fn is_possible(&self) -> bool {
        matches!(self, RollbackProbe::Possible { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            RollbackProbe::Possible { backup_version } => match backup_version {
                Some(v) => format!("rollback possible to {}", v),
                None => "rollback possible".to_string(),
            },
            RollbackProbe::SameAsActive => "backup image is the same as the active image".to_string(),
            RollbackProbe::NotAvailable => "no backup image available".to_string(),
            RollbackProbe::Unknown(reason) => format!("rollback state unknown: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridDiskMode {
    /// Every disk must stay ONLINE or SYNCING
    Rolling,
    /// Every online disk must report asmdeactivationoutcome = Yes
    NonRolling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshCheck {
    Reachable,
    HostKeyVerificationFailed(String),
    ConnectionClosed(String),
    Unreachable(String),
}

impl SshCheck {
    pub fn is_reachable(&self) -> bool {
        matches!(self, SshCheck::Reachable)
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            SshCheck::Reachable => None,
            SshCheck::HostKeyVerificationFailed(_) => {
                Some(ErrorCode::LAUNCH_NODE_SSH_CHECK_FAILED_KNOWNHOSTS)
            }
            SshCheck::ConnectionClosed(_) => Some(ErrorCode::SSHD_VALIDATION_ERROR),
            SshCheck::Unreachable(_) => Some(ErrorCode::PATCHING_NODE_SSH_CHECK_FAILED),
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            SshCheck::Reachable => "reachable",
            SshCheck::HostKeyVerificationFailed(d)
            | SshCheck::ConnectionClosed(d)
            | SshCheck::Unreachable(d) => d,
        }
    }
}
