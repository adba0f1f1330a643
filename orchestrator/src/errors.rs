//! Custom error types for the patch orchestrator
//!
//! Two layers live here. `ErrorCode` is the closed set of cluster-level result
//! codes reported upstream, each with a description and an operator action.
//! `OrchestratorError` and its nested enums carry plumbing failures (config,
//! transport, database) with enough context to log something useful.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the operator should do when a code is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorAction {
    FailAndShow,
    FailDontshowPageOncall,
}

impl fmt::Display for ErrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorAction::FailAndShow => write!(f, "FAIL_AND_SHOW"),
            ErrorAction::FailDontshowPageOncall => write!(f, "FAIL_DONTSHOW_PAGE_ONCALL"),
        }
    }
}

macro_rules! error_codes {
    ($( $variant:ident => ($hex:expr, $action:ident, $desc:expr) ),* $(,)?) => {
        /// Cluster-level result codes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(non_camel_case_types)]
        pub enum ErrorCode {
            $( $variant, )*
        }

        impl ErrorCode {
            pub const ALL: &'static [ErrorCode] = &[ $( ErrorCode::$variant, )* ];

            /// Hex identifier, e.g. `0x03070005`
            pub fn code(&self) -> &'static str {
                match self { $( ErrorCode::$variant => $hex, )* }
            }

            pub fn name(&self) -> &'static str {
                match self { $( ErrorCode::$variant => stringify!($variant), )* }
            }

            pub fn description(&self) -> &'static str {
                match self { $( ErrorCode::$variant => $desc, )* }
            }

            pub fn action(&self) -> ErrorAction {
                match self { $( ErrorCode::$variant => ErrorAction::$action, )* }
            }
        }
    };
}

error_codes! {
    PATCH_SUCCESS_EXIT_CODE => ("0x00000000", FailAndShow, "Patch operation completed successfully"),

    // Generic
    PATCH_OPERATION_FAILED => ("0x03010000", FailAndShow, "Patch operation failed"),
    INFRA_PATCHING_SYSTEM_BUSY_LOCK_NOT_ACQUIRED => ("0x03010003", FailAndShow, "Another patch operation is already running on this target"),
    PATCH_REQUEST_TIMEOUT => ("0x03010005", FailDontshowPageOncall, "Patch request timed-out"),
    INFRA_PATCHING_ONE_OR_MORE_PATCH_REQUEST_EXCEPTION => ("0x03010007", FailDontshowPageOncall, "One or more patch requests raised an unexpected error"),
    PATCH_OPERATION_DID_NOT_START => ("0x0301000F", FailAndShow, "Patch operation did not start"),
    INFRA_PATCHING_TASK_HANDLER_PATCH_REQUEST_EXCEPTION => ("0x03010010", FailDontshowPageOncall, "Unexpected error in the task handler"),
    PATCHMGR_SESSION_ALREADY_EXIST => ("0x0301003B", FailAndShow, "A patchmgr session is already running on the launch node"),
    NO_ACTION_REQUIRED => ("0x0301003D", FailAndShow, "All nodes are already at the requested version"),
    PATCHING_NODE_SSH_CHECK_FAILED => ("0x0301003F", FailAndShow, "Passwordless SSH from the launch node to a target node failed"),
    SWITCH_PATCH_FILES_MISSING => ("0x03010043", FailAndShow, "Switch patch files are missing on the launch node"),
    EXADATA_PATCHMGR_CONSOLE_READ_TIMEOUT_ERROR => ("0x03010044", FailDontshowPageOncall, "Timed out waiting for patchmgr to complete"),
    PATCHMGR_COMMAND_FAILED => ("0x03010045", FailAndShow, "patchmgr exited with a non-zero status"),
    UNABLE_TO_GET_INACTIVE_PARTITION_IMAGE_VERSION => ("0x03010056", FailAndShow, "Unable to read the inactive partition image version"),
    LAUNCH_NODE_SSH_CHECK_FAILED_KNOWNHOSTS => ("0x03010065", FailAndShow, "Host key verification failed from the launch node"),
    IMAGE_INFO_STATUS_EMPTY_OR_INVALID => ("0x03010066", FailAndShow, "Image status is empty or not successful"),
    SSHD_VALIDATION_ERROR => ("0x0301006C", FailAndShow, "Connection closed by the target node; check sshd and PAM settings"),
    INVALID_TARGET_VERSION => ("0x03010071", FailAndShow, "Target version is invalid"),
    PATCHMGR_CLEANUP_FAILED_AFTER_PATCH_FAILURE => ("0x03010072", FailAndShow, "patchmgr cleanup failed after a failed patch"),
    PATCHMGR_CLEANUP_FAILED => ("0x03010073", FailAndShow, "patchmgr cleanup failed after a successful patch"),
    INVALID_PATCH_OPTION => ("0x030F0002", FailAndShow, "Invalid combination of patch options"),
    ROLLBACK_CANNOT_BE_PERFORMED => ("0x03120001", FailAndShow, "Rollback cannot be performed"),
    IMAGE_VERSION_EMPTY_OR_INVALID => ("0x03120002", FailAndShow, "Image version is empty or undefined"),
    PATCHMGR_PRECHECK_EXECUTION_FAILED_ERROR => ("0x0303001F", FailAndShow, "patchmgr precheck failed"),

    // Hypervisor hosts
    DOM0_NOT_PINGABLE => ("0x03030001", FailAndShow, "Hypervisor host is not reachable"),
    DOM0_IMAGE_NOT_SUCCESS => ("0x03030002", FailAndShow, "Hypervisor image status is not success"),
    VERSION_MISMATCH_DURING_ROLLBACK => ("0x03030003", FailAndShow, "Hypervisor version is not lower after rollback"),
    DOM0_NOT_AT_REQUESTED_VERSION => ("0x03030004", FailAndShow, "Hypervisor is not at the requested version after patch"),
    DOMU_DOWN_ERROR => ("0x03030005", FailAndShow, "Guest VMs did not come back up on the hypervisor"),
    DOM0_ROLLBACK_NOT_ALLOWED_ERROR => ("0x03030009", FailAndShow, "Hypervisor rollback is not allowed"),
    INFRA_PATCHING_DOM0_SERVICES_NOT_RUNNING => ("0x0303000B", FailAndShow, "Hypervisor services are not running"),
    DOM0_PATCHING_FAILED_ERROR => ("0x0303000F", FailAndShow, "Hypervisor patching failed"),
    DOM0_FAILED_TO_SHUTDOWN_VMS => ("0x03030019", FailAndShow, "Failed to shut down guest VMs on the hypervisor"),
    DOM0_VERSION_CHANGED_DURING_CHECK => ("0x03030031", FailAndShow, "Hypervisor version changed after a precheck"),

    // Guest VMs
    DOMU_CRITICAL_SERVICES_NOT_RUNNING => ("0x03050001", FailAndShow, "Critical guest VM services are not running"),
    DOMU_PATCHMGR_UPGRADE_EXECUTION_FAILED => ("0x03050002", FailAndShow, "Guest VM upgrade failed"),
    DOMU_PATCHMGR_ROLLBACK_EXECUTION_FAILED => ("0x03050004", FailAndShow, "Guest VM rollback failed"),
    DOMU_IMAGE_STATUS_FAILED => ("0x0305000C", FailAndShow, "Guest VM image status is not success"),
    DOMU_VERSION_LOWER_THAN_EXPECTED_VERSION => ("0x0305000D", FailAndShow, "Guest VM version is lower than expected after patch"),
    DOMU_VERSION_NOT_AT_EXPECTED_VERSION => ("0x0305000E", FailAndShow, "Guest VM version is not at the expected version"),
    DOMU_PATCHMGR_COMMAND_FAILED => ("0x03050017", FailAndShow, "patchmgr failed for guest VMs"),
    DOMU_VERSION_CHANGED_DURING_CHECK => ("0x03050020", FailAndShow, "Guest VM version changed after a precheck"),
    DOMU_VERSION_NOT_LOWER_AFTER_ROLLBACK => ("0x03050021", FailAndShow, "Guest VM version is not lower after rollback"),

    // Storage nodes
    PATCH_CELL_CLEANUP_FAILED => ("0x03070000", FailAndShow, "Storage node patch cleanup failed"),
    PATCHMGR_CONSOLE_LOG_MISSING => ("0x03070003", FailAndShow, "patchmgr console log is missing"),
    CELL_PATCH_EXCEPTION => ("0x03070004", FailDontshowPageOncall, "Unexpected error while patching storage nodes"),
    CELL_PATCH_FAILED => ("0x03070005", FailAndShow, "Storage node patching failed"),
    CELL_PING_FAILED => ("0x03070006", FailAndShow, "Storage node is not reachable"),
    CELL_PATCH_FILES_MISSING => ("0x03070007", FailAndShow, "Storage node patch files are missing"),
    CELL_SERVICES_NOT_RUNNING => ("0x03070008", FailAndShow, "Storage node services are not running"),
    CELL_CURRENT_VERSION_EXPECTED_HIGHER_THAN_ORIGINAL_VERSION => ("0x03070009", FailAndShow, "Storage node version is not higher after patch"),
    CELL_CURRENT_VERSION_EXPECTED_LOWER_THAN_ORIGINAL_VERSION => ("0x0307000A", FailAndShow, "Storage node version is not lower after rollback"),
    CELL_CURRENT_VERSION_EXPECTED_EQUAL_TO_ORIGINAL_VERSION => ("0x0307000B", FailAndShow, "Storage node version changed after a precheck"),
    CELL_IMAGE_STATUS_NOT_SUCCESSFUL => ("0x0307000C", FailAndShow, "Storage node image status is not success"),
    CELL_FAILED_TO_SHUTDOWN_VMS => ("0x0307000F", FailAndShow, "Failed to shut down guest VMs before storage patching"),
    CELL_FAILED_TO_BRINGUP_VMS => ("0x03070010", FailAndShow, "Failed to start guest VMs after storage patching"),
    CELL_ASM_MODE_STATUS_STILL_ONLINE_ERROR => ("0x03070012", FailAndShow, "Grid disk asmmodestatus is still ONLINE after VM shutdown"),
    CELL_NOT_ELIGIBLE_FOR_ROLLBACK => ("0x03070013", FailAndShow, "Storage node is not eligible for rollback"),
    CELL_ASMDEACTIVATION_OUTCOME_ERROR => ("0x030C0000", FailAndShow, "Grid disk asmdeactivationoutcome is not Yes"),

    // Fabric switches
    SWITCH_POSTCHECK_FAILED => ("0x03080000", FailAndShow, "Switch postcheck failed"),
    SWITCH_ROLLBACK_PRECHECK_FAILED => ("0x03080001", FailAndShow, "Switch rollback precheck failed"),
    SWITCH_PATCH_PRECHECK_FAILED => ("0x03080002", FailAndShow, "Switch patch precheck failed"),
    SWITCH_PING_CHECK_FAILED => ("0x03080003", FailAndShow, "Switch is not reachable"),
    SWITCH_CURRENT_VERSION_SHOULD_BE_LOWER_THAN_ORIGINAL_VER => ("0x03090000", FailAndShow, "Switch version is not lower after rollback"),
    SWITCH_PATCH_FAILED => ("0x03090001", FailAndShow, "Switch patching failed"),
    SWITCH_ROLLBACK_FAILED => ("0x03090002", FailAndShow, "Switch rollback failed"),
    SWITCH_CURRENT_VERSION_EXPECTED_HIGHER_THAN_ORIGINAL_VER => ("0x03090004", FailAndShow, "Switch version is not higher after patch"),

    // One-off scripts
    ONEOFF_APPLY_FAILED => ("0x030D0000", FailAndShow, "One-off patch failed"),
    ONEOFFV2_APPLY_FAILED => ("0x030D0010", FailAndShow, "One-off script failed"),
}

impl ErrorCode {
    pub fn is_success(&self) -> bool {
        *self == ErrorCode::PATCH_SUCCESS_EXIT_CODE
    }

    /// Look a code up by its hex identifier or its name
    pub fn lookup(value: &str) -> Option<ErrorCode> {
        ErrorCode::ALL
            .iter()
            .copied()
            .find(|c| c.code().eq_ignore_ascii_case(value) || c.name() == value)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ErrorCode::lookup(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error code '{}'", raw)))
    }
}

/// A failure reported by a state-machine stage: a result code plus the
/// suggestion message shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchError {
    pub code: ErrorCode,
    pub message: String,
}

impl PatchError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Main error type for the orchestrator
#[derive(Debug)]
pub enum OrchestratorError {
    /// Configuration-related errors
    Config(ConfigError),

    /// Remote command execution errors
    Remote(RemoteError),

    /// Database operation errors
    Database(DatabaseError),

    /// A coded patch failure
    Patch(PatchError),

    /// Other errors with context
    Other(String),
}

/// Configuration error variants
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to load configuration file
    LoadFailed { path: String, reason: String },

    /// Invalid configuration value
    InvalidValue { field: String, reason: String },

    /// Missing required configuration
    MissingRequired { field: String },

    /// Unknown cluster name in a request
    UnknownCluster { cluster: String },
}

/// Remote execution error variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Could not open a session to the host
    ConnectionFailed { host: String, reason: String },

    /// Command did not finish in time
    Timeout { host: String, seconds: u64 },

    /// Session opened but the transport failed mid-command
    Transport { host: String, reason: String },

    /// Credentials were rejected
    AuthenticationFailed { host: String },
}

impl RemoteError {
    pub fn host(&self) -> &str {
        match self {
            RemoteError::ConnectionFailed { host, .. }
            | RemoteError::Timeout { host, .. }
            | RemoteError::Transport { host, .. }
            | RemoteError::AuthenticationFailed { host } => host,
        }
    }
}

/// Database error variants
#[derive(Debug)]
pub enum DatabaseError {
    /// Connection failed
    ConnectionFailed { reason: String },

    /// Query execution failed
    QueryFailed { query: String, reason: String },

    /// Data serialization/deserialization error
    SerializationError { reason: String },
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Config(e) => write!(f, "Configuration error: {}", e),
            OrchestratorError::Remote(e) => write!(f, "Remote error: {}", e),
            OrchestratorError::Database(e) => write!(f, "Database error: {}", e),
            OrchestratorError::Patch(e) => write!(f, "Patch error: {}", e),
            OrchestratorError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::LoadFailed { path, reason } => {
                write!(f, "Failed to load config from '{}': {}", path, reason)
            }
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            ConfigError::MissingRequired { field } => {
                write!(f, "Missing required field: {}", field)
            }
            ConfigError::UnknownCluster { cluster } => {
                write!(f, "Cluster '{}' is not configured", cluster)
            }
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::ConnectionFailed { host, reason } => {
                write!(f, "Connection to {} failed: {}", host, reason)
            }
            RemoteError::Timeout { host, seconds } => {
                write!(f, "Command on {} timed out after {}s", host, seconds)
            }
            RemoteError::Transport { host, reason } => {
                write!(f, "Transport error on {}: {}", host, reason)
            }
            RemoteError::AuthenticationFailed { host } => {
                write!(f, "Authentication failed for {}", host)
            }
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::ConnectionFailed { reason } => {
                write!(f, "Database connection failed: {}", reason)
            }
            DatabaseError::QueryFailed { query, reason } => {
                write!(f, "Query '{}' failed: {}", query, reason)
            }
            DatabaseError::SerializationError { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for RemoteError {}
impl std::error::Error for DatabaseError {}
impl std::error::Error for PatchError {}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Other(err.to_string())
    }
}

impl From<ConfigError> for OrchestratorError {
    fn from(err: ConfigError) -> Self {
        OrchestratorError::Config(err)
    }
}

impl From<RemoteError> for OrchestratorError {
    fn from(err: RemoteError) -> Self {
        OrchestratorError::Remote(err)
    }
}

impl From<DatabaseError> for OrchestratorError {
    fn from(err: DatabaseError) -> Self {
        OrchestratorError::Database(err)
    }
}

impl From<PatchError> for OrchestratorError {
    fn from(err: PatchError) -> Self {
        OrchestratorError::Patch(err)
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::QueryFailed {
            query: "<unknown>".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::SerializationError {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::ALL {
            assert!(seen.insert(code.code()), "duplicate hex {}", code.code());
        }
    }

    #[test]
    fn lookup_accepts_hex_and_name() {
        assert_eq!(
            ErrorCode::lookup("0x03070005"),
            Some(ErrorCode::CELL_PATCH_FAILED)
        );
        assert_eq!(
            ErrorCode::lookup("NO_ACTION_REQUIRED"),
            Some(ErrorCode::NO_ACTION_REQUIRED)
        );
        assert_eq!(ErrorCode::lookup("0xdeadbeef"), None);
    }

    #[test]
    fn serializes_as_hex() {
        let json = serde_json::to_string(&ErrorCode::PATCH_REQUEST_TIMEOUT).unwrap();
        assert_eq!(json, "\"0x03010005\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::PATCH_REQUEST_TIMEOUT);
    }
}
