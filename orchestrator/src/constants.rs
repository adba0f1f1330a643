//! Remote command lines, artifact names and fixed limits
//!
//! Commands are grouped by the subsystem that issues them so the health checks,
//! the patch tool driver and the handlers agree on one spelling of each.

#![allow(dead_code)]

use std::time::Duration;

/// Image and version queries
pub mod image {
    pub const VERSION: &str = "imageinfo -ver";

    /// Base version plus live-update overlay on one line
    pub const VERSION_LIVE_UPDATE: &str = "imageinfo -versionliveupdate";

    pub const INACTIVE_VERSION: &str = "imageinfo -inactive -ver";

    pub const STATUS: &str = "imageinfo -status";

    pub const DIAGNOSTICS: &str =
        "grep -as '\\[ERROR\\|\\[FAIL' /var/log/cellos/validations.log /var/log/cellos/vldrun.*.log";

    /// Exit 0: rollback possible, 2: backup matches active image, 3: no backup
    pub const ROLLBACK_PROBE: &str =
        "/opt/oracle.SupportTools/dbserver_backup.sh --check-rollback --get-backup-version";

    pub const SWITCH_VERSION: &str = "version";

    /// Value reported by imageinfo when no image is registered
    pub const UNDEFINED: &str = "undefined";
}

/// Service state queries
pub mod services {
    pub const CELL_STATUS: &str = "cellcli -e \"list cell detail\" | grep Status";

    pub const CELL_REQUIRED: &[&str] = &["cellsrvStatus", "msStatus", "rsStatus"];

    pub const DBSERVER_STATUS: &str = "dbmcli -e \"list dbserver detail\" | egrep \"msStatus|rsStatus\"";

    pub const DBSERVER_REQUIRED: &[&str] = &["msStatus", "rsStatus"];

    pub const CRS_CHECK: &str = "/u01/app/grid/bin/crsctl check crs";

    pub const CRS_REQUIRED: &[&str] = &[
        "Oracle High Availability Services",
        "Cluster Ready Services",
        "Cluster Synchronization Services",
        "Event Manager",
    ];

    pub const CELL_RESTART_ALL: &str = "cellcli -e \"alter cell restart services all\"";

    pub const ESNP_STARTUP: &str = "dbmcli -e 'alter dbserver startup services esnp'";

    pub const EDV_STARTUP: &str = "dbmcli -e 'alter dbserver startup services edv'";
}

/// Grid disk queries on storage nodes
pub mod griddisk {
    pub const ROLLING: &str = "cellcli -e 'list griddisk attributes name,asmmodestatus'";

    pub const NON_ROLLING: &str = "cellcli -e \"list griddisk attributes name,asmmodestatus,asmdeactivationoutcome where asmmodestatus='ONLINE'\"";

    /// asmmodestatus values that keep redundancy during a rolling patch
    pub const ROLLING_OK: &[&str] = &["ONLINE", "SYNCING"];
}

/// Guest VM control on hypervisor hosts
pub mod vm {
    pub const KVM_LIST_RUNNING: &str = "virsh list | grep -i running | awk '{print $2}'";

    pub const OVM_LIST_RUNNING: &str = "xm list | tail -n+3 | awk '{print $1}'";

    pub const KVM_SHUTDOWN: &str = "virsh shutdown";

    pub const KVM_START: &str = "virsh start";

    pub const OVM_SHUTDOWN: &str = "xm shutdown";

    pub const OVM_CREATE: &str = "xm create";

    /// Per-guest directory holding the OVM domain config `vm.cfg`
    pub const OVM_IMAGE_DIR: &str = "/EXAVMIMAGES/GuestImages";
}

/// Marker and condition names shared with external collaborators
pub mod callbacks {
    pub const READY_FOR_PATCH: &str = "ready_for_patch";

    pub const PATCH_IN_PROGRESS: &str = "patch_in_progress";
}

/// Vendor patch tool artifacts
pub mod patchmgr {
    pub const BINARY: &str = "./patchmgr";

    pub const CONSOLE_LOG: &str = "PatchmgrConsole.out";

    pub const LOG_DIR_PREFIX: &str = "patchmgr_log_";

    /// Bracketed so neither the probing shell nor log-path greps match themselves
    pub const SESSION_CHECK: &str = "pgrep -f '[p]atchmgr --'";

    pub const EXIT_STATUS_MARKER: &str = "Exit status";

    pub const PROGRESS_PATTERN: &str = "Working|SUCCESS|INFO";
}

/// Cluster lock housekeeping
pub mod operations {
    use super::Duration;

    /// Interval between sweeps for abandoned locks
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
}

/// Agent transport
pub mod agent {
    use super::Duration;

    pub const EXECUTE_PATH: &str = "/command/execute";

    /// Added to the command timeout so the agent reports its own timeout first
    pub const HTTP_GRACE: Duration = Duration::from_secs(15);
}

/// Number of runs returned by the list endpoint
pub const RUN_HISTORY_LIMIT: i64 = 50;
