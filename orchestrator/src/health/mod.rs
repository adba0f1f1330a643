//! Health checks against fleet nodes
//!
//! This module provides the per-host checks the patch handlers gate on:
//! image version and status, required services, grid disk state, SSH
//! reachability from the launch node and guest VM inventory.

mod engine;
pub mod parsers;
pub mod types;

pub use engine::HealthCheckEngine;
pub use types::{GridDiskMode, ImageStatusCheck, RollbackProbe, ServiceSnapshot, SshCheck};
