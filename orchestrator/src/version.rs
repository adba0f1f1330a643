//! Image version parsing and ordering
//!
//! Quarterly versions are dotted numeric strings with a trailing build date
//! (`24.1.0.0.0.240101`). Exasplice versions are a bare six digit date with an
//! optional `.N` suffix (`240605.1`) and always order below quarterly ones.
//! A node may also carry a live-update overlay on top of its base image.

use std::cmp::Ordering;

use crate::constants::image::UNDEFINED;
use crate::errors::{ErrorCode, PatchError};
use crate::model::{TargetClass, TaskKind};

const LIVE_UPDATE_MARKER: &str = "Live Update Version:";

pub fn is_exasplice(version: &str) -> bool {
    let mut parts = version.trim().splitn(2, '.');
    let head = parts.next().unwrap_or_default();
    let head_ok = head.len() == 6 && head.bytes().all(|b| b.is_ascii_digit());
    match parts.next() {
        None => head_ok,
        Some(tail) => head_ok && !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()),
    }
}

pub fn is_quarterly(version: &str) -> bool {
    let normalized = version.trim().replace('-', ".");
    let segments: Vec<&str> = normalized.split('.').collect();
    (6..=7).contains(&segments.len())
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
}

/// Total order on version strings
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = a.trim();
    let b = b.trim();

    match (is_exasplice(a), is_exasplice(b)) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    let a_norm = a.replace('-', ".");
    let b_norm = b.replace('-', ".");
    let a_segments: Vec<&str> = a_norm.split('.').collect();
    let b_segments: Vec<&str> = b_norm.split('.').collect();

    for (x, y) in a_segments.iter().zip(b_segments.iter()) {
        let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a_segments.len().cmp(&b_segments.len())
}

/// Installed image as reported by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageVersion {
    pub base: String,
    pub overlay: Option<String>,
}

impl ImageVersion {
    /// Parse `imageinfo -ver` or `imageinfo -versionliveupdate` output
    pub fn parse(raw: &str) -> Result<Self, PatchError> {
        let line = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        let base = line.split_whitespace().next().unwrap_or("");

        if base.is_empty() || base.eq_ignore_ascii_case(UNDEFINED) {
            return Err(PatchError::new(
                ErrorCode::IMAGE_VERSION_EMPTY_OR_INVALID,
                format!("Image version is empty or undefined: '{}'", raw.trim()),
            ));
        }

        let overlay = line.find(LIVE_UPDATE_MARKER).and_then(|pos| {
            line[pos + LIVE_UPDATE_MARKER.len()..]
                .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
                .find(|t| !t.is_empty())
                .filter(|t| !t.eq_ignore_ascii_case(UNDEFINED))
                .map(str::to_string)
        });

        Ok(Self {
            base: base.to_string(),
            overlay,
        })
    }

    pub fn plain(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            overlay: None,
        }
    }

    /// Version that counts for comparisons on this class of node
    pub fn effective(&self, class: TargetClass) -> &str {
        match (&self.overlay, class) {
            (Some(overlay), TargetClass::GuestVm) => overlay,
            _ => &self.base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonBasis<'a> {
    Version(&'a str),
    /// Guest rollback where the overlay equals the base: nothing to undo
    RollbackNoop,
}

pub fn comparison_basis(version: &ImageVersion, class: TargetClass, task: TaskKind) -> ComparisonBasis<'_> {
    if class == TargetClass::GuestVm {
        if let Some(overlay) = &version.overlay {
            if task.is_rollback() && compare_versions(overlay, &version.base) == Ordering::Equal {
                return ComparisonBasis::RollbackNoop;
            }
        }
    }
    ComparisonBasis::Version(version.effective(class))
}

/// Check a requested target version is something the tool accepts
pub fn validate_target(target: &str, class: TargetClass) -> Result<(), PatchError> {
    let target = target.trim();
    let valid = match class {
        TargetClass::FabricSwitch => !target.is_empty(),
        _ => is_quarterly(target) || is_exasplice(target),
    };
    if valid {
        Ok(())
    } else {
        Err(PatchError::new(
            ErrorCode::INVALID_TARGET_VERSION,
            format!("Target version '{}' is not valid for {}", target, class),
        ))
    }
}
