//! Field and business-rule validation.
//!
//! Every check is a plain function returning `Result<_, ValidationError>`; API
//! handlers run them before anything is persisted, and the migration runner
//! reuses the boot volume guard.

use crate::db::models::{
    credentials::{CredentialsCreateDBRequest, CredentialsUpdateDBRequest},
    migration_targets::CloudType,
    mount_points::MountPoint,
};
use crate::types::{MountPointId, WorkloadId};
use std::collections::HashSet;
use std::net::IpAddr;
use thiserror::Error;

/// Name of the boot volume, which can never be migrated.
pub const BOOT_VOLUME: &str = "C:\\";

pub const USERNAME_MAX_LEN: usize = 150;
pub const PASSWORD_MAX_LEN: usize = 128;
pub const DOMAIN_MAX_LEN: usize = 150;
pub const MOUNT_POINT_NAME_MAX_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or blank
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("{field} must be at most {max} characters")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("'{value}' is not a valid IP address")]
    InvalidIp { value: String },

    /// Another workload already uses this IP
    #[error("A workload with IP {ip} already exists")]
    DuplicateIp { ip: String },

    /// Attempt to change a field that is fixed after creation
    #[error("{field} cannot be changed once set")]
    ImmutableFieldViolation { field: &'static str },

    #[error("'{value}' is not a valid cloud type (expected one of: aws, azure, vsphere, vcloud)")]
    InvalidCloudType { value: String },

    #[error("total_size must be a positive integer, got {value}")]
    InvalidSize { value: i64 },

    /// A selected mount point is unknown or lives on another workload
    #[error("Mount point {mount_point_id} does not belong to source workload {workload_id}")]
    ForeignMountPoint { mount_point_id: MountPointId, workload_id: WorkloadId },

    /// The selection includes the boot volume
    #[error("Migration cannot include {name} volume")]
    ForbiddenVolume { name: String },
}

fn require(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField { field });
    }
    if value.chars().count() > max {
        return Err(ValidationError::FieldTooLong { field, max });
    }
    Ok(())
}

fn require_if_present(field: &'static str, value: Option<&str>, max: usize) -> Result<(), ValidationError> {
    match value {
        Some(value) => require(field, value, max),
        None => Ok(()),
    }
}

/// Validate a full credentials triple. All three fields are required.
pub fn validate_credentials(
    username: Option<String>,
    password: Option<String>,
    domain: Option<String>,
) -> Result<CredentialsCreateDBRequest, ValidationError> {
    let username = username.unwrap_or_default();
    let password = password.unwrap_or_default();
    let domain = domain.unwrap_or_default();

    require("username", &username, USERNAME_MAX_LEN)?;
    require("password", &password, PASSWORD_MAX_LEN)?;
    require("domain", &domain, DOMAIN_MAX_LEN)?;

    Ok(CredentialsCreateDBRequest { username, password, domain })
}

/// Validate a partial credentials update. Provided fields must still be non-blank.
pub fn validate_credentials_update(update: &CredentialsUpdateDBRequest) -> Result<(), ValidationError> {
    require_if_present("username", update.username.as_deref(), USERNAME_MAX_LEN)?;
    require_if_present("password", update.password.as_deref(), PASSWORD_MAX_LEN)?;
    require_if_present("domain", update.domain.as_deref(), DOMAIN_MAX_LEN)?;
    Ok(())
}

/// Parse an IPv4 or IPv6 address and return its canonical textual form.
pub fn normalize_ip(value: &str) -> Result<String, ValidationError> {
    value
        .trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| ValidationError::InvalidIp { value: value.to_string() })
}

/// A workload's IP is fixed once persisted: resubmitting the same address is
/// accepted, anything else is an immutable field violation.
pub fn ensure_ip_unchanged(current: &str, requested: Option<&str>) -> Result<(), ValidationError> {
    let Some(requested) = requested else {
        return Ok(());
    };
    match normalize_ip(requested) {
        Ok(ip) if ip == current => Ok(()),
        _ => Err(ValidationError::ImmutableFieldViolation { field: "ip" }),
    }
}

pub fn validate_mount_point_name(name: &str) -> Result<(), ValidationError> {
    require("name", name, MOUNT_POINT_NAME_MAX_LEN)
}

pub fn validate_total_size(total_size: i64) -> Result<(), ValidationError> {
    if total_size <= 0 {
        return Err(ValidationError::InvalidSize { value: total_size });
    }
    Ok(())
}

pub fn parse_cloud_type(value: &str) -> Result<CloudType, ValidationError> {
    value.parse()
}

/// Check that every requested mount point exists on the source workload.
///
/// `available` is the source workload's current mount points. Duplicate IDs in
/// the request are collapsed, keeping the first occurrence.
pub fn ensure_selection_on_source(
    source_workload_id: WorkloadId,
    available: &[MountPoint],
    requested: &[MountPointId],
) -> Result<Vec<MountPointId>, ValidationError> {
    let on_source: HashSet<MountPointId> = available
        .iter()
        .filter(|mp| mp.workload_id == source_workload_id)
        .map(|mp| mp.id)
        .collect();

    let mut seen = HashSet::new();
    let mut selection = Vec::with_capacity(requested.len());
    for id in requested {
        if !on_source.contains(id) {
            return Err(ValidationError::ForeignMountPoint {
                mount_point_id: *id,
                workload_id: source_workload_id,
            });
        }
        if seen.insert(*id) {
            selection.push(*id);
        }
    }
    Ok(selection)
}

/// Whether a mount point name refers to the boot volume (case-insensitive).
pub fn is_forbidden_volume(name: &str) -> bool {
    name.eq_ignore_ascii_case(BOOT_VOLUME)
}

/// Reject a selection that includes the boot volume.
pub fn ensure_no_forbidden_volume(selected: &[MountPoint]) -> Result<(), ValidationError> {
    match selected.iter().find(|mp| is_forbidden_volume(&mp.name)) {
        Some(mp) => Err(ValidationError::ForbiddenVolume { name: mp.name.clone() }),
        None => Ok(()),
    }
}
