//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases so signatures say which
//! entity they refer to:
//!
//! - [`CredentialsId`]: Credentials record identifier
//! - [`WorkloadId`]: Workload (VM or host) identifier
//! - [`MountPointId`]: Mount point (volume) identifier
//! - [`MigrationTargetId`]: Migration target identifier
//! - [`MigrationId`]: Migration identifier
//! - [`TaskId`]: Background task identifier
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use std::fmt;
use uuid::Uuid;

// Type aliases for IDs
pub type CredentialsId = Uuid;
pub type WorkloadId = Uuid;
pub type MountPointId = Uuid;
pub type MigrationTargetId = Uuid;
pub type MigrationId = Uuid;
pub type TaskId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Operations that storage-level protection rules can refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }
}
