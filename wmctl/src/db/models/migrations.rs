//! Database models for migrations.

use crate::types::{MigrationId, MigrationTargetId, MountPointId, WorkloadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Lifecycle state of a migration.
///
/// `NotStarted -> Running -> Success | Error`. Only the migration runner moves
/// a migration between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    #[default]
    NotStarted,
    Running,
    Error,
    Success,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::NotStarted => "not_started",
            MigrationState::Running => "running",
            MigrationState::Error => "error",
            MigrationState::Success => "success",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationState::Error | MigrationState::Success)
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database representation of a migration row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Migration {
    pub id: MigrationId,
    pub source_workload_id: WorkloadId,
    pub migration_target_id: MigrationTargetId,
    pub state: MigrationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a migration
#[derive(Debug, Clone)]
pub struct MigrationCreateDBRequest {
    pub source_workload_id: WorkloadId,
    pub migration_target_id: MigrationTargetId,
    pub selected_mount_points: Vec<MountPointId>,
}

/// Request to update a migration's target or selection
#[derive(Debug, Clone, Default)]
pub struct MigrationUpdateDBRequest {
    pub migration_target_id: Option<MigrationTargetId>,
    pub selected_mount_points: Option<Vec<MountPointId>>,
}

/// A migration with the IDs of its selected mount points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationDBResponse {
    pub id: MigrationId,
    pub source_workload_id: WorkloadId,
    pub migration_target_id: MigrationTargetId,
    pub state: MigrationState,
    pub selected_mount_points: Vec<MountPointId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationDBResponse {
    pub fn new(migration: Migration, selected_mount_points: Vec<MountPointId>) -> Self {
        Self {
            id: migration.id,
            source_workload_id: migration.source_workload_id,
            migration_target_id: migration.migration_target_id,
            state: migration.state,
            selected_mount_points,
            created_at: migration.created_at,
            updated_at: migration.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_format() {
        assert_eq!(serde_json::to_string(&MigrationState::NotStarted).unwrap(), "\"not_started\"");
        assert_eq!(MigrationState::default(), MigrationState::NotStarted);
        assert!(MigrationState::Success.is_terminal());
        assert!(MigrationState::Error.is_terminal());
        assert!(!MigrationState::Running.is_terminal());
    }
}
