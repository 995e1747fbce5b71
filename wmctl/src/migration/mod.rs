//! Migration execution.
//!
//! [`MigrationRunner::execute`] drives a migration through its lifecycle:
//!
//! ```text
//! not_started ──► running ──► success
//!       ▲            │
//!       │            └──────► error
//!  (re-run from success/error goes back through running)
//! ```
//!
//! A run serialises on the target workload and, holding that lock, loads the
//! migration and its selection and refuses selections containing the boot
//! volume before touching any state. It then claims the migration with a
//! compare-and-set to `running` and re-resolves the claimed record, waits out
//! the simulated transfer and swaps the target workload's mount points for
//! copies of the selection in one storage call. Copy failures are recorded as
//! `error` and returned to the caller.

pub mod locks;

pub use locks::WorkloadLocks;

use crate::db::errors::DbError;
use crate::db::handlers::Storage;
use crate::db::models::{
    migrations::{MigrationDBResponse, MigrationState},
    mount_points::MountPointSpec,
};
use crate::types::{MigrationId, WorkloadId, abbrev_uuid};
use crate::validation::{ValidationError, ensure_no_forbidden_volume};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum MigrationError {
    /// The migration was refused before it started; its state is unchanged
    #[error(transparent)]
    Rejected(#[from] ValidationError),

    #[error("Migration {0} not found")]
    NotFound(MigrationId),

    /// Another execution holds the migration in `running`
    #[error("Migration {0} is already running")]
    AlreadyRunning(MigrationId),

    /// Copying mount points failed; the migration was moved to `error`
    #[error("Migration {migration_id} failed while copying mount points: {source}")]
    ExecutionFailure {
        migration_id: MigrationId,
        #[source]
        source: DbError,
    },

    #[error(transparent)]
    Database(#[from] DbError),
}

impl MigrationError {
    /// Whether repeating the run can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            MigrationError::Rejected(_)
                | MigrationError::NotFound(_)
                | MigrationError::AlreadyRunning(_)
                | MigrationError::Database(DbError::NotFound)
        )
    }
}

/// Everything a run needs, resolved before any state change
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub migration: MigrationDBResponse,
    pub target_workload_id: WorkloadId,
    pub mount_points: Vec<MountPointSpec>,
}

/// Executes migrations against a [`Storage`] backend.
#[derive(Clone)]
pub struct MigrationRunner {
    storage: Arc<dyn Storage>,
    locks: WorkloadLocks,
}

impl MigrationRunner {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_locks(storage, WorkloadLocks::new())
    }

    pub fn with_locks(storage: Arc<dyn Storage>, locks: WorkloadLocks) -> Self {
        Self { storage, locks }
    }

    pub fn locks(&self) -> &WorkloadLocks {
        &self.locks
    }

    /// Load a migration and check it may run. Never changes state.
    pub async fn preflight(&self, migration_id: MigrationId) -> Result<MigrationPlan, MigrationError> {
        let migration = self
            .storage
            .get_migration(migration_id)
            .await?
            .ok_or(MigrationError::NotFound(migration_id))?;
        self.plan(migration).await
    }

    /// Resolve the selection and target workload of a loaded migration
    async fn plan(&self, migration: MigrationDBResponse) -> Result<MigrationPlan, MigrationError> {
        let selected = self.storage.get_mount_points_bulk(&migration.selected_mount_points).await?;
        ensure_no_forbidden_volume(&selected)?;

        let target = self
            .storage
            .get_migration_target(migration.migration_target_id)
            .await?
            .ok_or(MigrationError::NotFound(migration.id))?;

        Ok(MigrationPlan {
            target_workload_id: target.target_workload_id,
            mount_points: selected.iter().map(MountPointSpec::from).collect(),
            migration,
        })
    }

    /// Run a migration to completion.
    ///
    /// Returns the migration in its final `success` state. Every failure after
    /// the migration entered `running` leaves it in `error`.
    #[instrument(skip(self), fields(migration_id = %abbrev_uuid(&migration_id)), err)]
    pub async fn execute(&self, migration_id: MigrationId, simulated_delay: Duration) -> Result<MigrationDBResponse, MigrationError> {
        let result = self.execute_serialised(migration_id, simulated_delay).await;
        self.locks.prune();
        if let Err(MigrationError::Rejected(e)) = &result {
            warn!("Refusing to run migration {}: {}", abbrev_uuid(&migration_id), e);
        }
        result
    }

    async fn execute_serialised(&self, migration_id: MigrationId, simulated_delay: Duration) -> Result<MigrationDBResponse, MigrationError> {
        // Fail fast without waiting on the lock; the authoritative check runs under it
        let mut workload_id = self.preflight(migration_id).await?.target_workload_id;

        loop {
            let _guard = self.locks.acquire(workload_id).await;

            // The migration stays editable while waiting for the lock
            let plan = self.preflight(migration_id).await?;
            if plan.target_workload_id != workload_id {
                workload_id = plan.target_workload_id;
                continue;
            }

            match self.claim(&plan).await? {
                Some(claimed) => return self.run_claimed(&claimed, simulated_delay).await,
                None => workload_id = plan.target_workload_id,
            }
        }
    }

    /// Move the migration to `running` and re-resolve it from the claimed record.
    ///
    /// Once `running` the migration can no longer be edited, so the returned
    /// plan is final. If the claimed record no longer matches the locked
    /// workload (`Ok(None)`) or now selects the boot volume, the previous state
    /// is restored before returning.
    async fn claim(&self, plan: &MigrationPlan) -> Result<Option<MigrationPlan>, MigrationError> {
        let migration_id = plan.migration.id;
        let Some(claimed) = self.storage.try_start_migration(migration_id).await? else {
            return Err(MigrationError::AlreadyRunning(migration_id));
        };

        let outcome = match self.plan(claimed).await {
            Ok(fresh) if fresh.target_workload_id == plan.target_workload_id => return Ok(Some(fresh)),
            Ok(_) => Ok(None),
            Err(e) => Err(e),
        };

        if let Err(e) = self.storage.set_migration_state(migration_id, plan.migration.state).await {
            error!(
                "Failed to restore state of migration {} after an aborted claim: {}",
                abbrev_uuid(&migration_id),
                e
            );
        }
        outcome
    }

    async fn run_claimed(&self, plan: &MigrationPlan, simulated_delay: Duration) -> Result<MigrationDBResponse, MigrationError> {
        let migration_id = plan.migration.id;
        info!(
            "Migration {} running: {} mount point(s) to workload {}",
            abbrev_uuid(&migration_id),
            plan.mount_points.len(),
            abbrev_uuid(&plan.target_workload_id)
        );

        if !simulated_delay.is_zero() {
            tokio::time::sleep(simulated_delay).await;
        }

        let copied = self
            .storage
            .replace_mount_points(plan.target_workload_id, &plan.mount_points)
            .await
            .map(|_| ());
        let outcome = match copied {
            Ok(()) => self.storage.set_migration_state(migration_id, MigrationState::Success).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(done) => {
                info!("Migration {} succeeded", abbrev_uuid(&migration_id));
                Ok(done)
            }
            Err(source) => {
                error!("Migration {} failed: {}", abbrev_uuid(&migration_id), source);
                if let Err(e) = self.storage.set_migration_state(migration_id, MigrationState::Error).await {
                    error!("Failed to record error state for migration {}: {}", abbrev_uuid(&migration_id), e);
                }
                Err(MigrationError::ExecutionFailure { migration_id, source })
            }
        }
    }

    /// Fail migrations a previous process left in `running`.
    pub async fn recover_interrupted(&self) -> Result<u64, MigrationError> {
        let count = self.storage.fail_interrupted_migrations().await?;
        if count > 0 {
            warn!("Marked {} interrupted migration(s) as error", count);
        }
        Ok(count)
    }
}
