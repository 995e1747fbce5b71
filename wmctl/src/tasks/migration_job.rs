//! Background execution of migrations.

use super::{Job, JobError};
use crate::migration::{MigrationError, MigrationRunner};
use crate::types::MigrationId;
use async_trait::async_trait;
use std::time::Duration;

impl From<MigrationError> for JobError {
    fn from(err: MigrationError) -> Self {
        if err.is_permanent() {
            JobError::Permanent(err.into())
        } else {
            JobError::Transient(err.into())
        }
    }
}

/// Runs one migration through [`MigrationRunner::execute`].
pub struct MigrationJob {
    runner: MigrationRunner,
    migration_id: MigrationId,
    simulated_delay: Duration,
}

impl MigrationJob {
    pub fn new(runner: MigrationRunner, migration_id: MigrationId, simulated_delay: Duration) -> Self {
        Self {
            runner,
            migration_id,
            simulated_delay,
        }
    }

    pub fn migration_id(&self) -> MigrationId {
        self.migration_id
    }
}

#[async_trait]
impl Job for MigrationJob {
    fn kind(&self) -> &'static str {
        "migration"
    }

    async fn run(&self) -> Result<(), JobError> {
        self.runner.execute(self.migration_id, self.simulated_delay).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{InMemoryStorage, MountPointFilter, Storage};
    use crate::db::models::migrations::MigrationState;
    use crate::tasks::{FixedDelay, JobQueue, JobStatus, TokioJobQueue};
    use crate::test_utils::{FaultyStorage, create_migration, seed_scenario};
    use std::sync::Arc;

    fn queue() -> TokioJobQueue {
        TokioJobQueue::new(Arc::new(FixedDelay::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_failure_is_retried_until_success() {
        let storage = Arc::new(FaultyStorage::failing_replacements(2));
        let scenario = seed_scenario(storage.as_ref()).await;
        let migration = create_migration(storage.as_ref(), &scenario, vec![scenario.d_drive.id]).await;

        let runner = MigrationRunner::new(storage.clone());
        let handle = queue().submit(Arc::new(MigrationJob::new(runner, migration.id, Duration::ZERO)));

        let started = tokio::time::Instant::now();
        assert!(matches!(handle.wait().await, JobStatus::Succeeded { attempts: 3, .. }));
        // Two retries at the default one-minute delay
        assert!(started.elapsed() >= Duration::from_secs(120));

        let reloaded = storage.get_migration(migration.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, MigrationState::Success);
        let copied = storage
            .list_mount_points(&MountPointFilter::for_workload(scenario.destination.id))
            .await
            .unwrap();
        assert_eq!(copied.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forbidden_volume_is_not_retried() {
        let storage = Arc::new(InMemoryStorage::new());
        let scenario = seed_scenario(storage.as_ref()).await;
        let migration = create_migration(
            storage.as_ref(),
            &scenario,
            vec![scenario.c_drive.id, scenario.d_drive.id],
        )
        .await;

        let runner = MigrationRunner::new(storage.clone());
        let handle = queue().submit(Arc::new(MigrationJob::new(runner, migration.id, Duration::from_secs(60))));

        match handle.wait().await {
            JobStatus::Failed { attempts, error, .. } => {
                assert_eq!(attempts, 1);
                assert!(error.contains("C:\\"));
            }
            other => panic!("unexpected status {other:?}"),
        }
        let reloaded = storage.get_migration(migration.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, MigrationState::NotStarted);
    }

    #[test]
    fn test_error_classification() {
        let id = uuid::Uuid::new_v4();
        assert!(JobError::from(MigrationError::NotFound(id)).is_permanent());
        assert!(
            !JobError::from(MigrationError::ExecutionFailure {
                migration_id: id,
                source: crate::db::errors::DbError::Other(anyhow::anyhow!("disk full")),
            })
            .is_permanent()
        );
    }
}
