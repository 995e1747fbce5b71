//! OpenAPI documentation for the `/api/v1` surface.
//!
//! The document is served at `/api-docs/openapi.json` and rendered by Scalar
//! at `/docs`.

use utoipa::OpenApi;

use crate::api;
use crate::config::RunMode;
use crate::db::models::{migration_targets::CloudType, migrations::MigrationState};
use crate::tasks::JobStatus;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "wmctl",
        description = "Simulated migration of workload mount points onto cloud or VM targets."
    ),
    servers(
        (url = "/api/v1", description = "Migration control API")
    ),
    paths(
        api::handlers::workloads::list_workloads,
        api::handlers::workloads::create_workload,
        api::handlers::workloads::get_workload,
        api::handlers::workloads::update_workload,
        api::handlers::workloads::delete_workload,
        api::handlers::mount_points::list_mount_points,
        api::handlers::mount_points::create_mount_point,
        api::handlers::mount_points::get_mount_point,
        api::handlers::mount_points::update_mount_point,
        api::handlers::mount_points::delete_mount_point,
        api::handlers::migration_targets::list_migration_targets,
        api::handlers::migration_targets::create_migration_target,
        api::handlers::migration_targets::get_migration_target,
        api::handlers::migration_targets::update_migration_target,
        api::handlers::migration_targets::delete_migration_target,
        api::handlers::migrations::list_migrations,
        api::handlers::migrations::create_migration,
        api::handlers::migrations::get_migration,
        api::handlers::migrations::update_migration,
        api::handlers::migrations::delete_migration,
        api::handlers::migrations::run_migration,
        api::handlers::tasks::get_task,
        api::handlers::tasks::cancel_task,
    ),
    components(
        schemas(
            api::models::credentials::CredentialsInput,
            api::models::credentials::CredentialsResponse,
            api::models::workloads::WorkloadCreate,
            api::models::workloads::WorkloadUpdate,
            api::models::workloads::WorkloadResponse,
            api::models::mount_points::MountPointCreate,
            api::models::mount_points::MountPointUpdate,
            api::models::mount_points::MountPointResponse,
            api::models::migration_targets::MigrationTargetCreate,
            api::models::migration_targets::MigrationTargetUpdate,
            api::models::migration_targets::MigrationTargetResponse,
            api::models::migrations::MigrationCreate,
            api::models::migrations::MigrationUpdate,
            api::models::migrations::MigrationResponse,
            api::models::migrations::RunMigrationResponse,
            api::models::tasks::TaskResponse,
            CloudType,
            MigrationState,
            RunMode,
            JobStatus,
        )
    ),
    tags(
        (name = "workloads", description = "Hosts addressed by IP, each with one set of credentials. The IP is unique and cannot be changed."),
        (name = "mount_points", description = "Named, sized volumes attached to a workload."),
        (name = "migration_targets", description = "Cloud environments (aws, azure, vsphere, vcloud) with credentials and the workload that receives migrated volumes."),
        (name = "migrations", description = "A selection of source mount points to copy onto a target workload.

States move `not_started` -> `running` -> `success` or `error`. A run replaces every mount point on the target workload with copies of the selection.
The boot volume `C:\\` can never be migrated."),
        (name = "tasks", description = "Background tasks created by asynchronous migration runs."),
    )
)]
pub struct ApiDoc;
