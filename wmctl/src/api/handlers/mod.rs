//! HTTP request handlers for all API endpoints.
//!
//! One handler per operation, grouped by resource. Handlers validate input,
//! call [`Storage`](crate::db::handlers::Storage) or the migration runner, and
//! convert records into API models; errors are returned as
//! [`Error`](crate::errors::Error), which renders the HTTP response.
//!
//! - [`workloads`]: `/workloads` CRUD
//! - [`mount_points`]: `/mountpoints` CRUD
//! - [`migration_targets`]: `/targets` CRUD
//! - [`migrations`]: `/migrations` CRUD and `/migrations/{id}/run`
//! - [`tasks`]: background task status and cancellation

pub mod migration_targets;
pub mod migrations;
pub mod mount_points;
pub mod tasks;
pub mod workloads;
