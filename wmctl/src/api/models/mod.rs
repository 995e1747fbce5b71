//! API request and response data models.
//!
//! These are distinct from the database records in [`crate::db::models`] so
//! the wire format can evolve independently of storage. Every model carries
//! `utoipa` annotations for the generated OpenAPI document.
//!
//! - [`workloads`]: hosts and their credentials
//! - [`mount_points`]: volumes attached to a workload
//! - [`migration_targets`]: cloud type, credentials and target workload
//! - [`migrations`]: selections, states and run requests
//! - [`tasks`]: background task status
//! - [`credentials`]: shared credentials payloads (passwords are never returned)

pub mod credentials;
pub mod migration_targets;
pub mod migrations;
pub mod mount_points;
pub mod pagination;
pub mod tasks;
pub mod workloads;
