//! Database record models matching table schemas.
//!
//! This module contains struct definitions that directly correspond to database
//! table rows. These models are used by storage backends to return query results
//! and accept insertion/update data.
//!
//! # Design Principles
//!
//! - **Schema Mapping**: Each row struct matches a database table schema
//! - **SQLx Integration**: Row models derive `sqlx::FromRow` for query results
//! - **Separation**: Database models are distinct from API models to allow
//!   independent evolution of storage and API representations
//! - **Plain Values**: Records are returned by value; nothing here saves itself
//!
//! # Models
//!
//! - [`credentials`]: Username/password/domain triples owned by workloads and targets
//! - [`workloads`]: IP-addressed hosts
//! - [`mount_points`]: Volumes attached to a workload
//! - [`migration_targets`]: Cloud type + credentials + target workload
//! - [`migrations`]: Source/target/selection plus the migration state
//!
//! # Conversion to API Models
//!
//! API models implement `From` for the `*DBResponse` types:
//!
//! ```ignore
//! use wmctl::api::models::workloads::WorkloadResponse;
//!
//! let response = WorkloadResponse::from(db_workload);
//! ```

pub mod credentials;
pub mod migration_targets;
pub mod migrations;
pub mod mount_points;
pub mod workloads;
