//! Database layer for data persistence and access.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers, migration runner)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Storage   │  (db::handlers - the Storage trait and its backends)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────────────────┐
//! │ PostgreSQL  |  in-memory │
//! └─────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: The [`Storage`](handlers::Storage) trait with PostgreSQL and in-memory backends
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! # Migrations
//!
//! Schema migrations are managed by SQLx and located in the `migrations/` directory.
//! The [`crate::migrator`] function provides access to the migrator:
//!
//! ```ignore
//! wmctl::migrator().run(&pool).await?;
//! ```

pub mod errors;
pub mod handlers;
pub mod models;
