//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! All resources live under `/api/v1`:
//!
//! - **Workloads** (`/workloads/*`): hosts, their credentials and mount points
//! - **Mount points** (`/mountpoints/*`): volumes attached to workloads
//! - **Targets** (`/targets/*`): cloud environments migrations write into
//! - **Migrations** (`/migrations/*`): selections and runs
//! - **Tasks** (`/tasks/*`): background runs started in async mode
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa`. The document is served at
//! `/api-docs/openapi.json` and browsable at `/docs` when the server is running.

pub mod handlers;
pub mod models;
