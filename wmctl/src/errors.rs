use crate::db::errors::{DbError, MOUNT_POINT_NAME_CONSTRAINT, WORKLOAD_IP_CONSTRAINT};
use crate::migration::MigrationError;
use crate::validation::ValidationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Request conflicts with the current state of a resource
    #[error("{message}")]
    Conflict { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Field or business rule violation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Migration execution error
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn validation_status(err: &ValidationError) -> StatusCode {
    match err {
        ValidationError::DuplicateIp { .. } => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn validation_kind(err: &ValidationError) -> &'static str {
    match err {
        ValidationError::MissingField { .. } => "missing_field",
        ValidationError::FieldTooLong { .. } => "field_too_long",
        ValidationError::InvalidIp { .. } => "invalid_ip",
        ValidationError::DuplicateIp { .. } => "duplicate_ip",
        ValidationError::ImmutableFieldViolation { .. } => "immutable_field_violation",
        ValidationError::InvalidCloudType { .. } => "invalid_cloud_type",
        ValidationError::InvalidSize { .. } => "invalid_size",
        ValidationError::ForeignMountPoint { .. } => "foreign_mount_point",
        ValidationError::ForbiddenVolume { .. } => "forbidden_volume",
    }
}

fn db_status(err: &DbError) -> StatusCode {
    match err {
        DbError::NotFound => StatusCode::NOT_FOUND,
        DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
        DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
        DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
        DbError::ProtectedEntity { .. } => StatusCode::CONFLICT,
        DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn db_message(err: &DbError) -> String {
    match err {
        DbError::NotFound => "Resource not found".to_string(),
        DbError::UniqueViolation { constraint, .. } => match constraint.as_deref() {
            Some(WORKLOAD_IP_CONSTRAINT) => "A workload with this IP already exists".to_string(),
            Some(MOUNT_POINT_NAME_CONSTRAINT) => "A mount point with this name already exists on the workload".to_string(),
            _ => "Resource already exists".to_string(),
        },
        DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
        DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
        DbError::ProtectedEntity {
            operation,
            entity_type,
            reason,
            ..
        } => format!("Cannot {operation} {entity_type}: {reason}"),
        DbError::Other(_) => "Database error occurred".to_string(),
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Validation(err) => validation_status(err),
            Error::Migration(err) => match err {
                MigrationError::Rejected(err) => validation_status(err),
                MigrationError::NotFound(_) => StatusCode::NOT_FOUND,
                MigrationError::AlreadyRunning(_) => StatusCode::CONFLICT,
                MigrationError::ExecutionFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                MigrationError::Database(err) => db_status(err),
            },
            Error::Database(err) => db_status(err),
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind included in JSON error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadRequest { .. } => "bad_request",
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::Validation(err) | Error::Migration(MigrationError::Rejected(err)) => validation_kind(err),
            Error::Migration(MigrationError::NotFound(_)) => "not_found",
            Error::Migration(MigrationError::AlreadyRunning(_)) => "already_running",
            Error::Migration(MigrationError::ExecutionFailure { .. }) => "execution_failure",
            Error::Migration(MigrationError::Database(err)) | Error::Database(err) => match err {
                DbError::NotFound => "not_found",
                DbError::UniqueViolation { .. } => "conflict",
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => "invalid_reference",
                DbError::ProtectedEntity { .. } => "protected",
                DbError::Other(_) => "internal",
            },
            Error::Internal { .. } | Error::Other(_) => "internal",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } | Error::Conflict { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
            Error::Validation(err) => err.to_string(),
            Error::Migration(err) => match err {
                MigrationError::Rejected(err) => err.to_string(),
                MigrationError::NotFound(id) => format!("Migration with ID {id} not found"),
                MigrationError::AlreadyRunning(_) => err.to_string(),
                MigrationError::ExecutionFailure { migration_id, .. } => {
                    format!("Migration {migration_id} failed while copying mount points")
                }
                MigrationError::Database(err) => db_message(err),
            },
            Error::Database(err) => db_message(err),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_))
            | Error::Migration(MigrationError::Database(DbError::Other(_)))
            | Error::Migration(MigrationError::ExecutionFailure { .. })
            | Error::Internal { .. }
            | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) | Error::Migration(MigrationError::Database(_)) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Conflict { .. } | Error::Migration(MigrationError::AlreadyRunning(_)) => {
                tracing::warn!("Conflict error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::Validation(_) | Error::Migration(_) => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = json!({
            "error": self.kind(),
            "message": self.user_message(),
        });
        (status, axum::response::Json(body)).into_response()
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
