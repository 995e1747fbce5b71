//! API request/response models for credentials.
//!
//! Credentials are only ever created or changed as part of their owning
//! workload or migration target. Passwords are write-only.

use crate::db::models::credentials::{Credentials, CredentialsCreateDBRequest, CredentialsUpdateDBRequest};
use crate::types::CredentialsId;
use crate::validation::{ValidationError, validate_credentials, validate_credentials_update};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Username/password/domain triple as submitted by clients.
///
/// On create every field is required; on update omitted fields keep their
/// stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CredentialsInput {
    #[schema(example = "administrator")]
    pub username: Option<String>,
    #[schema(example = "s3cret")]
    pub password: Option<String>,
    #[schema(example = "CORP")]
    pub domain: Option<String>,
}

impl CredentialsInput {
    pub fn into_create(self) -> Result<CredentialsCreateDBRequest, ValidationError> {
        validate_credentials(self.username, self.password, self.domain)
    }

    pub fn into_update(self) -> Result<CredentialsUpdateDBRequest, ValidationError> {
        let update = CredentialsUpdateDBRequest {
            username: self.username,
            password: self.password,
            domain: self.domain,
        };
        validate_credentials_update(&update)?;
        Ok(update)
    }
}

/// Credentials as returned by the API (the password is never included)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CredentialsResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: CredentialsId,
    pub username: String,
    pub domain: String,
}

impl From<Credentials> for CredentialsResponse {
    fn from(credentials: Credentials) -> Self {
        Self {
            id: credentials.id,
            username: credentials.username,
            domain: credentials.domain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_password_is_not_serialized() {
        let response = CredentialsResponse::from(Credentials {
            id: Uuid::new_v4(),
            username: "administrator".to_string(),
            password: "s3cret".to_string(),
            domain: "CORP".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["username"], "administrator");
    }

    #[test]
    fn test_partial_update_keeps_missing_fields() {
        let input = CredentialsInput {
            password: Some("rotated".to_string()),
            ..Default::default()
        };
        let update = input.into_update().unwrap();
        assert_eq!(update.password.as_deref(), Some("rotated"));
        assert!(update.username.is_none());
        assert!(CredentialsInput::default().into_create().is_err());
    }
}
