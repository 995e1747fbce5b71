//! Database models for credentials.

use crate::types::CredentialsId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database representation of a credentials record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Credentials {
    pub id: CredentialsId,
    pub username: String,
    pub password: String,
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a credentials record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsCreateDBRequest {
    pub username: String,
    pub password: String,
    pub domain: String,
}

/// Request to update a credentials record; `None` keeps the stored value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialsUpdateDBRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub domain: Option<String>,
}

impl CredentialsUpdateDBRequest {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.domain.is_none()
    }

    /// Apply the update to an in-memory record
    pub fn apply(&self, credentials: &mut Credentials) {
        if let Some(username) = &self.username {
            credentials.username = username.clone();
        }
        if let Some(password) = &self.password {
            credentials.password = password.clone();
        }
        if let Some(domain) = &self.domain {
            credentials.domain = domain.clone();
        }
    }
}

pub type CredentialsDBResponse = Credentials;
