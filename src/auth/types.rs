// Authentication types

use serde::{Deserialize, Serialize};

/// Stored credential record; both tokens are opaque
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Storage key names for the two managed tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialKeys {
    pub access_token: String,
    pub refresh_token: String,
}

impl Default for CredentialKeys {
    fn default() -> Self {
        Self {
            access_token: "access_token".to_string(),
            refresh_token: "refresh_token".to_string(),
        }
    }
}

/// Login request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Login response body
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: Option<String>,
    pub user: User,
}

/// Authenticated user as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}
