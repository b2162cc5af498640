// Login / logout over the API client

use anyhow::Context;
use serde_json::{json, Value};
use std::sync::Arc;

use super::types::{Credentials, LoginRequest, LoginResponse, User};
use crate::error::{normalize, ApiError, RequestFailure};
use crate::http_client::ApiClient;

/// Authentication session
///
/// Owns the credential lifecycle: created at login, removed at logout.
/// Removal on 401 happens inside [`ApiClient`].
pub struct Session {
    client: Arc<ApiClient>,
}

impl Session {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// Log in and store the returned credentials
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        tracing::info!(email, "Logging in");

        let response: LoginResponse = self
            .client
            .post("/auth/login", &LoginRequest { email, password })
            .await?;

        let credentials = Credentials {
            access_token: response.token,
            refresh_token: response.refresh_token,
        };

        self.client
            .credentials()
            .save(&credentials)
            .context("Failed to store credentials")
            .map_err(|e| normalize(RequestFailure::Other(e)))?;

        tracing::info!(user_id = %response.user.id, "Logged in");
        Ok(response.user)
    }

    /// Log out; local credentials are removed even if the server call fails
    pub async fn logout(&self) -> Result<(), ApiError> {
        if self.is_authenticated() {
            let result: Result<Value, ApiError> =
                self.client.post("/auth/logout", &json!({})).await;

            if let Err(e) = result {
                tracing::warn!(code = %e.code, "Logout request failed, clearing local session anyway");
            }
        }

        self.client
            .credentials()
            .clear()
            .context("Failed to clear credentials")
            .map_err(|e| normalize(RequestFailure::Other(e)))?;

        tracing::info!("Logged out");
        Ok(())
    }

    /// Currently authenticated user
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.client.get("/auth/me").await
    }

    pub fn is_authenticated(&self) -> bool {
        match self.client.credentials().is_authenticated() {
            Ok(authenticated) => authenticated,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read credentials");
                false
            }
        }
    }
}
