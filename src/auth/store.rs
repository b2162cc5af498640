// Credential persistence on top of the local store

use serde_json::Value;

use super::types::{CredentialKeys, Credentials};
use crate::storage::{LocalStore, StorageError};

/// Reads and writes the access/refresh token pair
///
/// Shared between the HTTP client (reads on every request, purges on 401)
/// and the session service (writes at login, purges at logout).
#[derive(Debug, Clone)]
pub struct CredentialStore {
    store: LocalStore,
    keys: CredentialKeys,
}

impl CredentialStore {
    pub fn new(store: LocalStore, keys: CredentialKeys) -> Self {
        Self { store, keys }
    }

    /// In-memory store with default key names
    pub fn in_memory() -> Self {
        Self::new(LocalStore::in_memory(), CredentialKeys::default())
    }

    pub fn keys(&self) -> &CredentialKeys {
        &self.keys
    }

    pub fn access_token(&self) -> Result<Option<String>, StorageError> {
        self.read_token(&self.keys.access_token)
    }

    pub fn refresh_token(&self) -> Result<Option<String>, StorageError> {
        self.read_token(&self.keys.refresh_token)
    }

    /// Full record, if an access token is stored
    pub fn load(&self) -> Result<Option<Credentials>, StorageError> {
        let access_token = match self.access_token()? {
            Some(token) => token,
            None => return Ok(None),
        };

        Ok(Some(Credentials {
            access_token,
            refresh_token: self.refresh_token()?,
        }))
    }

    /// Replace the stored record wholesale
    pub fn save(&self, credentials: &Credentials) -> Result<(), StorageError> {
        self.store
            .set(&self.keys.access_token, credentials.access_token.as_str())?;

        match credentials.refresh_token {
            Some(ref refresh_token) => self
                .store
                .set(&self.keys.refresh_token, refresh_token.as_str())?,
            None => self.store.remove(&self.keys.refresh_token)?,
        }

        tracing::debug!("Stored credentials");
        Ok(())
    }

    /// Remove both tokens
    ///
    /// Both removals are attempted even if the first fails; the first error is returned.
    pub fn clear(&self) -> Result<(), StorageError> {
        let access = self.store.remove(&self.keys.access_token);
        let refresh = self.store.remove(&self.keys.refresh_token);

        access.and(refresh)?;
        tracing::debug!("Cleared stored credentials");
        Ok(())
    }

    pub fn is_authenticated(&self) -> Result<bool, StorageError> {
        Ok(self.access_token()?.is_some())
    }

    /// Tokens are opaque: a JSON-encoded string is unwrapped, anything else is returned as stored
    fn read_token(&self, key: &str) -> Result<Option<String>, StorageError> {
        let raw = match self.store.get_raw(key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let token = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::String(token)) => token,
            Ok(Value::Null) => return Ok(None),
            _ => raw,
        };

        Ok(Some(token).filter(|t| !t.is_empty()))
    }
}
