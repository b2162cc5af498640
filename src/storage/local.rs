// JSON-aware key-value store

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::backend::{MemoryStorage, Storage, StorageError};

/// Key-value store that encodes values as JSON over a raw [`Storage`] backend
///
/// Reading never fails on bad JSON and writing never fails on a value
/// that cannot be serialized; only backend errors are returned.
#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn Storage>,
}

impl LocalStore {
    pub fn new(backend: Arc<dyn Storage>) -> Self {
        Self { backend }
    }

    /// Store backed by a fresh [`MemoryStorage`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Parsed value for `key`, or the raw string when it is not valid JSON
    pub fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let raw = match self.backend.get_raw(key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        Ok(Some(
            serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw)),
        ))
    }

    /// Stored string exactly as written, without JSON decoding
    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.backend.get_raw(key)
    }

    /// Typed read; a stored value that does not fit `T` reads as absent
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let value = match self.get(key)? {
            Some(value) => value,
            None => return Ok(None),
        };

        match serde_json::from_value(value) {
            Ok(typed) => Ok(Some(typed)),
            Err(e) => {
                tracing::debug!(key, error = %e, "Stored value does not match requested type");
                Ok(None)
            }
        }
    }

    /// Store `value` as JSON, falling back to its `Debug` rendering if it
    /// cannot be serialized
    pub fn set<T>(&self, key: &str, value: &T) -> Result<(), StorageError>
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        let encoded = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key, error = %e, "Value is not serializable, storing its string form");
                format!("{:?}", value)
            }
        };

        self.backend.set_raw(key, &encoded)
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(key)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.backend.clear()
    }
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}
