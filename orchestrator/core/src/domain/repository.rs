// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Durable State Store
//!
//! Every piece of cross-invocation state the engine owns (idempotency records,
//! scheduler dedup windows and run counters, last outcomes, credit counters)
//! lives behind one key-value contract with an explicit atomic
//! compare-and-swap. The policy code never touches files directly.
//!
//! | Backend | Module | Atomicity |
//! |---------|--------|-----------|
//! | `InMemoryStateStore` | `infrastructure::repositories` | process-local mutex |
//! | `FileStateStore` | `infrastructure::repositories::file_store` | exclusive lock file + atomic rename |
//! | `SledStateStore` | `infrastructure::repositories::sled_store` | sled native CAS |
//!
//! Keys are `/`-separated ASCII paths such as `scheduler/runs/2026-01-02/job-a`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Result of a compare-and-swap attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped,
    /// The stored value did not match `expected`; carries what is stored now.
    Conflict { current: Option<Vec<u8>> },
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Unconditional write.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Atomically replace the value at `key` with `new` iff it currently
    /// equals `expected` (`None` = absent). `new = None` deletes.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<CasOutcome, StoreError>;

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {key}: {message}")]
    Io { key: String, message: String },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Corrupt value at {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Lock contention on {0}")]
    Contention(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

const MAX_CAS_ATTEMPTS: usize = 64;

/// Decode a stored JSON value. Corruption is reported, never panics.
pub fn decode_json<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

pub fn encode_json<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// What a `cas_update` closure decided to do with the current value.
pub enum Update<T, R> {
    /// Write `T` and return `R` once the swap lands.
    Write(T, R),
    /// Leave the store untouched and return `R`.
    Keep(R),
}

/// Optimistic read-modify-write loop over a JSON value.
///
/// `f` sees the decoded current value (`None` if absent) and is re-run on
/// conflict with the fresh value, so it must be free of side effects.
/// A value that fails to decode is handed to `f` as `Err` so the caller can
/// apply its own corruption policy.
pub async fn cas_update<T, R, F>(store: &dyn StateStore, key: &str, mut f: F) -> Result<R, StoreError>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(Result<Option<T>, StoreError>) -> Result<Update<T, R>, StoreError>,
{
    let mut current = store.get(key).await?;
    for _ in 0..MAX_CAS_ATTEMPTS {
        let decoded = match current.as_deref() {
            None => Ok(None),
            Some(bytes) => decode_json::<T>(key, bytes).map(Some),
        };
        match f(decoded)? {
            Update::Keep(result) => return Ok(result),
            Update::Write(value, result) => {
                let bytes = encode_json(key, &value)?;
                match store.compare_and_swap(key, current.as_deref(), Some(bytes)).await? {
                    CasOutcome::Swapped => return Ok(result),
                    CasOutcome::Conflict { current: fresh } => current = fresh,
                }
            }
        }
    }
    Err(StoreError::Contention(key.to_string()))
}

pub type SharedStateStore = Arc<dyn StateStore>;

/// Reject keys that could escape a file-backed root.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && !key.starts_with('/')
        && key.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '@' | '#' | ':'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("scheduler/runs/2026-01-02/job-a").is_ok());
        assert!(validate_key("scheduler/dedup/job-a/job-a@1700000000#deadbeef").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a b").is_err());
        assert!(validate_key("").is_err());
    }
}
