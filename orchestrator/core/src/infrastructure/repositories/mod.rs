// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! State Store Implementations
//!
//! Infrastructure implementations of the [`StateStore`] contract defined in
//! the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist engine state with an atomic compare-and-swap
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemoryStateStore** - mutex-guarded map for tests and `--storage memory`
//! - **FileStateStore** - one JSON file per key under a state directory
//! - **SledStateStore** - embedded transactional store
//!
//! # Usage
//!
//! ```no_run
//! use sintra_core::infrastructure::repositories::file_store::FileStateStore;
//!
//! let store = FileStateStore::open("/var/lib/sintra/store")?;
//! # Ok::<(), sintra_core::domain::repository::StoreError>(())
//! ```

pub mod file_store;
pub mod sled_store;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::repository::{validate_key, CasOutcome, StateStore, StoreError};

pub use file_store::FileStateStore;
pub use sled_store::SledStateStore;

#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        validate_key(key)?;
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<CasOutcome, StoreError> {
        validate_key(key)?;
        let mut entries = self.entries.lock();
        let current = entries.get(key);
        if current.map(Vec::as_slice) != expected {
            return Ok(CasOutcome::Conflict { current: current.cloned() });
        }
        match new {
            Some(value) => entries.insert(key.to_string(), value),
            None => entries.remove(key),
        };
        Ok(CasOutcome::Swapped)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
