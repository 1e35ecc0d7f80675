// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Sled-backed State Store
//!
//! Uses sled's native `compare_and_swap`, so multiple tasks in one process
//! get linearizable updates without any extra locking. Sled holds an
//! exclusive lock on its directory: only one process may open it at a time.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::repository::{validate_key, CasOutcome, StateStore, StoreError};

pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Ephemeral database, removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        validate_key(key)?;
        self.db.insert(key, value)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<CasOutcome, StoreError> {
        validate_key(key)?;
        let outcome = match self.db.compare_and_swap(key, expected, new)? {
            Ok(()) => CasOutcome::Swapped,
            Err(conflict) => CasOutcome::Conflict { current: conflict.current.map(|v| v.to_vec()) },
        };
        if outcome == CasOutcome::Swapped {
            self.db.flush_async().await?;
        }
        Ok(outcome)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.db
            .scan_prefix(prefix)
            .keys()
            .map(|k| {
                let k = k?;
                String::from_utf8(k.to_vec()).map_err(|e| StoreError::Backend(e.to_string()))
            })
            .collect()
    }
}
