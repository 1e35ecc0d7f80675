// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Receipt persistence: sealed run logs written to
//! `<AUTONOMY_STATE_DIR>/receipts/<execution_id>.json`.
//!
//! A receipt is written once; saving a second receipt for the same
//! execution id is refused so the recorded outcome cannot be replaced.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::run_log::ExecutionRunLog;

#[derive(Debug, thiserror::Error)]
pub enum ReceiptStoreError {
    #[error("execution_id `{0}` cannot be used as a receipt file name")]
    InvalidExecutionId(String),

    #[error("run log {0} is not sealed")]
    Unsealed(String),

    #[error("receipt for {0} already exists")]
    AlreadyExists(String),

    #[error("receipt {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("receipt {path} is not a valid run log: {message}")]
    Parse { path: PathBuf, message: String },
}

pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, execution_id: &str) -> Result<PathBuf, ReceiptStoreError> {
        let ok = !execution_id.is_empty()
            && execution_id != "."
            && execution_id != ".."
            && execution_id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !ok {
            return Err(ReceiptStoreError::InvalidExecutionId(execution_id.to_string()));
        }
        Ok(self.dir.join(format!("{execution_id}.json")))
    }

    pub fn save(&self, log: &ExecutionRunLog) -> Result<PathBuf, ReceiptStoreError> {
        if !log.is_sealed() {
            return Err(ReceiptStoreError::Unsealed(log.execution_id.clone()));
        }
        let path = self.path_for(&log.execution_id)?;
        let io = |e: std::io::Error| ReceiptStoreError::Io { path: path.clone(), message: e.to_string() };

        let body = serde_json::to_vec_pretty(log)
            .map_err(|e| ReceiptStoreError::Parse { path: path.clone(), message: e.to_string() })?;
        fs::create_dir_all(&self.dir).map_err(io)?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ReceiptStoreError::AlreadyExists(log.execution_id.clone()))
            }
            Err(e) => return Err(io(e)),
        };
        file.write_all(&body).map_err(io)?;
        file.sync_all().map_err(io)?;

        info!(execution_id = %log.execution_id, path = %path.display(), "Receipt saved");
        Ok(path)
    }

    pub fn load(&self, execution_id: &str) -> Result<ExecutionRunLog, ReceiptStoreError> {
        load_receipt(&self.path_for(execution_id)?)
    }
}

/// Read a receipt from an arbitrary path.
pub fn load_receipt(path: &Path) -> Result<ExecutionRunLog, ReceiptStoreError> {
    let raw = fs::read(path)
        .map_err(|e| ReceiptStoreError::Io { path: path.to_path_buf(), message: e.to_string() })?;
    serde_json::from_slice(&raw)
        .map_err(|e| ReceiptStoreError::Parse { path: path.to_path_buf(), message: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn sealed(id: &str) -> ExecutionRunLog {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let mut log = ExecutionRunLog::begin(id, "thread-1", "sync", false, "ph", at);
        log.seal(at).unwrap();
        log
    }

    #[test]
    fn test_save_load_and_verify() {
        let dir = TempDir::new().unwrap();
        let store = ReceiptStore::new(dir.path());
        let log = sealed("exec-1");

        let path = store.save(&log).unwrap();
        assert!(path.ends_with("exec-1.json"));

        let loaded = store.load("exec-1").unwrap();
        assert_eq!(loaded, log);
        loaded.verify_receipt().unwrap();

        assert!(matches!(store.save(&log), Err(ReceiptStoreError::AlreadyExists(_))));
    }

    #[test]
    fn test_rejects_unsafe_ids_and_unsealed_logs() {
        let dir = TempDir::new().unwrap();
        let store = ReceiptStore::new(dir.path());
        assert!(matches!(store.path_for("../x"), Err(ReceiptStoreError::InvalidExecutionId(_))));

        let at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let open = ExecutionRunLog::begin("exec-2", "t", "g", false, "ph", at);
        assert!(matches!(store.save(&open), Err(ReceiptStoreError::Unsealed(_))));
    }
}
