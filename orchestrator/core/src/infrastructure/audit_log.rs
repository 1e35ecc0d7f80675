// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Credit audit ledger sinks.
//!
//! [`JsonlAuditLog`] appends one JSON object per line to
//! `<dir>/credits-<day_key_utc>.jsonl`. Lines are written with a single
//! `write_all` on an `O_APPEND` handle so concurrent appenders never
//! interleave within a line.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::credits::{AuditLog, AuditLogError, CreditAuditLine};

pub struct JsonlAuditLog {
    dir: PathBuf,
}

impl JsonlAuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, day_key_utc: &str) -> PathBuf {
        self.dir.join(format!("credits-{day_key_utc}.jsonl"))
    }

    /// All lines recorded for `day_key_utc`. Unparseable lines are skipped.
    pub fn read_day(&self, day_key_utc: &str) -> std::io::Result<Vec<CreditAuditLine>> {
        read_lines(&self.path_for(day_key_utc))
    }
}

fn read_lines(path: &Path) -> std::io::Result<Vec<CreditAuditLine>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl AuditLog for JsonlAuditLog {
    async fn append(&self, line: &CreditAuditLine) -> Result<(), AuditLogError> {
        let err = |message: String| AuditLogError { day_key_utc: line.day_key_utc.clone(), message };

        let mut encoded = serde_json::to_string(line).map_err(|e| err(e.to_string()))?;
        encoded.push('\n');

        fs::create_dir_all(&self.dir).map_err(|e| err(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&line.day_key_utc))
            .map_err(|e| err(e.to_string()))?;
        file.write_all(encoded.as_bytes()).map_err(|e| err(e.to_string()))
    }
}

/// Keeps lines in memory; used by tests and `--storage memory`.
#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    lines: Arc<Mutex<Vec<CreditAuditLine>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<CreditAuditLine> {
        self.lines.lock().clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, line: &CreditAuditLine) -> Result<(), AuditLogError> {
        self.lines.lock().push(line.clone());
        Ok(())
    }
}
