// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! File-backed State Store
//!
//! Each key maps to `<root>/<key>.json`. Mutations run inside a lock scope:
//! a sibling `<key>.json.lock` file is created with `create_new` (atomic on
//! every POSIX filesystem), the value is written to a temp file and renamed
//! over the target, then the lock file is removed when the guard drops.
//! Readers never take the lock; the rename makes every read see either the
//! old or the new value.
//!
//! Filesystem calls run on the blocking pool (`spawn_blocking`); waiting for
//! a busy lock sleeps on the runtime timer.
//!
//! A lock file older than [`STALE_LOCK_AFTER`] is assumed to belong to a
//! crashed process. It is renamed aside to a unique name and removed only if
//! the renamed file is still stale; a guard removes its lock file only while
//! the file still carries its own token.

use async_trait::async_trait;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::domain::repository::{validate_key, CasOutcome, StateStore, StoreError};

const LOCK_RETRIES: usize = 200;
const LOCK_BACKOFF: Duration = Duration::from_millis(10);
pub const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);

pub struct FileStateStore {
    disk: Arc<Disk>,
}

fn io_err(key: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Io { key: key.to_string(), message: err.to_string() }
}

fn lock_age(path: &Path) -> Option<Duration> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
}

struct KeyLockGuard {
    lock_path: PathBuf,
    token: String,
    _file: File,
}

enum LockAttempt {
    Acquired(KeyLockGuard),
    Busy,
}

impl KeyLockGuard {
    fn try_acquire(key: &str, lock_path: &Path) -> Result<LockAttempt, StoreError> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(key, e))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(lock_path) {
            Ok(mut file) => {
                let token = uuid::Uuid::new_v4().simple().to_string();
                let _ = writeln!(
                    file,
                    "pid={}\nutc={}\ntoken={token}",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                Ok(LockAttempt::Acquired(Self { lock_path: lock_path.to_path_buf(), token, _file: file }))
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if lock_age(lock_path).is_some_and(|age| age > STALE_LOCK_AFTER) {
                    Self::break_stale(key, lock_path);
                }
                Ok(LockAttempt::Busy)
            }
            Err(err) => Err(io_err(key, err)),
        }
    }

    /// Moves the lock aside before deleting it, so a lock re-created by
    /// another process after the age check is never removed.
    fn break_stale(key: &str, lock_path: &Path) {
        let mut aside = lock_path.as_os_str().to_owned();
        aside.push(format!(".stale-{}", uuid::Uuid::new_v4().simple()));
        let aside = PathBuf::from(aside);
        if fs::rename(lock_path, &aside).is_err() {
            return;
        }
        if lock_age(&aside).is_some_and(|age| age > STALE_LOCK_AFTER) {
            warn!(key, "Breaking stale state lock {}", lock_path.display());
        } else {
            // Not the file we judged stale: put it back unless the slot is taken.
            let _ = fs::hard_link(&aside, lock_path);
        }
        let _ = fs::remove_file(&aside);
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        let ours = fs::read_to_string(&self.lock_path).is_ok_and(|body| body.contains(&self.token));
        if ours {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

/// Synchronous filesystem side of the store.
struct Disk {
    root: PathBuf,
}

impl Disk {
    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json.lock"))
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(key, err)),
        }
    }

    /// Write via temp file + rename. Caller holds the key lock.
    fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.value_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(key, e))?;
        }
        let tmp = self.root.join(format!("{key}.json.tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, value).map_err(|e| io_err(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            io_err(key, e)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(key, err)),
        }
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<CasOutcome, StoreError> {
        let current = self.read(key)?;
        if current.as_deref() != expected {
            debug!(key, "State CAS conflict");
            return Ok(CasOutcome::Conflict { current });
        }
        match new {
            Some(value) => self.write(key, &value)?,
            None => self.remove(key)?,
        }
        Ok(CasOutcome::Swapped)
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect_keys(&path, out)?;
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if let Some(key) = relative.strip_suffix(".json") {
                out.push(key.to_string());
            }
        }
        Ok(())
    }
}

impl FileStateStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_err(&root.display().to_string(), e))?;
        Ok(Self { disk: Arc::new(Disk { root }) })
    }

    pub fn root(&self) -> &Path {
        &self.disk.root
    }

    /// Run `op` against the disk on the blocking pool.
    async fn blocking<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Disk) -> Result<T, StoreError> + Send + 'static,
    {
        let disk = self.disk.clone();
        tokio::task::spawn_blocking(move || op(&disk)).await.map_err(|e| io_err(key, e))?
    }

    async fn lock(&self, key: &str) -> Result<KeyLockGuard, StoreError> {
        for _ in 0..LOCK_RETRIES {
            let owned_key = key.to_string();
            let attempt = self
                .blocking(key, move |disk| KeyLockGuard::try_acquire(&owned_key, &disk.lock_path(&owned_key)))
                .await?;
            match attempt {
                LockAttempt::Acquired(guard) => return Ok(guard),
                LockAttempt::Busy => tokio::time::sleep(LOCK_BACKOFF).await,
            }
        }
        Err(StoreError::Contention(key.to_string()))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        let owned_key = key.to_string();
        self.blocking(key, move |disk| disk.read(&owned_key)).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        validate_key(key)?;
        let guard = self.lock(key).await?;
        let owned_key = key.to_string();
        self.blocking(key, move |disk| {
            let _guard = guard;
            disk.write(&owned_key, &value)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<CasOutcome, StoreError> {
        validate_key(key)?;
        let guard = self.lock(key).await?;
        let owned_key = key.to_string();
        let expected = expected.map(<[u8]>::to_vec);
        self.blocking(key, move |disk| {
            let _guard = guard;
            disk.compare_and_swap(&owned_key, expected.as_deref(), new)
        })
        .await
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let owned_prefix = prefix.to_string();
        self.blocking(prefix, move |disk| {
            let mut keys = Vec::new();
            disk.collect_keys(&disk.root, &mut keys).map_err(|e| io_err(&owned_prefix, e))?;
            keys.retain(|k| k.starts_with(&owned_prefix));
            keys.sort();
            Ok(keys)
        })
        .await
    }
}
