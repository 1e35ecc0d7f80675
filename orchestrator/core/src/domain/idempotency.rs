// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Idempotency Ledger
//!
//! Durable `idempotency_key -> IdempotencyRecord` memo guaranteeing at most one
//! side-effecting execution per logical write.
//!
//! ## Protocol
//!
//! ```text
//! claim(key) ──▶ Acquired(token) ──▶ call adapter ──ok──▶ commit(record)
//!     │                                   └──err──▶ release(key, token)
//!     ├──▶ Replay(record)   (already committed: no external call)
//!     └──▶ InFlight{holder} (a fresh claim is held by another attempt)
//! ```
//!
//! `claim` is a single compare-and-swap from "absent" to `Pending`, so two
//! concurrent runs can never both observe "not found" and both call out.
//! Every claim carries a fresh [`ClaimToken`]; a live claim is only ever
//! released by the token that took it, even when two attempts share an
//! execution id. A `Pending` claim older than `stale_claim_after` is assumed
//! abandoned (crashed holder) and may be taken over.
//!
//! ## Corrupt records
//!
//! An unreadable record is handled per [`CorruptRecordPolicy`]. The default,
//! `FailOpen`, treats it as "not found" and lets a fresh, policy-checked write
//! proceed; `FailClosed` refuses with [`PersistenceError::Corrupt`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::hashing::sha256_hex;
use crate::domain::repository::{
    cas_update, decode_json, encode_json, CasOutcome, SharedStateStore, StoreError, Update,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub execution_id: String,
    pub plan_hash: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    pub step_id: String,
    pub action: String,
    pub http_status: Option<u16>,
    pub response: Value,
    pub executed_at: DateTime<Utc>,
}

/// Stored form of a ledger slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum LedgerEntry {
    Pending {
        execution_id: String,
        #[serde(default)]
        claim_token: String,
        claimed_at: DateTime<Utc>,
    },
    Committed(IdempotencyRecord),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptRecordPolicy {
    #[default]
    FailOpen,
    FailClosed,
}

/// Proof of one claim attempt, needed to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToken(String);

impl ClaimToken {
    fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    Acquired(ClaimToken),
    Replay(IdempotencyRecord),
    InFlight { holder: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("idempotency storage I/O failed: {0}")]
    Io(String),

    #[error("idempotency record {key} is corrupt: {message}")]
    Corrupt { key: String, message: String },

    #[error("idempotency storage backend failed: {0}")]
    Backend(String),
}

impl From<StoreError> for PersistenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io { key, message } => PersistenceError::Io(format!("{key}: {message}")),
            StoreError::Corrupt { key, message } => PersistenceError::Corrupt { key, message },
            other => PersistenceError::Backend(other.to_string()),
        }
    }
}

pub struct IdempotencyLedger {
    store: SharedStateStore,
    on_corrupt: CorruptRecordPolicy,
    stale_claim_after: Duration,
}

impl IdempotencyLedger {
    pub const DEFAULT_STALE_CLAIM_AFTER_MS: i64 = 10 * 60 * 1000;

    pub fn new(store: SharedStateStore) -> Self {
        Self {
            store,
            on_corrupt: CorruptRecordPolicy::default(),
            stale_claim_after: Duration::milliseconds(Self::DEFAULT_STALE_CLAIM_AFTER_MS),
        }
    }

    pub fn with_corrupt_policy(mut self, policy: CorruptRecordPolicy) -> Self {
        self.on_corrupt = policy;
        self
    }

    pub fn with_stale_claim_after(mut self, after: Duration) -> Self {
        self.stale_claim_after = after;
        self
    }

    /// Store key for an idempotency key. Keys outside the safe alphabet are hashed.
    fn slot(key: &str) -> String {
        let safe = !key.is_empty()
            && key.len() <= 128
            && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
            && key != "."
            && key != "..";
        if safe {
            format!("idempotency/{key}")
        } else {
            format!("idempotency/{}", sha256_hex(key))
        }
    }

    fn on_corrupt_read(&self, slot: &str, err: StoreError) -> Result<(), PersistenceError> {
        match self.on_corrupt {
            CorruptRecordPolicy::FailOpen => {
                warn!(slot, error = %err, "Corrupt idempotency record treated as absent");
                Ok(())
            }
            CorruptRecordPolicy::FailClosed => Err(err.into()),
        }
    }

    /// Committed record for `key`, if any. A pending claim reads as absent.
    pub async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, PersistenceError> {
        let slot = Self::slot(key);
        let Some(bytes) = self.store.get(&slot).await? else {
            return Ok(None);
        };
        match decode_json::<LedgerEntry>(&slot, &bytes) {
            Ok(LedgerEntry::Committed(record)) => Ok(Some(record)),
            Ok(LedgerEntry::Pending { .. }) => Ok(None),
            Err(err) => self.on_corrupt_read(&slot, err).map(|_| None),
        }
    }

    /// Unconditional write of a committed record.
    pub async fn put(&self, record: &IdempotencyRecord) -> Result<(), PersistenceError> {
        let slot = Self::slot(&record.idempotency_key);
        let bytes = encode_json(&slot, &LedgerEntry::Committed(record.clone()))?;
        self.store.put(&slot, bytes).await?;
        Ok(())
    }

    /// Atomically claim `key` for one attempt of `execution_id`.
    ///
    /// A live claim held by any other attempt, including an earlier attempt
    /// of the same execution, reads as `InFlight` until it is released or
    /// goes stale.
    pub async fn claim(
        &self,
        key: &str,
        execution_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Claim, PersistenceError> {
        let slot = Self::slot(key);
        let token = ClaimToken::fresh();
        let pending = LedgerEntry::Pending {
            execution_id: execution_id.to_string(),
            claim_token: token.0.clone(),
            claimed_at: now,
        };
        let acquired = || -> Result<Update<LedgerEntry, Claim>, StoreError> {
            Ok(Update::Write(pending.clone(), Claim::Acquired(token.clone())))
        };
        let stale_after = self.stale_claim_after;
        let on_corrupt = self.on_corrupt;

        let claim = cas_update::<LedgerEntry, Claim, _>(self.store.as_ref(), &slot, |current| match current {
            Ok(None) => acquired(),
            Ok(Some(LedgerEntry::Committed(record))) => Ok(Update::Keep(Claim::Replay(record))),
            Ok(Some(LedgerEntry::Pending { execution_id: holder, claimed_at, .. })) => {
                if now - claimed_at > stale_after {
                    acquired()
                } else {
                    Ok(Update::Keep(Claim::InFlight { holder }))
                }
            }
            Err(err) => match on_corrupt {
                CorruptRecordPolicy::FailOpen => acquired(),
                CorruptRecordPolicy::FailClosed => Err(err),
            },
        })
        .await?;

        debug!(slot = %slot, execution_id, ?claim, "Idempotency claim evaluated");
        Ok(claim)
    }

    /// Record a successful write. Must be called before the next step runs.
    pub async fn commit(&self, record: &IdempotencyRecord) -> Result<(), PersistenceError> {
        self.put(record).await
    }

    /// Drop the pending claim taken with `token` after a failed write so a
    /// later run may retry. Committed records are never released.
    pub async fn release(&self, key: &str, token: &ClaimToken) -> Result<(), PersistenceError> {
        let slot = Self::slot(key);
        let Some(bytes) = self.store.get(&slot).await? else {
            return Ok(());
        };
        let held = matches!(
            decode_json::<LedgerEntry>(&slot, &bytes),
            Ok(LedgerEntry::Pending { ref claim_token, .. }) if claim_token == token.as_str()
        );
        if held {
            if let CasOutcome::Conflict { .. } = self.store.compare_and_swap(&slot, Some(&bytes), None).await? {
                debug!(slot = %slot, "Idempotency claim changed before release");
            }
        }
        Ok(())
    }
}
