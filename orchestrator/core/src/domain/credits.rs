// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Daily credit-unit accounting.
//!
//! One [`CreditLedgerEntry`] per UTC day, monotonic within the day. The
//! admission rule is pure ([`admit`]); `application::credits` runs it inside
//! a compare-and-swap loop so check and increment are one atomic step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::codes::CREDITS_DAILY_BUDGET_UNITS_EXCEEDED;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub day_key_utc: String,
    pub used_units_today: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_units_per_day: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditDenied {
    pub code: String,
    pub reason: String,
    pub day_key_utc: String,
    pub used_units_today: u64,
    pub requested_units: u64,
    pub budget_units_per_day: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Usage after the increment.
    Consume(CreditLedgerEntry),
    Deny(CreditDenied),
}

/// Decide one request against the day's entry (`None` = nothing used yet).
pub fn admit(
    current: Option<&CreditLedgerEntry>,
    day_key_utc: &str,
    requested_units: u64,
    budget_units_per_day: Option<u64>,
    now: DateTime<Utc>,
) -> Admission {
    let used = current
        .filter(|e| e.day_key_utc == day_key_utc)
        .map(|e| e.used_units_today)
        .unwrap_or(0);

    if let Some(budget) = budget_units_per_day {
        if used.saturating_add(requested_units) > budget {
            return Admission::Deny(CreditDenied {
                code: CREDITS_DAILY_BUDGET_UNITS_EXCEEDED.to_string(),
                reason: format!(
                    "{used} + {requested_units} units would exceed the daily budget of {budget} for {day_key_utc}"
                ),
                day_key_utc: day_key_utc.to_string(),
                used_units_today: used,
                requested_units,
                budget_units_per_day: budget,
            });
        }
    }

    Admission::Consume(CreditLedgerEntry {
        day_key_utc: day_key_utc.to_string(),
        used_units_today: used.saturating_add(requested_units),
        budget_units_per_day,
        updated_at: now,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditEventType {
    CreditConsumed,
    CreditDenied,
}

/// One line of the append-only `credits-<day>.jsonl` audit ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAuditLine {
    #[serde(rename = "type")]
    pub event_type: CreditEventType,
    pub at: DateTime<Utc>,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    pub command: String,
    #[serde(rename = "domainId", default, skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,
    pub day_key_utc: String,
    pub requested_units: u64,
    pub used_units_before: u64,
    pub used_units_after: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_units_per_day: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("credit audit log write failed for {day_key_utc}: {message}")]
pub struct AuditLogError {
    pub day_key_utc: String,
    pub message: String,
}

/// Append-only sink for [`CreditAuditLine`]s.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, line: &CreditAuditLine) -> Result<(), AuditLogError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
    }

    fn entry(used: u64) -> CreditLedgerEntry {
        CreditLedgerEntry {
            day_key_utc: "2026-01-05".into(),
            used_units_today: used,
            budget_units_per_day: Some(10),
            updated_at: now(),
        }
    }

    #[test]
    fn test_budget_boundary() {
        match admit(Some(&entry(9)), "2026-01-05", 1, Some(10), now()) {
            Admission::Consume(e) => assert_eq!(e.used_units_today, 10),
            other => panic!("expected consume, got {other:?}"),
        }
        match admit(Some(&entry(10)), "2026-01-05", 1, Some(10), now()) {
            Admission::Deny(d) => {
                assert_eq!(d.code, CREDITS_DAILY_BUDGET_UNITS_EXCEEDED);
                assert_eq!(d.used_units_today, 10);
            }
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[test]
    fn test_monitoring_only_always_consumes() {
        match admit(Some(&entry(1_000)), "2026-01-05", 5, None, now()) {
            Admission::Consume(e) => assert_eq!(e.used_units_today, 1_005),
            other => panic!("expected consume, got {other:?}"),
        }
    }

    #[test]
    fn test_entry_from_previous_day_resets() {
        let mut stale = entry(10);
        stale.day_key_utc = "2026-01-04".into();
        match admit(Some(&stale), "2026-01-05", 1, Some(10), now()) {
            Admission::Consume(e) => {
                assert_eq!(e.used_units_today, 1);
                assert_eq!(e.day_key_utc, "2026-01-05");
            }
            other => panic!("expected consume, got {other:?}"),
        }
    }
}
