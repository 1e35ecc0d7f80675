// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Credit Enforcer
//!
//! Runs [`admit`] inside a compare-and-swap loop on `credits/<YYYY-MM-DD>`
//! so concurrent callers cannot both squeeze past the budget. Storage errors
//! and a corrupt day entry fail closed; an audit append failure is logged
//! and does not change the decision.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::credits::{
    admit, Admission, AuditLog, CreditAuditLine, CreditDenied, CreditEventType, CreditLedgerEntry,
};
use crate::domain::engine_config::CreditsConfig;
use crate::domain::events::PolicyEvent;
use crate::domain::repository::{cas_update, decode_json, SharedStateStore, StoreError, Update};
use crate::domain::scheduler::day_key;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum CreditError {
    #[error("credit ledger unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Usage snapshot for `credits status`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CreditStatus {
    pub monitor_enabled: bool,
    pub day_key_utc: String,
    pub used_units_today: u64,
    pub budget_units_per_day: Option<u64>,
    pub remaining_units: Option<u64>,
}

fn entry_key(day: &str) -> String {
    format!("credits/{day}")
}

pub struct CreditEnforcer {
    store: SharedStateStore,
    audit: Arc<dyn AuditLog>,
    config: CreditsConfig,
    event_bus: Option<EventBus>,
}

impl CreditEnforcer {
    pub fn new(store: SharedStateStore, audit: Arc<dyn AuditLog>, config: CreditsConfig) -> Self {
        Self { store, audit, config, event_bus: None }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Charge one run to the day's ledger.
    ///
    /// Returns `Ok(None)` when the run is admitted (or monitoring is off) and
    /// `Ok(Some(denial))` when it would exceed the daily budget.
    pub async fn enforce(
        &self,
        now: DateTime<Utc>,
        thread_id: &str,
        command: &str,
        domain_id: Option<&str>,
    ) -> Result<Option<CreditDenied>, CreditError> {
        if !self.config.monitor_enabled {
            return Ok(None);
        }

        let day = day_key(now);
        let requested = self.config.units_per_run;
        let budget = self.config.daily_budget_units;

        let (admission, used_before) = cas_update::<CreditLedgerEntry, _, _>(
            self.store.as_ref(),
            &entry_key(&day),
            |current| {
                let current = current?;
                let used_before = current
                    .as_ref()
                    .filter(|e| e.day_key_utc == day)
                    .map(|e| e.used_units_today)
                    .unwrap_or(0);
                Ok(match admit(current.as_ref(), &day, requested, budget, now) {
                    Admission::Consume(entry) => Update::Write(entry.clone(), (Admission::Consume(entry), used_before)),
                    denied @ Admission::Deny(_) => Update::Keep((denied, used_before)),
                })
            },
        )
        .await?;

        let (event_type, used_after, denied) = match admission {
            Admission::Consume(entry) => (CreditEventType::CreditConsumed, entry.used_units_today, None),
            Admission::Deny(denied) => (CreditEventType::CreditDenied, used_before, Some(denied)),
        };

        let line = CreditAuditLine {
            event_type,
            at: now,
            thread_id: thread_id.to_string(),
            command: command.to_string(),
            domain_id: domain_id.map(str::to_string),
            day_key_utc: day.clone(),
            requested_units: requested,
            used_units_before: used_before,
            used_units_after: used_after,
            budget_units_per_day: budget,
            code: denied.as_ref().map(|d| d.code.clone()),
        };
        if let Err(e) = self.audit.append(&line).await {
            warn!(day = %e.day_key_utc, error = %e.message, "Credit audit line not written");
        }

        match &denied {
            Some(d) => {
                warn!(thread_id, code = %d.code, used = used_after, "Credits denied");
                self.publish(PolicyEvent::CreditsDenied {
                    thread_id: thread_id.to_string(),
                    code: d.code.clone(),
                    day_key_utc: day,
                    used_units_today: used_after,
                    at: now,
                });
            }
            None => {
                info!(thread_id, used = used_after, budget = ?budget, "Credits consumed");
                self.publish(PolicyEvent::CreditsConsumed {
                    thread_id: thread_id.to_string(),
                    day_key_utc: day,
                    used_units_today: used_after,
                    at: now,
                });
            }
        }
        Ok(denied)
    }

    pub async fn status(&self, now: DateTime<Utc>) -> Result<CreditStatus, CreditError> {
        let day = day_key(now);
        let key = entry_key(&day);
        let used = match self.store.get(&key).await? {
            Some(bytes) => decode_json::<CreditLedgerEntry>(&key, &bytes)?.used_units_today,
            None => 0,
        };
        let budget = self.config.daily_budget_units;
        Ok(CreditStatus {
            monitor_enabled: self.config.monitor_enabled,
            day_key_utc: day,
            used_units_today: used,
            budget_units_per_day: budget,
            remaining_units: budget.map(|b| b.saturating_sub(used)),
        })
    }

    fn publish(&self, event: PolicyEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_policy_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codes::CREDITS_DAILY_BUDGET_UNITS_EXCEEDED;
    use crate::domain::repository::StateStore;
    use crate::infrastructure::audit_log::InMemoryAuditLog;
    use crate::infrastructure::repositories::InMemoryStateStore;
    use chrono::TimeZone;

    fn config(budget: Option<u64>) -> CreditsConfig {
        CreditsConfig { daily_budget_units: budget, ..CreditsConfig::default() }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_tenth_run_admitted_eleventh_denied() {
        let store = Arc::new(InMemoryStateStore::new());
        let audit = Arc::new(InMemoryAuditLog::default());
        let enforcer = CreditEnforcer::new(store, audit.clone(), config(Some(10)));

        for _ in 0..10 {
            assert!(enforcer.enforce(now(), "t1", "sync", None).await.unwrap().is_none());
        }
        let denied = enforcer.enforce(now(), "t1", "sync", Some("d1")).await.unwrap().unwrap();
        assert_eq!(denied.code, CREDITS_DAILY_BUDGET_UNITS_EXCEEDED);
        assert_eq!(denied.used_units_today, 10);

        let lines = audit.lines();
        assert_eq!(lines.len(), 11);
        let last = lines.last().unwrap();
        assert_eq!(last.event_type, CreditEventType::CreditDenied);
        assert_eq!((last.used_units_before, last.used_units_after), (10, 10));
        assert_eq!(last.domain_id.as_deref(), Some("d1"));

        let status = enforcer.status(now()).await.unwrap();
        assert_eq!(status.used_units_today, 10);
        assert_eq!(status.remaining_units, Some(0));
    }

    #[tokio::test]
    async fn test_disabled_monitor_touches_nothing() {
        let store = Arc::new(InMemoryStateStore::new());
        let audit = Arc::new(InMemoryAuditLog::default());
        let cfg = CreditsConfig { monitor_enabled: false, ..config(Some(0)) };
        let enforcer = CreditEnforcer::new(store.clone(), audit.clone(), cfg);

        assert!(enforcer.enforce(now(), "t1", "sync", None).await.unwrap().is_none());
        assert!(store.is_empty());
        assert!(audit.lines().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_entry_fails_closed() {
        let store = Arc::new(InMemoryStateStore::new());
        store.put("credits/2026-03-01", b"garbage".to_vec()).await.unwrap();
        let enforcer = CreditEnforcer::new(store, Arc::new(InMemoryAuditLog::default()), config(None));

        assert!(matches!(
            enforcer.enforce(now(), "t1", "sync", None).await,
            Err(CreditError::Store(StoreError::Corrupt { .. }))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_overspend() {
        let store = Arc::new(InMemoryStateStore::new());
        let enforcer = Arc::new(CreditEnforcer::new(
            store,
            Arc::new(InMemoryAuditLog::default()),
            config(Some(5)),
        ));

        let mut handles = Vec::new();
        for i in 0..12 {
            let enforcer = enforcer.clone();
            handles.push(tokio::spawn(async move {
                enforcer.enforce(now(), &format!("t{i}"), "sync", None).await.unwrap().is_none()
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(enforcer.status(now()).await.unwrap().used_units_today, 5);
    }
}
