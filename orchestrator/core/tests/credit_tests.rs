// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use sintra_core::application::repository_factory::{create_audit_log, create_credit_store, create_state_store};
use sintra_core::application::CreditEnforcer;
use sintra_core::domain::codes::CREDITS_DAILY_BUDGET_UNITS_EXCEEDED;
use sintra_core::domain::credits::CreditEventType;
use sintra_core::domain::engine_config::{CreditsConfig, EngineConfigManifest};
use sintra_core::infrastructure::audit_log::JsonlAuditLog;

fn config(dir: &TempDir, budget: u64) -> EngineConfigManifest {
    let mut config = EngineConfigManifest::default();
    config.spec.autonomy.state_dir = dir.path().to_path_buf();
    config.spec.credits = CreditsConfig { daily_budget_units: Some(budget), ..CreditsConfig::default() };
    config
}

#[tokio::test]
async fn test_budget_boundary_on_disk() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 10);
    let store = create_state_store(&config).unwrap();
    let credits = CreditEnforcer::new(
        create_credit_store(&config, &store).unwrap(),
        create_audit_log(&config),
        config.spec.credits.clone(),
    );
    let now = Utc.with_ymd_and_hms(2026, 5, 10, 23, 59, 0).unwrap();

    for _ in 0..9 {
        assert!(credits.enforce(now, "thread-1", "digest", None).await.unwrap().is_none());
    }
    // 9 + 1 fits exactly
    assert!(credits.enforce(now, "thread-1", "digest", None).await.unwrap().is_none());
    assert_eq!(credits.status(now).await.unwrap().used_units_today, 10);

    // 10 + 1 does not, and nothing is charged
    let denied = credits.enforce(now, "thread-1", "digest", Some("ops")).await.unwrap().unwrap();
    assert_eq!(denied.code, CREDITS_DAILY_BUDGET_UNITS_EXCEEDED);
    assert_eq!(credits.status(now).await.unwrap().used_units_today, 10);

    let ledger = JsonlAuditLog::new(config.credits_ledger_dir());
    let lines = ledger.read_day("2026-05-10").unwrap();
    assert_eq!(lines.len(), 11);
    assert!(lines[..10].iter().all(|l| l.event_type == CreditEventType::CreditConsumed));
    assert_eq!(lines[10].event_type, CreditEventType::CreditDenied);
    assert_eq!(lines[10].code.as_deref(), Some(CREDITS_DAILY_BUDGET_UNITS_EXCEEDED));
    assert!(ledger.path_for("2026-05-10").ends_with("credits/credits-2026-05-10.jsonl"));

    // a new UTC day starts from zero
    let tomorrow = now + chrono::Duration::minutes(2);
    assert!(credits.enforce(tomorrow, "thread-1", "digest", None).await.unwrap().is_none());
    assert_eq!(credits.status(tomorrow).await.unwrap().used_units_today, 1);
}

#[tokio::test]
async fn test_two_enforcers_share_one_budget() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 6);
    let build = || {
        let store = create_state_store(&config).unwrap();
        Arc::new(CreditEnforcer::new(
            create_credit_store(&config, &store).unwrap(),
            create_audit_log(&config),
            config.spec.credits.clone(),
        ))
    };
    let (a, b) = (build(), build());
    let now = Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let enforcer = if i % 2 == 0 { a.clone() } else { b.clone() };
        handles.push(tokio::spawn(async move {
            enforcer.enforce(now, "thread-x", "digest", None).await.unwrap().is_none()
        }));
    }
    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 6);
    assert_eq!(a.status(now).await.unwrap().used_units_today, 6);
}
