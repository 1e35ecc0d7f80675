// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Run Logs & Receipts
//!
//! `StepRunLog` records one attempted (or skipped) step; `ExecutionRunLog` is
//! the full receipt of a plan run. The run log is append-only while the run is
//! `running` and frozen by [`ExecutionRunLog::seal`], which stamps
//! `finished_at` and computes `receipt_hash` exactly once over the log
//! serialized without its `receipt_hash` field.
//!
//! Receipts embed timestamps and are therefore run-specific; they are
//! self-consistent, not reproducible across retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::expectations::ExpectationReport;
use crate::domain::guard::GuardResult;
use crate::domain::hashing::{stable_hash_of, HashError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// How the idempotency ledger participated in a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyTrace {
    pub key: String,
    /// `true` when the result was served from the ledger without calling out.
    pub replayed: bool,
    /// `true` once a fresh result has been committed.
    pub committed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRunLog {
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    pub action: String,
    pub adapter: String,
    pub method: String,
    pub url: String,
    pub status: StepStatus,
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub response: Value,
    pub expectations: Option<ExpectationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<GuardResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency: Option<IdempotencyTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Denied,
    AwaitingApproval,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Denied => "denied",
            RunStatus::AwaitingApproval => "awaiting_approval",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDenied {
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequired {
    pub step_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRunLog {
    pub audit_contract_version: String,
    pub execution_id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    pub goal: String,
    pub dry_run: bool,
    pub plan_hash: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub steps: Vec<StepRunLog>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_denied: Option<PolicyDenied>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_required: Option<ApprovalRequired>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_secrets: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_hash: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("run log is not sealed (no receipt_hash)")]
    Unsealed,
    #[error("run log is still running")]
    NotTerminal,
    #[error("receipt hash mismatch: recorded {recorded}, computed {computed}")]
    Mismatch { recorded: String, computed: String },
    #[error(transparent)]
    Hash(#[from] HashError),
}

impl ExecutionRunLog {
    pub fn begin(
        execution_id: impl Into<String>,
        thread_id: impl Into<String>,
        goal: impl Into<String>,
        dry_run: bool,
        plan_hash: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            audit_contract_version: crate::domain::codes::AUDIT_CONTRACT_VERSION.to_string(),
            execution_id: execution_id.into(),
            thread_id: thread_id.into(),
            goal: goal.into(),
            dry_run,
            plan_hash: plan_hash.into(),
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            steps: Vec::new(),
            policy_denied: None,
            approval_required: None,
            failed_step: None,
            error: None,
            missing_secrets: Vec::new(),
            receipt_hash: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.receipt_hash.is_some()
    }

    /// Append a step. Ignored once the log is sealed.
    pub fn push_step(&mut self, step: StepRunLog) {
        if self.is_sealed() {
            return;
        }
        self.steps.push(step);
    }

    pub fn deny(&mut self, code: &str, reason: impl Into<String>) {
        self.status = RunStatus::Denied;
        self.policy_denied = Some(PolicyDenied { code: code.to_string(), reason: reason.into() });
    }

    pub fn fail(&mut self, error: impl Into<String>, failed_step: Option<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.failed_step = failed_step;
    }

    pub fn await_approval(&mut self, step_id: impl Into<String>, reason: impl Into<String>) {
        self.status = RunStatus::AwaitingApproval;
        self.approval_required = Some(ApprovalRequired { step_id: step_id.into(), reason: reason.into() });
    }

    /// Hash of the log with `receipt_hash` absent.
    pub fn compute_receipt_hash(&self) -> Result<String, HashError> {
        let mut unsealed = self.clone();
        unsealed.receipt_hash = None;
        stable_hash_of(&unsealed)
    }

    /// Freeze the log. A `running` log is closed as `success`.
    pub fn seal(&mut self, finished_at: DateTime<Utc>) -> Result<&str, HashError> {
        if self.receipt_hash.is_none() {
            if self.status == RunStatus::Running {
                self.status = RunStatus::Success;
            }
            self.finished_at = Some(finished_at);
            self.receipt_hash = Some(self.compute_receipt_hash()?);
        }
        Ok(self.receipt_hash.as_deref().unwrap_or_default())
    }

    /// Recompute the receipt hash and compare it with the recorded one.
    pub fn verify_receipt(&self) -> Result<(), ReceiptError> {
        let recorded = self.receipt_hash.as_ref().ok_or(ReceiptError::Unsealed)?;
        if !self.status.is_terminal() {
            return Err(ReceiptError::NotTerminal);
        }
        let computed = self.compute_receipt_hash()?;
        if &computed != recorded {
            return Err(ReceiptError::Mismatch { recorded: recorded.clone(), computed });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600 + secs, 0).unwrap()
    }

    fn step(id: &str) -> StepRunLog {
        StepRunLog {
            step_id: id.into(),
            phase_id: None,
            action: "http.request".into(),
            adapter: "WebhookAdapter".into(),
            method: "GET".into(),
            url: "https://example.test".into(),
            status: StepStatus::Success,
            http_status: Some(200),
            duration_ms: 3,
            started_at: at(1),
            response: json!({"ok": true}),
            expectations: None,
            guard: None,
            idempotency: None,
            error: None,
        }
    }

    #[test]
    fn test_seal_computes_hash_once() {
        let mut log = ExecutionRunLog::begin("e", "t", "g", false, "ph", at(0));
        log.push_step(step("a"));
        let first = log.seal(at(5)).unwrap().to_string();
        assert_eq!(log.status, RunStatus::Success);
        assert_eq!(first.len(), 64);

        // Second seal and late appends are no-ops.
        let second = log.seal(at(9)).unwrap().to_string();
        log.push_step(step("b"));
        assert_eq!(first, second);
        assert_eq!(log.steps.len(), 1);
        assert_eq!(log.finished_at, Some(at(5)));
        assert!(log.verify_receipt().is_ok());
    }

    #[test]
    fn test_tampering_is_detected() {
        let mut log = ExecutionRunLog::begin("e", "t", "g", false, "ph", at(0));
        log.push_step(step("a"));
        log.seal(at(5)).unwrap();

        let mut tampered = log.clone();
        tampered.steps[0].http_status = Some(500);
        assert!(matches!(tampered.verify_receipt(), Err(ReceiptError::Mismatch { .. })));

        let unsealed = ExecutionRunLog::begin("e", "t", "g", false, "ph", at(0));
        assert!(matches!(unsealed.verify_receipt(), Err(ReceiptError::Unsealed)));
    }

    #[test]
    fn test_receipt_survives_json_roundtrip() {
        let mut log = ExecutionRunLog::begin("e", "t", "g", true, "ph", at(0));
        log.deny(crate::domain::codes::POLICY_MAX_RUNTIME_MS, "over budget");
        log.seal(at(1)).unwrap();
        let text = serde_json::to_string(&log).unwrap();
        assert!(text.contains("\"threadId\":\"t\""));
        let back: ExecutionRunLog = serde_json::from_str(&text).unwrap();
        assert!(back.verify_receipt().is_ok());
        assert_eq!(back.status, RunStatus::Denied);
    }
}
