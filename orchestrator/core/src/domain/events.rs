// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::run_log::{RunStatus, StepStatus};
use crate::domain::scheduler::{Decision, DecisionCode, SchedulerAction};

/// Plan execution lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: String,
        thread_id: String,
        plan_hash: String,
        dry_run: bool,
        started_at: DateTime<Utc>,
    },
    StepFinished {
        execution_id: String,
        step_id: String,
        status: StepStatus,
        http_status: Option<u16>,
        duration_ms: u64,
        replayed: bool,
        finished_at: DateTime<Utc>,
    },
    RunFinished {
        execution_id: String,
        status: RunStatus,
        receipt_hash: Option<String>,
        finished_at: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            ExecutionEvent::RunStarted { execution_id, .. }
            | ExecutionEvent::StepFinished { execution_id, .. }
            | ExecutionEvent::RunFinished { execution_id, .. } => execution_id,
        }
    }
}

/// Scheduler decisions and run bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchedulerEvent {
    DecisionMade {
        job_id: String,
        decision: Decision,
        primary_reason: DecisionCode,
        scheduler_action: SchedulerAction,
        window_id: String,
        evaluated_at: DateTime<Utc>,
    },
    RunClaimed {
        job_id: String,
        window_id: String,
        runs_today: u32,
        claimed_at: DateTime<Utc>,
    },
}

/// Admission gate outcomes that are not tied to a plan run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PolicyEvent {
    CreditsConsumed {
        thread_id: String,
        day_key_utc: String,
        used_units_today: u64,
        at: DateTime<Utc>,
    },
    CreditsDenied {
        thread_id: String,
        code: String,
        day_key_utc: String,
        used_units_today: u64,
        at: DateTime<Utc>,
    },
}
