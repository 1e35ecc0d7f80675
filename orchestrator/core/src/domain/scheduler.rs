// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Scheduler Decision Domain
//!
//! Pure side of the Scheduler Decision Engine. Given already-loaded facts
//! about a job ([`DecisionInputs`]), [`assemble_trace`] collects one
//! [`DecisionReason`] per unsatisfied gate and resolves the primary reason
//! through the fixed total order on [`DecisionCode`]:
//!
//! ```text
//! MANUALLY_PAUSED > DEDUP_ACTIVE > BUDGET_EXCEEDED > OUTSIDE_SCHEDULE >
//! PRESTATE_STALE > APPROVAL_REQUIRED > AUTONOMY_POLICY_DENY > LAST_RUN_FAILED > ELIGIBLE
//! ```
//!
//! The order is the derived `Ord` of the enum (declaration order), so the
//! primary reason is `reasons.iter().min()` and is independent of the order
//! in which gates were evaluated. `ELIGIBLE` is an explicit terminal code,
//! never a fallthrough.
//!
//! Storage access (dedup markers, run counters, last outcomes) lives in
//! `application::scheduler`.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::codes::PRESTATE_STALE;
use crate::domain::schedule::{Schedule, ScheduleCheck, ScheduleError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    /// Plans are executed as dry runs only.
    Observe,
    /// Approval-gated steps wait for a human.
    #[default]
    Supervised,
    Autonomous,
}

impl AutonomyMode {
    pub fn approval_required(&self) -> bool {
        matches!(self, AutonomyMode::Supervised)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBudgets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runs_per_day: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub job_id: String,
    pub schedule: Schedule,
    /// Command handed to plan generation when the job runs.
    pub command: String,
    #[serde(default)]
    pub mode: AutonomyMode,
    #[serde(default)]
    pub budgets: JobBudgets,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job_id `{0}` must be non-empty and use only [A-Za-z0-9._-]")]
    InvalidJobId(String),
    #[error("duplicate job_id `{0}`")]
    DuplicateJobId(String),
    #[error("job `{job_id}`: {source}")]
    InvalidSchedule {
        job_id: String,
        #[source]
        source: ScheduleError,
    },
    #[error("job `{0}`: command must not be empty")]
    EmptyCommand(String),
}

impl JobDefinition {
    pub fn validate(&self) -> Result<(), JobError> {
        let id_ok = !self.job_id.is_empty()
            && self.job_id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            && self.job_id != "."
            && self.job_id != "..";
        if !id_ok {
            return Err(JobError::InvalidJobId(self.job_id.clone()));
        }
        if self.command.trim().is_empty() {
            return Err(JobError::EmptyCommand(self.job_id.clone()));
        }
        self.schedule
            .validate()
            .map_err(|source| JobError::InvalidSchedule { job_id: self.job_id.clone(), source })
    }
}

/// Set of jobs keyed by unique `job_id`.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Vec<JobDefinition>,
    index: HashMap<String, usize>,
}

impl JobRegistry {
    pub fn from_jobs(jobs: Vec<JobDefinition>) -> Result<Self, JobError> {
        let mut index = HashMap::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            job.validate()?;
            if index.insert(job.job_id.clone(), i).is_some() {
                return Err(JobError::DuplicateJobId(job.job_id.clone()));
            }
        }
        Ok(Self { jobs, index })
    }

    pub fn get(&self, job_id: &str) -> Option<&JobDefinition> {
        self.index.get(job_id).map(|&i| &self.jobs[i])
    }

    pub fn jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Closed set of decision codes. Declaration order is precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionCode {
    ManuallyPaused,
    DedupActive,
    BudgetExceeded,
    OutsideSchedule,
    PrestateStale,
    ApprovalRequired,
    AutonomyPolicyDeny,
    LastRunFailed,
    Eligible,
}

impl DecisionCode {
    pub const PRECEDENCE: [DecisionCode; 9] = [
        DecisionCode::ManuallyPaused,
        DecisionCode::DedupActive,
        DecisionCode::BudgetExceeded,
        DecisionCode::OutsideSchedule,
        DecisionCode::PrestateStale,
        DecisionCode::ApprovalRequired,
        DecisionCode::AutonomyPolicyDeny,
        DecisionCode::LastRunFailed,
        DecisionCode::Eligible,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionCode::ManuallyPaused => "MANUALLY_PAUSED",
            DecisionCode::DedupActive => "DEDUP_ACTIVE",
            DecisionCode::BudgetExceeded => "BUDGET_EXCEEDED",
            DecisionCode::OutsideSchedule => "OUTSIDE_SCHEDULE",
            DecisionCode::PrestateStale => "PRESTATE_STALE",
            DecisionCode::ApprovalRequired => "APPROVAL_REQUIRED",
            DecisionCode::AutonomyPolicyDeny => "AUTONOMY_POLICY_DENY",
            DecisionCode::LastRunFailed => "LAST_RUN_FAILED",
            DecisionCode::Eligible => "ELIGIBLE",
        }
    }

    /// Gates that stop the job outright. The remaining blocking codes still
    /// forward the job so approval/policy state can be re-surfaced.
    pub fn action(&self) -> SchedulerAction {
        match self {
            DecisionCode::ManuallyPaused
            | DecisionCode::DedupActive
            | DecisionCode::BudgetExceeded
            | DecisionCode::OutsideSchedule => SchedulerAction::Skip,
            _ => SchedulerAction::RunThroughEngine,
        }
    }

    /// Primary reason among `codes`; `Eligible` when empty.
    pub fn primary<'a>(codes: impl IntoIterator<Item = &'a DecisionCode>) -> DecisionCode {
        codes.into_iter().copied().min().unwrap_or(DecisionCode::Eligible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Eligible,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerAction {
    Skip,
    RunThroughEngine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionReason {
    pub code: DecisionCode,
    pub detail: String,
    pub to_unblock: String,
}

/// Last recorded outcome of a job, written after each engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOutcome {
    pub execution_id: String,
    /// Run status of the last execution (`success`, `failed`, `denied`, `awaiting_approval`).
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_code: Option<String>,
    #[serde(default)]
    pub prestate_stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_hash: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    pub day: String,
    pub runs_today: u32,
    pub max_runs_per_day: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyContext {
    pub autonomy_mode: AutonomyMode,
    pub approval_required: bool,
    pub budget_state: BudgetState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerDecisionTrace {
    pub job_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub manual_trigger: bool,
    pub would_run: bool,
    pub decision: Decision,
    pub primary_reason: DecisionCode,
    pub reasons: Vec<DecisionReason>,
    pub window_id: String,
    pub scheduler_action: SchedulerAction,
    pub policy_context: PolicyContext,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub to_unblock: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Facts gathered for one evaluation.
#[derive(Debug, Clone)]
pub struct DecisionInputs {
    pub at: DateTime<Utc>,
    pub manual_trigger: bool,
    pub window_id: String,
    pub schedule: Result<ScheduleCheck, ScheduleError>,
    pub dedup_active: bool,
    pub runs_today: u32,
    pub last_outcome: Option<LastOutcome>,
    pub warnings: Vec<String>,
}

pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

pub fn next_utc_midnight(at: DateTime<Utc>) -> DateTime<Utc> {
    (at.date_naive() + Duration::days(1)).and_time(NaiveTime::MIN).and_utc()
}

fn reason(code: DecisionCode, detail: impl Into<String>, to_unblock: impl Into<String>) -> DecisionReason {
    DecisionReason { code, detail: detail.into(), to_unblock: to_unblock.into() }
}

/// Signals derived from the last recorded outcome.
fn lookback_reasons(last: &LastOutcome) -> Vec<DecisionReason> {
    let mut reasons = Vec::new();
    if last.prestate_stale || last.policy_code.as_deref() == Some(PRESTATE_STALE) {
        reasons.push(reason(
            DecisionCode::PrestateStale,
            format!("last run {} reported stale pre-state", last.execution_id),
            "refresh the job's source state before the next run",
        ));
    }
    match last.status.as_str() {
        "awaiting_approval" => reasons.push(reason(
            DecisionCode::ApprovalRequired,
            format!("last run {} is awaiting approval", last.execution_id),
            "approve or reject the pending step",
        )),
        "denied" => reasons.push(reason(
            DecisionCode::AutonomyPolicyDeny,
            format!(
                "last run {} was denied by policy {}",
                last.execution_id,
                last.policy_code.as_deref().unwrap_or("unknown")
            ),
            "adjust the policy ceiling or the plan",
        )),
        "failed" => reasons.push(reason(
            DecisionCode::LastRunFailed,
            format!("last run {} failed", last.execution_id),
            "inspect the receipt and fix the failing step",
        )),
        _ => {}
    }
    reasons
}

/// Evaluate every gate and build the trace.
pub fn assemble_trace(job: &JobDefinition, inputs: DecisionInputs) -> SchedulerDecisionTrace {
    let DecisionInputs { at, manual_trigger, window_id, schedule, dedup_active, runs_today, last_outcome, mut warnings } =
        inputs;
    let mut reasons = Vec::new();

    if job.paused {
        reasons.push(reason(DecisionCode::ManuallyPaused, "job is paused in the registry", "unpause the job"));
    }

    let next_occurrence = match &schedule {
        Ok(check) => check.next_occurrence,
        Err(_) => None,
    };
    if !manual_trigger {
        match &schedule {
            Ok(check) if check.due => {}
            Ok(_) => reasons.push(reason(
                DecisionCode::OutsideSchedule,
                format!("schedule is not due at {}", at.to_rfc3339()),
                "wait for the next scheduled occurrence or trigger manually",
            )),
            Err(e) => {
                warnings.push(format!("schedule could not be evaluated: {e}"));
                reasons.push(reason(
                    DecisionCode::OutsideSchedule,
                    format!("invalid schedule: {e}"),
                    "fix the job's schedule definition",
                ));
            }
        }
    }

    if dedup_active {
        reasons.push(reason(
            DecisionCode::DedupActive,
            format!("window {window_id} already executed"),
            "wait for the next window",
        ));
    }

    let max_runs = job.budgets.max_runs_per_day;
    if let Some(max) = max_runs {
        if runs_today.saturating_add(1) > max {
            reasons.push(reason(
                DecisionCode::BudgetExceeded,
                format!("{runs_today} of {max} runs used today"),
                "wait for the next UTC day or raise max_runs_per_day",
            ));
        }
    }

    if let Some(last) = &last_outcome {
        reasons.extend(lookback_reasons(last));
    }

    let primary_reason = DecisionCode::primary(reasons.iter().map(|r| &r.code));
    let decision = if reasons.is_empty() { Decision::Eligible } else { Decision::Blocked };
    let next_eligible_at = match primary_reason {
        DecisionCode::OutsideSchedule | DecisionCode::DedupActive => next_occurrence,
        DecisionCode::BudgetExceeded => Some(next_utc_midnight(at)),
        _ => None,
    };
    let to_unblock = reasons.iter().map(|r| r.to_unblock.clone()).collect();

    SchedulerDecisionTrace {
        job_id: job.job_id.clone(),
        evaluated_at: at,
        manual_trigger,
        would_run: decision == Decision::Eligible,
        decision,
        primary_reason,
        reasons,
        window_id,
        scheduler_action: primary_reason.action(),
        policy_context: PolicyContext {
            autonomy_mode: job.mode,
            approval_required: job.mode.approval_required(),
            budget_state: BudgetState { day: day_key(at), runs_today, max_runs_per_day: max_runs },
        },
        next_eligible_at,
        to_unblock,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()
    }

    fn job() -> JobDefinition {
        JobDefinition {
            job_id: "daily-sync".into(),
            schedule: Schedule::Cron { cron: "0 10 * * *".into(), timezone: "UTC".into(), enabled: true },
            command: "sync invoices".into(),
            mode: AutonomyMode::Autonomous,
            budgets: JobBudgets { max_runs_per_day: Some(2) },
            paused: false,
            description: None,
        }
    }

    fn inputs(due: bool) -> DecisionInputs {
        DecisionInputs {
            at: at(),
            manual_trigger: false,
            window_id: "daily-sync@1767607200#abcd1234".into(),
            schedule: Ok(ScheduleCheck { due, next_occurrence: Some(at() + Duration::days(1)) }),
            dedup_active: false,
            runs_today: 0,
            last_outcome: None,
            warnings: vec![],
        }
    }

    fn outcome(status: &str) -> LastOutcome {
        LastOutcome {
            execution_id: "exec-0".into(),
            status: status.into(),
            policy_code: None,
            prestate_stale: false,
            window_id: None,
            receipt_hash: None,
            recorded_at: at() - Duration::hours(1),
        }
    }

    #[test]
    fn test_precedence_is_total_and_ordered() {
        let mut sorted = DecisionCode::PRECEDENCE;
        sorted.sort();
        assert_eq!(sorted, DecisionCode::PRECEDENCE);
        assert_eq!(DecisionCode::primary(&[]), DecisionCode::Eligible);
        assert_eq!(
            DecisionCode::primary(&[DecisionCode::LastRunFailed, DecisionCode::DedupActive, DecisionCode::ManuallyPaused]),
            DecisionCode::ManuallyPaused
        );
    }

    #[test]
    fn test_eligible_when_no_gate_fires() {
        let trace = assemble_trace(&job(), inputs(true));
        assert_eq!(trace.decision, Decision::Eligible);
        assert_eq!(trace.primary_reason, DecisionCode::Eligible);
        assert!(trace.would_run);
        assert_eq!(trace.scheduler_action, SchedulerAction::RunThroughEngine);
        assert!(trace.next_eligible_at.is_none());
    }

    #[test]
    fn test_paused_beats_dedup() {
        let mut j = job();
        j.paused = true;
        let mut i = inputs(true);
        i.dedup_active = true;
        let trace = assemble_trace(&j, i);
        assert_eq!(trace.primary_reason, DecisionCode::ManuallyPaused);
        assert_eq!(trace.reasons.len(), 2);
        assert_eq!(trace.scheduler_action, SchedulerAction::Skip);
        assert!(trace.next_eligible_at.is_none());
    }

    #[test]
    fn test_outside_schedule_and_manual_trigger() {
        let trace = assemble_trace(&job(), inputs(false));
        assert_eq!(trace.primary_reason, DecisionCode::OutsideSchedule);
        assert_eq!(trace.next_eligible_at, Some(at() + Duration::days(1)));

        let mut manual = inputs(false);
        manual.manual_trigger = true;
        assert_eq!(assemble_trace(&job(), manual).decision, Decision::Eligible);
    }

    #[test]
    fn test_budget_boundary_and_next_midnight() {
        let mut i = inputs(true);
        i.runs_today = 1;
        assert_eq!(assemble_trace(&job(), i).decision, Decision::Eligible);

        let mut i = inputs(true);
        i.runs_today = 2;
        let trace = assemble_trace(&job(), i);
        assert_eq!(trace.primary_reason, DecisionCode::BudgetExceeded);
        assert_eq!(trace.next_eligible_at, Some(Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap()));
        assert_eq!(trace.policy_context.budget_state.runs_today, 2);
    }

    #[test]
    fn test_lookback_signals_forward_to_engine() {
        for (status, code) in [
            ("awaiting_approval", DecisionCode::ApprovalRequired),
            ("denied", DecisionCode::AutonomyPolicyDeny),
            ("failed", DecisionCode::LastRunFailed),
        ] {
            let mut i = inputs(true);
            i.last_outcome = Some(outcome(status));
            let trace = assemble_trace(&job(), i);
            assert_eq!(trace.primary_reason, code);
            assert_eq!(trace.decision, Decision::Blocked);
            assert!(!trace.would_run);
            assert_eq!(trace.scheduler_action, SchedulerAction::RunThroughEngine);
        }

        let mut stale = outcome("failed");
        stale.policy_code = Some(PRESTATE_STALE.into());
        let mut i = inputs(true);
        i.last_outcome = Some(stale);
        let trace = assemble_trace(&job(), i);
        assert_eq!(trace.primary_reason, DecisionCode::PrestateStale);
        assert_eq!(trace.to_unblock.len(), 2);
    }

    #[test]
    fn test_invalid_schedule_is_a_warning_not_a_panic() {
        let mut i = inputs(true);
        i.schedule = Err(ScheduleError::ZeroInterval);
        let trace = assemble_trace(&job(), i);
        assert_eq!(trace.primary_reason, DecisionCode::OutsideSchedule);
        assert_eq!(trace.warnings.len(), 1);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        assert_eq!(
            JobRegistry::from_jobs(vec![job(), job()]).unwrap_err(),
            JobError::DuplicateJobId("daily-sync".into())
        );
        let mut bad = job();
        bad.job_id = "../x".into();
        assert!(matches!(JobRegistry::from_jobs(vec![bad]), Err(JobError::InvalidJobId(_))));
        let registry = JobRegistry::from_jobs(vec![job()]).unwrap();
        assert!(registry.get("daily-sync").is_some());
        assert_eq!(registry.len(), 1);
    }
}
