// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Scheduler Decision Engine
//!
//! Loads the durable facts a decision depends on and hands them to
//! [`assemble_trace`]. Reading never fails the decision: an unreadable or
//! corrupt record is treated as absent and reported in `warnings[]`.
//!
//! ## State keys
//!
//! | Key | Value |
//! |-----|-------|
//! | `scheduler/dedup/<job_id>/<window_id>` | [`DedupMarker`], created once per window |
//! | `scheduler/runs/<YYYY-MM-DD>/<job_id>` | run counter for the UTC day |
//! | `scheduler/last_outcome/<job_id>` | [`LastOutcome`] of the latest engine run |
//!
//! A run is started with [`SchedulerDecisionEngine::begin_run`], which claims
//! the window (create-if-absent) and bumps the day counter, and closed with
//! [`SchedulerDecisionEngine::record_outcome`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::codes::PRESTATE_STALE;
use crate::domain::events::SchedulerEvent;
use crate::domain::repository::{
    cas_update, decode_json, encode_json, CasOutcome, SharedStateStore, StoreError, Update,
};
use crate::domain::run_log::ExecutionRunLog;
use crate::domain::scheduler::{
    assemble_trace, day_key, DecisionInputs, JobDefinition, JobRegistry, LastOutcome, SchedulerAction,
    SchedulerDecisionTrace,
};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupMarker {
    pub window_id: String,
    pub claimed_at: DateTime<Utc>,
}

/// Handle for a run admitted by [`SchedulerDecisionEngine::begin_run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTicket {
    pub job_id: String,
    pub window_id: String,
    pub day: String,
    pub runs_today: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum BeginRunError {
    #[error("job {job_id} is not runnable: {reason}")]
    NotRunnable { job_id: String, reason: String },

    #[error("window {window_id} of job {job_id} was already claimed")]
    WindowTaken { job_id: String, window_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn dedup_key(job_id: &str, window_id: &str) -> String {
    format!("scheduler/dedup/{job_id}/{window_id}")
}

fn runs_key(day: &str, job_id: &str) -> String {
    format!("scheduler/runs/{day}/{job_id}")
}

fn last_outcome_key(job_id: &str) -> String {
    format!("scheduler/last_outcome/{job_id}")
}

pub struct SchedulerDecisionEngine {
    store: SharedStateStore,
    event_bus: Option<EventBus>,
}

impl SchedulerDecisionEngine {
    pub fn new(store: SharedStateStore) -> Self {
        Self { store, event_bus: None }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Read a JSON record, downgrading any failure to a warning.
    async fn read_or_warn<T: DeserializeOwned>(&self, key: &str, warnings: &mut Vec<String>) -> Option<T> {
        let read = match self.store.get(key).await {
            Ok(Some(bytes)) => decode_json::<T>(key, &bytes).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        read.unwrap_or_else(|e| {
            warn!(key, error = %e, "Scheduler state unreadable, treating as absent");
            warnings.push(format!("{key}: {e}"));
            None
        })
    }

    pub async fn decide(&self, job: &JobDefinition, at: DateTime<Utc>, manual_trigger: bool) -> SchedulerDecisionTrace {
        let mut warnings = Vec::new();
        let window = job.schedule.window(&job.job_id, at);

        let dedup_active = self
            .read_or_warn::<DedupMarker>(&dedup_key(&job.job_id, &window.window_id), &mut warnings)
            .await
            .is_some();
        let runs_today = self
            .read_or_warn::<u32>(&runs_key(&day_key(at), &job.job_id), &mut warnings)
            .await
            .unwrap_or(0);
        let last_outcome = self
            .read_or_warn::<LastOutcome>(&last_outcome_key(&job.job_id), &mut warnings)
            .await;

        let trace = assemble_trace(
            job,
            DecisionInputs {
                at,
                manual_trigger,
                window_id: window.window_id,
                schedule: job.schedule.check(at),
                dedup_active,
                runs_today,
                last_outcome,
                warnings,
            },
        );

        info!(
            job_id = %trace.job_id,
            primary_reason = trace.primary_reason.as_str(),
            would_run = trace.would_run,
            "Scheduler decision"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish_scheduler_event(SchedulerEvent::DecisionMade {
                job_id: trace.job_id.clone(),
                decision: trace.decision,
                primary_reason: trace.primary_reason,
                scheduler_action: trace.scheduler_action,
                window_id: trace.window_id.clone(),
                evaluated_at: trace.evaluated_at,
            });
        }
        trace
    }

    /// Decide every job in the registry at `at`.
    pub async fn tick(&self, registry: &JobRegistry, at: DateTime<Utc>) -> Vec<SchedulerDecisionTrace> {
        let mut traces = Vec::with_capacity(registry.len());
        for job in registry.jobs() {
            traces.push(self.decide(job, at, false).await);
        }
        traces
    }

    /// Claim the trace's window and count the run against today's budget.
    ///
    /// The window claim is a create-if-absent swap, so of two schedulers
    /// racing on one window exactly one gets a ticket.
    pub async fn begin_run(
        &self,
        job: &JobDefinition,
        trace: &SchedulerDecisionTrace,
    ) -> Result<RunTicket, BeginRunError> {
        if trace.scheduler_action != SchedulerAction::RunThroughEngine {
            return Err(BeginRunError::NotRunnable {
                job_id: job.job_id.clone(),
                reason: trace.primary_reason.as_str().to_string(),
            });
        }

        let key = dedup_key(&job.job_id, &trace.window_id);
        let marker = DedupMarker { window_id: trace.window_id.clone(), claimed_at: Utc::now() };
        match self.store.compare_and_swap(&key, None, Some(encode_json(&key, &marker)?)).await? {
            CasOutcome::Swapped => {}
            CasOutcome::Conflict { .. } => {
                return Err(BeginRunError::WindowTaken {
                    job_id: job.job_id.clone(),
                    window_id: trace.window_id.clone(),
                })
            }
        }

        let day = day_key(trace.evaluated_at);
        let runs_today = cas_update::<u32, u32, _>(self.store.as_ref(), &runs_key(&day, &job.job_id), |current| {
            let next = current.unwrap_or_else(|e| {
                warn!(error = %e, "Corrupt run counter reset");
                None
            });
            let next = next.unwrap_or(0).saturating_add(1);
            Ok(Update::Write(next, next))
        })
        .await?;

        debug!(job_id = %job.job_id, window_id = %trace.window_id, runs_today, "Run claimed");
        if let Some(bus) = &self.event_bus {
            bus.publish_scheduler_event(SchedulerEvent::RunClaimed {
                job_id: job.job_id.clone(),
                window_id: trace.window_id.clone(),
                runs_today,
                claimed_at: marker.claimed_at,
            });
        }
        Ok(RunTicket { job_id: job.job_id.clone(), window_id: trace.window_id.clone(), day, runs_today })
    }

    /// Store the outcome of a finished run for the lookback gates.
    pub async fn record_outcome(&self, ticket: &RunTicket, log: &ExecutionRunLog) -> Result<LastOutcome, StoreError> {
        let policy_code = log.policy_denied.as_ref().map(|d| d.code.clone());
        let outcome = LastOutcome {
            execution_id: log.execution_id.clone(),
            status: log.status.as_str().to_string(),
            prestate_stale: policy_code.as_deref() == Some(PRESTATE_STALE),
            policy_code,
            window_id: Some(ticket.window_id.clone()),
            receipt_hash: log.receipt_hash.clone(),
            recorded_at: Utc::now(),
        };
        let key = last_outcome_key(&ticket.job_id);
        self.store.put(&key, encode_json(&key, &outcome)?).await?;
        info!(job_id = %ticket.job_id, status = %outcome.status, "Job outcome recorded");
        Ok(outcome)
    }
}
