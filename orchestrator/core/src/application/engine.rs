// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Engine
//!
//! Wires the stores, ledgers and executors built from an
//! [`EngineConfigManifest`] into one handle. A scheduled job goes through
//! every gate in this order:
//!
//! 1. [`SchedulerDecisionEngine::decide`], stopping on `SKIP`
//! 2. [`SchedulerDecisionEngine::begin_run`] claims the window
//! 3. [`CreditEnforcer::enforce`], a denial seals a `denied` receipt
//! 4. [`PlanExecutor::execute`] under the job's autonomy mode
//! 5. the receipt is saved and the outcome recorded for the lookback gates
//!
//! A credit denial is not recorded as the job's last outcome: the lookback
//! gates only see runs the executor actually attempted. The window claimed in
//! step 2 stays consumed, so a denied window is not retried.

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::credits::CreditEnforcer;
use crate::application::plan_executor::{PlanExecutor, RunOptions};
use crate::application::repository_factory::{create_audit_log, create_credit_store, create_state_store};
use crate::application::scheduler::{RunTicket, SchedulerDecisionEngine};
use crate::application::step_executor::StepDispatcher;
use crate::domain::credits::{AuditLog, CreditDenied};
use crate::domain::engine_config::EngineConfigManifest;
use crate::domain::idempotency::IdempotencyLedger;
use crate::domain::plan::ExecutionPlan;
use crate::domain::repository::SharedStateStore;
use crate::domain::run_log::ExecutionRunLog;
use crate::domain::scheduler::{AutonomyMode, JobDefinition, SchedulerAction, SchedulerDecisionTrace};
use crate::domain::secrets::SecretResolver;
use crate::domain::transport::HttpTransport;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::receipts::{ReceiptStore, ReceiptStoreError};

/// A finished plan run and where its receipt went.
#[derive(Debug, Clone)]
pub struct PlanRun {
    pub log: ExecutionRunLog,
    /// `None` when a receipt for this execution id already existed.
    pub receipt_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct JobRun {
    pub trace: SchedulerDecisionTrace,
    pub ticket: Option<RunTicket>,
    pub credits_denied: Option<CreditDenied>,
    pub run: Option<PlanRun>,
}

pub struct Engine {
    config: EngineConfigManifest,
    event_bus: EventBus,
    executor: PlanExecutor,
    scheduler: SchedulerDecisionEngine,
    credits: CreditEnforcer,
    receipts: ReceiptStore,
}

impl Engine {
    /// Build every component from the configuration.
    pub fn from_config(
        config: EngineConfigManifest,
        transport: Arc<dyn HttpTransport>,
        secrets: Arc<dyn SecretResolver>,
    ) -> anyhow::Result<Self> {
        let store = create_state_store(&config).context("Failed to open state store")?;
        let credit_store = create_credit_store(&config, &store).context("Failed to open credit store")?;
        let audit = create_audit_log(&config);
        Ok(Self::with_components(config, store, credit_store, audit, transport, secrets))
    }

    pub fn with_components(
        config: EngineConfigManifest,
        store: SharedStateStore,
        credit_store: SharedStateStore,
        audit: Arc<dyn AuditLog>,
        transport: Arc<dyn HttpTransport>,
        secrets: Arc<dyn SecretResolver>,
    ) -> Self {
        let event_bus = EventBus::with_default_capacity();
        let spec = &config.spec;

        let ledger = IdempotencyLedger::new(store.clone())
            .with_corrupt_policy(spec.idempotency.on_corrupt)
            .with_stale_claim_after(chrono::Duration::milliseconds(spec.idempotency.stale_claim_after_ms as i64));
        let dispatcher =
            StepDispatcher::new(transport, secrets.clone(), Arc::new(ledger)).with_notion_config(spec.notion.clone());
        let executor = PlanExecutor::new(Arc::new(dispatcher), secrets, spec.executor.clone())
            .with_event_bus(event_bus.clone());
        let scheduler = SchedulerDecisionEngine::new(store).with_event_bus(event_bus.clone());
        let credits =
            CreditEnforcer::new(credit_store, audit, spec.credits.clone()).with_event_bus(event_bus.clone());
        let receipts = ReceiptStore::new(config.receipts_dir());

        Self { config, event_bus, executor, scheduler, credits, receipts }
    }

    pub fn config(&self) -> &EngineConfigManifest {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn scheduler(&self) -> &SchedulerDecisionEngine {
        &self.scheduler
    }

    pub fn credits(&self) -> &CreditEnforcer {
        &self.credits
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.receipts
    }

    /// Execute a plan and persist its receipt.
    pub async fn run_plan(&self, plan: &ExecutionPlan, options: &RunOptions) -> anyhow::Result<PlanRun> {
        let log = self.executor.execute(plan, options).await;
        let receipt_path = self.save_receipt(&log)?;
        Ok(PlanRun { log, receipt_path })
    }

    fn save_receipt(&self, log: &ExecutionRunLog) -> anyhow::Result<Option<PathBuf>> {
        match self.receipts.save(log) {
            Ok(path) => Ok(Some(path)),
            Err(ReceiptStoreError::AlreadyExists(id)) => {
                warn!(execution_id = %id, "Receipt already exists, keeping the first one");
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to save receipt"),
        }
    }

    /// Run a scheduled job's plan through every gate.
    pub async fn run_job(
        &self,
        job: &JobDefinition,
        plan: &ExecutionPlan,
        at: DateTime<Utc>,
        manual_trigger: bool,
        approved: RunOptions,
    ) -> anyhow::Result<JobRun> {
        let trace = self.scheduler.decide(job, at, manual_trigger).await;
        if trace.scheduler_action == SchedulerAction::Skip {
            return Ok(JobRun { trace, ticket: None, credits_denied: None, run: None });
        }

        let ticket = self.scheduler.begin_run(job, &trace).await?;
        let credits_denied = self
            .credits
            .enforce(at, &plan.thread_id, &job.command, None)
            .await
            .context("Credit ledger unavailable")?;

        let run = match &credits_denied {
            Some(denied) => {
                let mut log = ExecutionRunLog::begin(
                    &plan.execution_id,
                    &plan.thread_id,
                    &plan.goal,
                    plan.dry_run,
                    plan.plan_hash(),
                    Utc::now(),
                );
                log.deny(&denied.code, denied.reason.clone());
                log.seal(Utc::now()).context("Failed to seal receipt")?;
                let receipt_path = self.save_receipt(&log)?;
                PlanRun { log, receipt_path }
            }
            None => {
                let mut plan = plan.clone();
                let mut options = approved;
                match job.mode {
                    AutonomyMode::Observe => plan.set_dry_run(true),
                    AutonomyMode::Autonomous => options.auto_approve = true,
                    AutonomyMode::Supervised => {}
                }
                self.run_plan(&plan, &options).await?
            }
        };

        if credits_denied.is_none() {
            self.scheduler.record_outcome(&ticket, &run.log).await?;
        }
        info!(job_id = %job.job_id, status = run.log.status.as_str(), "Job run finished");
        Ok(JobRun { trace, ticket: Some(ticket), credits_denied, run: Some(run) })
    }
}
