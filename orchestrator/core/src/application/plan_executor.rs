// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Plan Executor
//!
//! Walks an [`ExecutionPlan`] step by step and returns a sealed
//! [`ExecutionRunLog`]. It never returns an error: every failure is recorded
//! in the log.
//!
//! ```text
//!            ┌──────────── invalid plan / missing secrets / step failed ──▶ failed
//! running ───┼──────────── runtime ceiling exceeded / stale prestate ─────▶ denied
//!            ├──────────── unapproved gated step ─────────────────────────▶ awaiting_approval
//!            └──────────── all steps done ────────────────────────────────▶ success
//! ```
//!
//! Before the first step of a live run, required secrets are checked and the
//! plan's prestate snapshot, if declared, is read back and compared.
//!
//! Per step, in order: runtime ceiling, dry run, approval gate, execute,
//! expectations, guard. The first failed step stops the run. The ceiling is
//! checked between steps only; a running step is bounded by its own timeout.

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::application::step_executor::{StepContext, StepExecution, StepExecutor};
use crate::domain::codes::{
    GUARD_BLOCKED, GUARD_SPEC_INVALID, MISSING_JSON_PATHS, MISSING_REQUIRED_SECRETS, PLAN_INVALID,
    POLICY_MAX_RUNTIME_MS, PRESTATE_STALE, PRESTATE_UNAVAILABLE, UNEXPECTED_HTTP_STATUS,
};
use crate::domain::engine_config::ExecutorConfig;
use crate::domain::events::ExecutionEvent;
use crate::domain::expectations::{self, ExpectationReport};
use crate::domain::guard::{self, GuardResult, GuardSpec};
use crate::domain::plan::{ExecutionPlan, PlannedStep, PrestateCheck};
use crate::domain::run_log::{ExecutionRunLog, RunStatus, StepRunLog, StepStatus};
use crate::domain::secrets::{missing_secrets, SecretResolver};
use crate::infrastructure::event_bus::EventBus;

/// Per-run options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Step ids a human has approved for this run.
    pub approved_steps: BTreeSet<String>,
    /// Treat every approval-gated step as approved (autonomous mode).
    pub auto_approve: bool,
}

impl RunOptions {
    fn is_approved(&self, step_id: &str) -> bool {
        self.auto_approve || self.approved_steps.contains(step_id)
    }
}

pub struct PlanExecutor {
    steps: Arc<dyn StepExecutor>,
    secrets: Arc<dyn SecretResolver>,
    config: ExecutorConfig,
    event_bus: Option<EventBus>,
}

impl PlanExecutor {
    pub fn new(steps: Arc<dyn StepExecutor>, secrets: Arc<dyn SecretResolver>, config: ExecutorConfig) -> Self {
        Self { steps, secrets, config, event_bus: None }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn publish(&self, event: ExecutionEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_execution_event(event);
        }
    }

    pub async fn execute(&self, plan: &ExecutionPlan, options: &RunOptions) -> ExecutionRunLog {
        let clock = Instant::now();
        let started_at = Utc::now();
        let plan_hash = plan.plan_hash();

        let mut log = ExecutionRunLog::begin(
            plan.execution_id.clone(),
            plan.thread_id.clone(),
            plan.goal.clone(),
            plan.dry_run,
            &plan_hash,
            started_at,
        );
        info!(execution_id = %plan.execution_id, dry_run = plan.dry_run, "Plan run started");
        self.publish(ExecutionEvent::RunStarted {
            execution_id: log.execution_id.clone(),
            thread_id: log.thread_id.clone(),
            plan_hash: log.plan_hash.clone(),
            dry_run: plan.dry_run,
            started_at,
        });

        if let Err(e) = plan.validate() {
            log.fail(format!("{PLAN_INVALID}: {e}"), None);
            return self.finish(log);
        }

        if !plan.dry_run {
            let missing = missing_secrets(self.secrets.as_ref(), plan.env_secret_names());
            if !missing.is_empty() {
                warn!(execution_id = %plan.execution_id, ?missing, "Required secrets missing");
                log.fail(format!("{MISSING_REQUIRED_SECRETS}: {}", missing.join(", ")), None);
                log.missing_secrets = missing;
                return self.finish(log);
            }
        }

        let ctx = StepContext {
            execution_id: log.execution_id.clone(),
            thread_id: log.thread_id.clone(),
            plan_hash: log.plan_hash.clone(),
        };

        if let (Some(check), false) = (&plan.prestate, plan.dry_run) {
            if !self.prestate_matches(&ctx, check, &mut log).await {
                return self.finish(log);
            }
        }

        for planned in plan.ordered_steps() {
            let step = planned.step;

            if let Some(max) = self.config.max_runtime_ms {
                let elapsed = clock.elapsed().as_millis() as u64;
                if elapsed > max {
                    warn!(execution_id = %ctx.execution_id, elapsed, max, "Runtime ceiling exceeded");
                    log.deny(
                        POLICY_MAX_RUNTIME_MS,
                        format!("elapsed {elapsed}ms exceeds max_runtime_ms {max} before step {}", step.step_id),
                    );
                    break;
                }
            }

            if plan.dry_run {
                let skipped = skipped_step(planned);
                self.publish_step(&ctx, &skipped);
                log.push_step(skipped);
                continue;
            }

            if step.requires_approval && !options.is_approved(&step.step_id) {
                info!(execution_id = %ctx.execution_id, step_id = %step.step_id, "Awaiting approval");
                log.await_approval(step.step_id.clone(), format!("step {} requires approval", step.step_id));
                break;
            }

            let step_log = self.run_step(&ctx, planned).await;
            self.publish_step(&ctx, &step_log);
            let failure = (step_log.status == StepStatus::Failed).then(|| step_log.error.clone());
            log.push_step(step_log);

            if let Some(error) = failure {
                let error = error.unwrap_or_else(|| format!("step {} failed", step.step_id));
                warn!(execution_id = %ctx.execution_id, step_id = %step.step_id, %error, "Step failed");
                log.fail(error, Some(step.step_id.clone()));
                break;
            }
        }

        self.finish(log)
    }

    /// Re-reads the prestate source. On mismatch or read failure the log is
    /// closed and `false` is returned.
    async fn prestate_matches(&self, ctx: &StepContext, check: &PrestateCheck, log: &mut ExecutionRunLog) -> bool {
        let step = check.read_step();
        let timeout = Duration::from_millis(self.config.default_step_timeout_ms);
        let outcome = self.steps.execute(ctx, &step, timeout).await.outcome;

        if !outcome.ok {
            let reason = outcome.error.unwrap_or_else(|| format!("HTTP {}", outcome.status.unwrap_or_default()));
            warn!(execution_id = %ctx.execution_id, url = %check.url, %reason, "Prestate read failed");
            log.fail(format!("{PRESTATE_UNAVAILABLE}: {reason}"), None);
            return false;
        }

        match check.fingerprint(&outcome.response) {
            Some(observed) if observed == check.expected_hash => true,
            observed => {
                warn!(execution_id = %ctx.execution_id, url = %check.url, "Prestate changed since planning");
                let observed = observed.unwrap_or_else(|| "<missing>".to_string());
                log.deny(
                    PRESTATE_STALE,
                    format!("expected {} observed {observed} at {}", check.expected_hash, check.url),
                );
                false
            }
        }
    }

    async fn run_step(&self, ctx: &StepContext, planned: PlannedStep<'_>) -> StepRunLog {
        let step = planned.step;
        let started_at = Utc::now();
        let clock = Instant::now();
        let timeout = Duration::from_millis(step.timeout_ms.unwrap_or(self.config.default_step_timeout_ms));

        let StepExecution { outcome, idempotency } = self.steps.execute(ctx, step, timeout).await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        let report = expectations::check(&step.expects, outcome.status, &outcome.response);
        let guard = step.guard_declaration().map(|decl| {
            GuardSpec::from_declaration(decl).map(|spec| guard::evaluate(&spec, &outcome.response))
        });

        let error = failure_reason(outcome.ok, outcome.status, outcome.error.as_deref(), &report, guard.as_ref());
        let guard = guard.and_then(Result::ok);

        StepRunLog {
            step_id: step.step_id.clone(),
            phase_id: planned.phase_id.map(str::to_string),
            action: step.action.clone(),
            adapter: step.adapter.as_str().to_string(),
            method: step.method.as_str().to_string(),
            url: step.url.clone(),
            status: if error.is_none() { StepStatus::Success } else { StepStatus::Failed },
            http_status: outcome.status,
            duration_ms,
            started_at,
            response: outcome.response,
            expectations: Some(report),
            guard,
            idempotency,
            error,
        }
    }

    fn publish_step(&self, ctx: &StepContext, step: &StepRunLog) {
        self.publish(ExecutionEvent::StepFinished {
            execution_id: ctx.execution_id.clone(),
            step_id: step.step_id.clone(),
            status: step.status,
            http_status: step.http_status,
            duration_ms: step.duration_ms,
            replayed: step.idempotency.as_ref().is_some_and(|t| t.replayed),
            finished_at: Utc::now(),
        });
    }

    fn finish(&self, mut log: ExecutionRunLog) -> ExecutionRunLog {
        let finished_at = Utc::now();
        if let Err(e) = log.seal(finished_at) {
            warn!(execution_id = %log.execution_id, error = %e, "Receipt hash could not be computed");
            if log.status == RunStatus::Running {
                log.status = RunStatus::Failed;
            }
            log.finished_at = Some(finished_at);
        }
        info!(
            execution_id = %log.execution_id,
            status = log.status.as_str(),
            steps = log.steps.len(),
            "Plan run finished"
        );
        self.publish(ExecutionEvent::RunFinished {
            execution_id: log.execution_id.clone(),
            status: log.status,
            receipt_hash: log.receipt_hash.clone(),
            finished_at,
        });
        log
    }
}

fn skipped_step(planned: PlannedStep<'_>) -> StepRunLog {
    let step = planned.step;
    StepRunLog {
        step_id: step.step_id.clone(),
        phase_id: planned.phase_id.map(str::to_string),
        action: step.action.clone(),
        adapter: step.adapter.as_str().to_string(),
        method: step.method.as_str().to_string(),
        url: step.url.clone(),
        status: StepStatus::Skipped,
        http_status: None,
        duration_ms: 0,
        started_at: Utc::now(),
        response: json!({ "dry_run": true }),
        expectations: None,
        guard: None,
        idempotency: None,
        error: None,
    }
}

/// First reason the step failed, `None` when it succeeded.
fn failure_reason(
    ok: bool,
    status: Option<u16>,
    error: Option<&str>,
    report: &ExpectationReport,
    guard: Option<&Result<GuardResult, serde_json::Error>>,
) -> Option<String> {
    if let Some(error) = error {
        return Some(error.to_string());
    }
    if !ok {
        let status = status.map_or_else(|| "no status".to_string(), |s| format!("HTTP {s}"));
        return Some(format!("{UNEXPECTED_HTTP_STATUS}: adapter call not ok ({status})"));
    }
    if !report.http_status_ok {
        return Some(format!(
            "{UNEXPECTED_HTTP_STATUS}: got {}, expected one of {:?}",
            status.map_or_else(|| "none".to_string(), |s| s.to_string()),
            report.expected_http_status
        ));
    }
    if !report.missing_json_paths.is_empty() {
        return Some(format!("{MISSING_JSON_PATHS}: {}", report.missing_json_paths.join(", ")));
    }
    match guard {
        Some(Err(e)) => Some(format!("{GUARD_SPEC_INVALID}: {e}")),
        Some(Ok(result)) if result.blocked() => {
            let codes: Vec<&str> = result.errors.iter().map(|f| f.code.as_str()).collect();
            Some(format!("{GUARD_BLOCKED}: {}", codes.join(", ")))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::step_executor::StepOutcome;
    use crate::domain::plan::ExecutionStep;
    use crate::infrastructure::secrets::StaticSecretResolver;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    /// Answers each step from a script keyed by step id.
    #[derive(Default)]
    struct ScriptedSteps {
        script: Mutex<Vec<(String, StepOutcome)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSteps {
        fn answer(self, step_id: &str, outcome: StepOutcome) -> Self {
            self.script.lock().push((step_id.to_string(), outcome));
            self
        }
    }

    #[async_trait]
    impl StepExecutor for ScriptedSteps {
        async fn execute(&self, _ctx: &StepContext, step: &ExecutionStep, _timeout: Duration) -> StepExecution {
            self.calls.lock().push(step.step_id.clone());
            let outcome = self
                .script
                .lock()
                .iter()
                .find(|(id, _)| id == &step.step_id)
                .map(|(_, o)| o.clone())
                .unwrap_or_else(|| StepOutcome::local(json!({})));
            outcome.into()
        }
    }

    fn ok(status: u16, body: Value) -> StepOutcome {
        StepOutcome { ok: true, status: Some(status), response: body, error: None }
    }

    fn plan(extra: Value) -> ExecutionPlan {
        let mut base = json!({
            "execution_id": "exec-1",
            "threadId": "thread-1",
            "goal": "sync",
            "steps": [
                {"step_id": "a", "adapter": "WebhookAdapter", "method": "GET", "url": "http://x/a", "expects": {"http_status": [200]}},
                {"step_id": "b", "adapter": "WebhookAdapter", "method": "GET", "url": "http://x/b", "expects": {"http_status": [200], "json_paths_present": ["data.id"]}},
                {"step_id": "c", "adapter": "WebhookAdapter", "method": "GET", "url": "http://x/c", "expects": {"http_status": [200]}}
            ]
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut base, extra) {
            base.extend(extra);
        }
        serde_json::from_value(base).unwrap()
    }

    fn executor(steps: Arc<ScriptedSteps>) -> PlanExecutor {
        PlanExecutor::new(steps, Arc::new(StaticSecretResolver::new()), ExecutorConfig::default())
    }

    #[tokio::test]
    async fn test_fail_fast_on_missing_path() {
        let steps = Arc::new(ScriptedSteps::default().answer("b", ok(200, json!({"data": {}}))));
        let log = executor(steps.clone()).execute(&plan(json!({})), &RunOptions::default()).await;

        assert_eq!(log.status, RunStatus::Failed);
        assert_eq!(log.failed_step.as_deref(), Some("b"));
        assert_eq!(log.steps.len(), 2);
        assert!(log.error.as_deref().unwrap().starts_with(MISSING_JSON_PATHS));
        assert_eq!(*steps.calls.lock(), vec!["a", "b"]);
        log.verify_receipt().unwrap();
    }

    #[tokio::test]
    async fn test_prestate_is_compared_before_the_first_step() {
        let prestate = |expected: &Value| {
            json!({"prestate": {
                "url": "http://x/state",
                "json_path": "data.rev",
                "expected_hash": crate::domain::hashing::stable_hash(expected)
            }})
        };
        let current = ok(200, json!({"data": {"rev": 7}}));

        let steps = Arc::new(ScriptedSteps::default().answer("prestate", current.clone()));
        let log = executor(steps.clone()).execute(&plan(prestate(&json!(7))), &RunOptions::default()).await;
        assert_eq!(log.status, RunStatus::Success);
        assert_eq!(*steps.calls.lock(), vec!["prestate", "a", "b", "c"]);

        let steps = Arc::new(ScriptedSteps::default().answer("prestate", current));
        let log = executor(steps.clone()).execute(&plan(prestate(&json!(6))), &RunOptions::default()).await;
        assert_eq!(log.status, RunStatus::Denied);
        assert_eq!(log.policy_denied.as_ref().unwrap().code, PRESTATE_STALE);
        assert!(log.steps.is_empty());
        assert_eq!(*steps.calls.lock(), vec!["prestate"]);
        log.verify_receipt().unwrap();

        let unreachable = StepOutcome { ok: false, status: Some(503), response: json!({}), error: None };
        let steps = Arc::new(ScriptedSteps::default().answer("prestate", unreachable));
        let log = executor(steps).execute(&plan(prestate(&json!(7))), &RunOptions::default()).await;
        assert_eq!(log.status, RunStatus::Failed);
        assert!(log.error.as_deref().unwrap().starts_with(PRESTATE_UNAVAILABLE));

        let steps = Arc::new(ScriptedSteps::default());
        let mut dry = prestate(&json!(6));
        dry["dry_run"] = json!(true);
        let log = executor(steps.clone()).execute(&plan(dry), &RunOptions::default()).await;
        assert_eq!(log.status, RunStatus::Success);
        assert!(steps.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_calls() {
        let steps = Arc::new(ScriptedSteps::default());
        let log = executor(steps.clone())
            .execute(&plan(json!({"dry_run": true, "required_secrets": [{"name": "NOPE"}]})), &RunOptions::default())
            .await;

        assert_eq!(log.status, RunStatus::Success);
        assert!(log.steps.iter().all(|s| s.status == StepStatus::Skipped && s.response == json!({"dry_run": true})));
        assert!(steps.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_secrets_run_zero_steps() {
        let steps = Arc::new(ScriptedSteps::default());
        let log = executor(steps.clone())
            .execute(
                &plan(json!({"required_secrets": [{"name": "API_KEY"}, {"name": "HOOK", "source": "adapter"}]})),
                &RunOptions::default(),
            )
            .await;

        assert_eq!(log.status, RunStatus::Failed);
        assert_eq!(log.missing_secrets, vec!["API_KEY"]);
        assert!(log.steps.is_empty());
        assert!(steps.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_approval_gate_and_guard_block() {
        let mut gated = plan(json!({}));
        gated.steps.as_mut().unwrap()[1].requires_approval = true;

        let steps = Arc::new(ScriptedSteps::default());
        let log = executor(steps.clone()).execute(&gated, &RunOptions::default()).await;
        assert_eq!(log.status, RunStatus::AwaitingApproval);
        assert_eq!(log.approval_required.as_ref().unwrap().step_id, "b");
        assert_eq!(log.steps.len(), 1);

        let mut guarded = plan(json!({}));
        guarded.steps.as_mut().unwrap()[0].payload = Some(json!({"guard": {
            "mode": "GROUNDED_OUTPUT",
            "strict": true,
            "rendered_prompt": "summarize: the sky is blue",
            "pinned_input_text": "the sky is blue",
            "pinned_input_hash": crate::domain::hashing::sha256_hex("the sky is blue"),
            "grounding_text": "the sky is blue"
        }}));
        let steps = Arc::new(ScriptedSteps::default().answer("a", ok(200, json!({"claims": ["grass is purple"]}))));
        let log = executor(steps).execute(&guarded, &RunOptions::default()).await;
        assert_eq!(log.status, RunStatus::Failed);
        assert!(log.error.as_deref().unwrap().starts_with(GUARD_BLOCKED));
        assert!(log.steps[0].guard.as_ref().unwrap().blocked());
    }

    #[tokio::test]
    async fn test_invalid_plan_is_reported_not_raised() {
        let mut bad = plan(json!({}));
        bad.steps.as_mut().unwrap()[2].step_id = "a".into();
        let log = executor(Arc::new(ScriptedSteps::default())).execute(&bad, &RunOptions::default()).await;
        assert_eq!(log.status, RunStatus::Failed);
        assert!(log.error.as_deref().unwrap().starts_with(PLAN_INVALID));
        assert!(log.is_sealed());
    }
}
