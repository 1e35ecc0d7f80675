// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Step Executor
//!
//! Executes one [`ExecutionStep`] and reports a [`StepOutcome`]
//! (`ok`, `status`, `response`, `error`). Expectation checking is the
//! caller's job.
//!
//! [`StepDispatcher`] parses the step's action into a [`StepKind`] and
//! matches it exhaustively onto one handler per kind. Every handler future
//! runs under a single wall-clock deadline; when it elapses the future is
//! dropped (cancelling any in-flight request) and the step fails with
//! `Timeout after <n>ms`.
//!
//! ## Idempotent writes
//!
//! `notion.live.write` steps, and HTTP write steps that declare an explicit
//! `idempotency_key`, go through the [`IdempotencyLedger`]:
//!
//! 1. use the declared key or derive one from
//!    `(action, plan_hash, step_id, threadId)`;
//! 2. claim it; a committed record is replayed without calling out;
//! 3. call the adapter;
//! 4. commit the record right after a successful call, before the next step
//!    runs. A failed call releases the claim so a later run may retry.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::application::handlers::{
    AnalysisHandler, BrowserL0Handler, BrowserOperatorHandler, DocsCaptureHandler, HttpStepHandler, NotionHandler,
};
use crate::domain::codes::{IDEMPOTENCY_IN_FLIGHT, IDEMPOTENCY_PERSISTENCE, PLAN_INVALID, STEP_TIMEOUT};
use crate::domain::engine_config::NotionConfig;
use crate::domain::hashing::derive_idempotency_key;
use crate::domain::idempotency::{Claim, IdempotencyLedger, IdempotencyRecord};
use crate::domain::plan::{ExecutionStep, StepKind};
use crate::domain::run_log::IdempotencyTrace;
use crate::domain::secrets::SecretResolver;
use crate::domain::transport::{HttpResponse, HttpTransport};

/// Identity of the run a step belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    pub execution_id: String,
    pub thread_id: String,
    pub plan_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub ok: bool,
    pub status: Option<u16>,
    pub response: Value,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn from_response(response: &HttpResponse) -> Self {
        Self { ok: response.is_ok(), status: Some(response.status), response: response.parsed_body(), error: None }
    }

    /// Result of a step evaluated in-process.
    pub fn local(response: Value) -> Self {
        Self { ok: true, status: Some(200), response, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { ok: false, status: None, response: Value::Null, error: Some(error.into()) }
    }
}

/// Outcome plus how the idempotency ledger was involved.
#[derive(Debug, Clone, PartialEq)]
pub struct StepExecution {
    pub outcome: StepOutcome,
    pub idempotency: Option<IdempotencyTrace>,
}

impl From<StepOutcome> for StepExecution {
    fn from(outcome: StepOutcome) -> Self {
        Self { outcome, idempotency: None }
    }
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, ctx: &StepContext, step: &ExecutionStep, kind: &StepKind) -> StepOutcome;
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, ctx: &StepContext, step: &ExecutionStep, timeout: Duration) -> StepExecution;
}

/// Run `fut` under a hard deadline.
pub async fn run_with_timeout<F>(fut: F, timeout: Duration) -> StepOutcome
where
    F: Future<Output = StepOutcome>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let ms = timeout.as_millis();
            warn!(code = STEP_TIMEOUT, timeout_ms = ms as u64, "Step timed out");
            StepOutcome::failure(format!("Timeout after {ms}ms"))
        }
    }
}

pub struct StepDispatcher {
    http: HttpStepHandler,
    analysis: AnalysisHandler,
    notion: NotionHandler,
    docs: DocsCaptureHandler,
    browser: BrowserOperatorHandler,
    browser_l0: BrowserL0Handler,
    ledger: Arc<IdempotencyLedger>,
}

impl StepDispatcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        secrets: Arc<dyn SecretResolver>,
        ledger: Arc<IdempotencyLedger>,
    ) -> Self {
        Self {
            http: HttpStepHandler::new(transport.clone()),
            analysis: AnalysisHandler,
            notion: NotionHandler::new(transport.clone(), secrets, NotionConfig::default()),
            docs: DocsCaptureHandler::new(transport.clone()),
            browser: BrowserOperatorHandler::new(transport.clone()),
            browser_l0: BrowserL0Handler::new(transport),
            ledger,
        }
    }

    pub fn with_notion_config(mut self, config: NotionConfig) -> Self {
        self.notion = self.notion.with_config(config);
        self
    }

    fn handler_for(&self, kind: &StepKind) -> &dyn StepHandler {
        match kind {
            StepKind::Http => &self.http,
            StepKind::Analysis { .. } => &self.analysis,
            StepKind::NotionLiveRead | StepKind::NotionLiveWrite => &self.notion,
            StepKind::DocsCapture => &self.docs,
            StepKind::BrowserOperator { .. } => &self.browser,
            StepKind::BrowserL0 { .. } => &self.browser_l0,
        }
    }

    /// Ledger key for steps that must run at most once, `None` otherwise.
    fn ledger_key(ctx: &StepContext, step: &ExecutionStep, kind: &StepKind) -> Option<String> {
        let declared = step.idempotency_key.as_deref().map(str::trim).filter(|k| !k.is_empty());
        match kind {
            StepKind::NotionLiveWrite => Some(declared.map(str::to_string).unwrap_or_else(|| {
                derive_idempotency_key(&step.action, &ctx.plan_hash, &step.step_id, &ctx.thread_id)
            })),
            StepKind::Http if step.method.is_write() => declared.map(str::to_string),
            _ => None,
        }
    }

    async fn execute_once(
        &self,
        ctx: &StepContext,
        step: &ExecutionStep,
        kind: &StepKind,
        key: String,
        timeout: Duration,
    ) -> StepExecution {
        let mut trace = IdempotencyTrace { key: key.clone(), replayed: false, committed: false };

        let claim = match self.ledger.claim(&key, &ctx.execution_id, Utc::now()).await {
            Ok(claim) => claim,
            Err(e) => {
                warn!(step_id = %step.step_id, error = %e, "Idempotency claim failed");
                return StepExecution {
                    outcome: StepOutcome::failure(format!("{IDEMPOTENCY_PERSISTENCE}: {e}")),
                    idempotency: Some(trace),
                };
            }
        };

        match claim {
            Claim::Replay(record) => {
                info!(step_id = %step.step_id, key = %key, "Replaying committed write");
                trace.replayed = true;
                trace.committed = true;
                StepExecution {
                    outcome: StepOutcome { ok: true, status: record.http_status, response: record.response, error: None },
                    idempotency: Some(trace),
                }
            }
            Claim::InFlight { holder } => StepExecution {
                outcome: StepOutcome::failure(format!(
                    "{IDEMPOTENCY_IN_FLIGHT}: key {key} is claimed by execution {holder}"
                )),
                idempotency: Some(trace),
            },
            Claim::Acquired(token) => {
                let mut outcome = run_with_timeout(self.handler_for(kind).handle(ctx, step, kind), timeout).await;
                if outcome.ok {
                    let record = IdempotencyRecord {
                        idempotency_key: key.clone(),
                        execution_id: ctx.execution_id.clone(),
                        plan_hash: ctx.plan_hash.clone(),
                        thread_id: ctx.thread_id.clone(),
                        step_id: step.step_id.clone(),
                        action: step.action.clone(),
                        http_status: outcome.status,
                        response: outcome.response.clone(),
                        executed_at: Utc::now(),
                    };
                    match self.ledger.commit(&record).await {
                        Ok(()) => trace.committed = true,
                        Err(e) => {
                            warn!(step_id = %step.step_id, error = %e, "Write succeeded but could not be recorded");
                            outcome.ok = false;
                            outcome.error = Some(format!("{IDEMPOTENCY_PERSISTENCE}: {e}"));
                        }
                    }
                } else if let Err(e) = self.ledger.release(&key, &token).await {
                    warn!(step_id = %step.step_id, error = %e, "Failed to release idempotency claim");
                }
                StepExecution { outcome, idempotency: Some(trace) }
            }
        }
    }
}

#[async_trait]
impl StepExecutor for StepDispatcher {
    async fn execute(&self, ctx: &StepContext, step: &ExecutionStep, timeout: Duration) -> StepExecution {
        let kind = match step.kind() {
            Ok(kind) => kind,
            Err(e) => return StepOutcome::failure(format!("{PLAN_INVALID}: {e}")).into(),
        };
        debug!(step_id = %step.step_id, ?kind, "Dispatching step");

        match Self::ledger_key(ctx, step, &kind) {
            Some(key) => self.execute_once(ctx, step, &kind, key, timeout).await,
            None => run_with_timeout(self.handler_for(&kind).handle(ctx, step, &kind), timeout).await.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::HttpMethod;
    use crate::domain::transport::{HttpRequest, TransportError};
    use crate::infrastructure::repositories::InMemoryStateStore;
    use crate::infrastructure::secrets::StaticSecretResolver;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Records requests and answers with a fixed response after `delay`.
    struct FakeTransport {
        requests: Mutex<Vec<HttpRequest>>,
        status: u16,
        body: String,
        delay: Duration,
    }

    impl FakeTransport {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self { requests: Mutex::new(Vec::new()), status, body: body.into(), delay: Duration::ZERO })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self { requests: Mutex::new(Vec::new()), status: 200, body: "{}".into(), delay })
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().push(request);
            tokio::time::sleep(self.delay).await;
            Ok(HttpResponse { status: self.status, body: self.body.clone() })
        }
    }

    fn ctx() -> StepContext {
        StepContext { execution_id: "exec-1".into(), thread_id: "thread-1".into(), plan_hash: "ph".into() }
    }

    fn step(action: &str, method: HttpMethod) -> ExecutionStep {
        serde_json::from_value(json!({
            "step_id": "s1",
            "action": action,
            "adapter": "NotionAdapter",
            "method": method.as_str(),
            "url": "https://api.example.test/v1/pages",
            "payload": {"title": "hello"},
            "expects": {"http_status": [200]}
        }))
        .unwrap()
    }

    fn dispatcher(transport: Arc<FakeTransport>) -> StepDispatcher {
        let ledger = Arc::new(IdempotencyLedger::new(Arc::new(InMemoryStateStore::new())));
        let secrets = Arc::new(StaticSecretResolver::new().with("NOTION_TOKEN", "secret-token"));
        StepDispatcher::new(transport, secrets, ledger)
    }

    #[tokio::test]
    async fn test_timeout_fails_the_step() {
        let transport = FakeTransport::slow(Duration::from_millis(200));
        let exec = dispatcher(transport)
            .execute(&ctx(), &step("http.request", HttpMethod::Get), Duration::from_millis(20))
            .await;
        assert!(!exec.outcome.ok);
        assert_eq!(exec.outcome.error.as_deref(), Some("Timeout after 20ms"));
    }

    #[tokio::test]
    async fn test_notion_write_runs_once_then_replays() {
        let transport = FakeTransport::new(200, r#"{"id":"page-1"}"#);
        let dispatcher = dispatcher(transport.clone());
        let write = step("notion.live.write", HttpMethod::Post);

        let first = dispatcher.execute(&ctx(), &write, Duration::from_secs(5)).await;
        assert!(first.outcome.ok);
        let trace = first.idempotency.unwrap();
        assert!(trace.committed && !trace.replayed);

        let second = dispatcher.execute(&ctx(), &write, Duration::from_secs(5)).await;
        assert_eq!(second.outcome.status, Some(200));
        assert_eq!(second.outcome.response, json!({"id": "page-1"}));
        assert!(second.idempotency.unwrap().replayed);
        assert_eq!(transport.calls(), 1);

        let sent = &transport.requests.lock()[0];
        assert_eq!(sent.headers.get("Authorization").map(String::as_str), Some("Bearer secret-token"));
        assert!(sent.has_header("Notion-Version"));
    }

    #[tokio::test]
    async fn test_concurrent_attempts_of_one_execution_write_once() {
        let transport = FakeTransport::slow(Duration::from_millis(50));
        let dispatcher = dispatcher(transport.clone());
        let write = step("notion.live.write", HttpMethod::Post);

        let (ctx_a, ctx_b) = (ctx(), ctx());
        let (a, b) = tokio::join!(
            dispatcher.execute(&ctx_a, &write, Duration::from_secs(5)),
            dispatcher.execute(&ctx_b, &write, Duration::from_secs(5)),
        );

        assert!(a.outcome.ok ^ b.outcome.ok);
        let loser = if a.outcome.ok { &b } else { &a };
        assert!(loser.outcome.error.as_deref().unwrap().starts_with(IDEMPOTENCY_IN_FLIGHT));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_releases_claim() {
        let transport = FakeTransport::new(500, "boom");
        let dispatcher = dispatcher(transport.clone());
        let write = step("notion.live.write", HttpMethod::Post);

        let first = dispatcher.execute(&ctx(), &write, Duration::from_secs(5)).await;
        assert!(!first.outcome.ok);
        assert_eq!(first.outcome.status, Some(500));

        dispatcher.execute(&ctx(), &write, Duration::from_secs(5)).await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_plain_http_write_without_key_is_not_deduplicated() {
        let transport = FakeTransport::new(201, "{}");
        let dispatcher = dispatcher(transport.clone());
        let post = step("http.request", HttpMethod::Post);

        let exec = dispatcher.execute(&ctx(), &post, Duration::from_secs(5)).await;
        assert!(exec.idempotency.is_none());
        dispatcher.execute(&ctx(), &post, Duration::from_secs(5)).await;
        assert_eq!(transport.calls(), 2);
    }
}
