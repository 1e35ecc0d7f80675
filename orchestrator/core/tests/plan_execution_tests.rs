// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use sintra_core::application::{Engine, RunOptions};
use sintra_core::domain::codes::{IDEMPOTENCY_IN_FLIGHT, POLICY_MAX_RUNTIME_MS};
use sintra_core::domain::engine_config::{EngineConfigManifest, StorageBackendKind};
use sintra_core::domain::plan::ExecutionPlan;
use sintra_core::domain::repository::StateStore;
use sintra_core::domain::run_log::{RunStatus, StepStatus};
use sintra_core::domain::secrets::SecretResolver;
use sintra_core::domain::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use sintra_core::infrastructure::audit_log::InMemoryAuditLog;
use sintra_core::infrastructure::repositories::InMemoryStateStore;
use sintra_core::infrastructure::{ReqwestTransport, StaticSecretResolver};

fn engine_with(
    dir: &TempDir,
    transport: Arc<dyn HttpTransport>,
    secrets: Arc<dyn SecretResolver>,
    tweak: impl FnOnce(&mut EngineConfigManifest),
) -> Engine {
    engine_on(dir, Arc::new(InMemoryStateStore::new()), transport, secrets, tweak)
}

fn engine_on(
    dir: &TempDir,
    store: Arc<InMemoryStateStore>,
    transport: Arc<dyn HttpTransport>,
    secrets: Arc<dyn SecretResolver>,
    tweak: impl FnOnce(&mut EngineConfigManifest),
) -> Engine {
    let mut config = EngineConfigManifest::default();
    config.spec.autonomy.state_dir = dir.path().to_path_buf();
    config.spec.storage.backend = StorageBackendKind::Memory;
    tweak(&mut config);

    Engine::with_components(
        config,
        store.clone(),
        store,
        Arc::new(InMemoryAuditLog::new()),
        transport,
        secrets,
    )
}

fn plan(value: Value) -> ExecutionPlan {
    serde_json::from_value(value).unwrap()
}

fn http_step(step_id: &str, method: &str, url: String, expects: Value) -> Value {
    json!({
        "step_id": step_id,
        "adapter": "WebhookAdapter",
        "method": method,
        "url": url,
        "expects": expects,
    })
}

#[tokio::test]
async fn test_get_with_json_path_succeeds_and_is_receipted() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/items/7")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":{"id":"item-7","title":"Invoice"}}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, Arc::new(ReqwestTransport::new()), Arc::new(StaticSecretResolver::new()), |_| {});
    let plan = plan(json!({
        "execution_id": "exec-get",
        "threadId": "thread-1",
        "goal": "read item",
        "steps": [http_step(
            "fetch",
            "GET",
            format!("{}/items/7", server.url()),
            json!({"http_status": [200], "json_paths_present": ["data.id"]}),
        )]
    }));

    let run = engine.run_plan(&plan, &RunOptions::default()).await.unwrap();
    mock.assert_async().await;

    assert_eq!(run.log.status, RunStatus::Success);
    let step = &run.log.steps[0];
    assert_eq!(step.status, StepStatus::Success);
    assert_eq!(step.http_status, Some(200));
    assert_eq!(step.response["data"]["id"], "item-7");

    let path = run.receipt_path.unwrap();
    let saved = sintra_core::infrastructure::receipts::load_receipt(&path).unwrap();
    saved.verify_receipt().unwrap();
    assert_eq!(saved.receipt_hash, run.log.receipt_hash);
}

#[tokio::test]
async fn test_first_failure_stops_the_run() {
    let mut server = mockito::Server::new_async().await;
    let first = server.mock("POST", "/a").with_status(500).with_body("boom").expect(1).create_async().await;
    let second = server.mock("POST", "/b").with_status(200).expect(0).create_async().await;

    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, Arc::new(ReqwestTransport::new()), Arc::new(StaticSecretResolver::new()), |_| {});
    let plan = plan(json!({
        "execution_id": "exec-failfast",
        "threadId": "thread-1",
        "goal": "two posts",
        "steps": [
            http_step("a", "POST", format!("{}/a", server.url()), json!({"http_status": [200]})),
            http_step("b", "POST", format!("{}/b", server.url()), json!({"http_status": [200]})),
        ]
    }));

    let run = engine.run_plan(&plan, &RunOptions::default()).await.unwrap();
    first.assert_async().await;
    second.assert_async().await;

    assert_eq!(run.log.status, RunStatus::Failed);
    assert_eq!(run.log.failed_step.as_deref(), Some("a"));
    assert_eq!(run.log.steps.len(), 1);
    assert_eq!(run.log.steps[0].response, json!("boom"));
}

#[tokio::test]
async fn test_dry_run_makes_no_calls() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/write").expect(0).create_async().await;

    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, Arc::new(ReqwestTransport::new()), Arc::new(StaticSecretResolver::new()), |_| {});
    let plan = plan(json!({
        "execution_id": "exec-dry",
        "threadId": "thread-1",
        "goal": "preview",
        "dry_run": true,
        "required_secrets": [{"name": "NOT_SET_ANYWHERE"}],
        "steps": [http_step("w", "POST", format!("{}/write", server.url()), json!({"http_status": [200]}))]
    }));

    let run = engine.run_plan(&plan, &RunOptions::default()).await.unwrap();
    mock.assert_async().await;

    assert_eq!(run.log.status, RunStatus::Success);
    assert_eq!(run.log.steps[0].status, StepStatus::Skipped);
    assert_eq!(run.log.steps[0].response, json!({"dry_run": true}));
}

#[tokio::test]
async fn test_notion_write_reaches_the_api_once() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/pages")
        .match_header("authorization", "Bearer ntn-secret")
        .match_header("notion-version", "2022-06-28")
        .with_status(200)
        .with_body(r#"{"id":"page-1"}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let secrets = StaticSecretResolver::new().with("NOTION_TOKEN", "ntn-secret");
    let engine = engine_with(&dir, Arc::new(ReqwestTransport::new()), Arc::new(secrets), |_| {});
    let mut write = http_step("page", "POST", format!("{}/v1/pages", server.url()), json!({"http_status": [200]}));
    write["action"] = json!("notion.live.write");
    write["adapter"] = json!("NotionAdapter");
    write["payload"] = json!({"parent": {"database_id": "db"}, "properties": {}});
    let plan = plan(json!({
        "execution_id": "exec-notion",
        "threadId": "thread-1",
        "goal": "create page",
        "required_secrets": [{"name": "NOTION_TOKEN"}],
        "steps": [write]
    }));

    let first = engine.run_plan(&plan, &RunOptions::default()).await.unwrap();
    let second = engine.run_plan(&plan, &RunOptions::default()).await.unwrap();
    mock.assert_async().await;

    assert_eq!(first.log.status, RunStatus::Success);
    assert_eq!(second.log.status, RunStatus::Success);
    let replay = &second.log.steps[0];
    assert_eq!(replay.http_status, Some(200));
    assert_eq!(replay.response, json!({"id": "page-1"}));
    assert!(replay.idempotency.as_ref().unwrap().replayed);

    // same execution id, first receipt is kept
    assert!(first.receipt_path.is_some());
    assert!(second.receipt_path.is_none());
}

fn notion_write_plan(execution_id: &str, url: String, dry_run: bool) -> ExecutionPlan {
    let mut write = http_step("page", "POST", url, json!({"http_status": [200]}));
    write["action"] = json!("notion.live.write");
    write["adapter"] = json!("NotionAdapter");
    write["payload"] = json!({"parent": {"database_id": "db"}, "properties": {}});
    plan(json!({
        "execution_id": execution_id,
        "threadId": "thread-1",
        "goal": "create page",
        "dry_run": dry_run,
        "required_secrets": [{"name": "NOTION_TOKEN"}],
        "steps": [write]
    }))
}

#[tokio::test]
async fn test_dry_run_notion_write_leaves_ledger_empty() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/v1/pages").expect(0).create_async().await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStateStore::new());
    let secrets = StaticSecretResolver::new().with("NOTION_TOKEN", "ntn-secret");
    let engine = engine_on(&dir, store.clone(), Arc::new(ReqwestTransport::new()), Arc::new(secrets), |_| {});

    let plan = notion_write_plan("exec-dry-notion", format!("{}/v1/pages", server.url()), true);
    let run = engine.run_plan(&plan, &RunOptions::default()).await.unwrap();
    mock.assert_async().await;

    assert_eq!(run.log.status, RunStatus::Success);
    assert_eq!(run.log.steps[0].status, StepStatus::Skipped);
    assert!(run.log.steps[0].idempotency.is_none());
    assert!(store.list_prefix("idempotency/").await.unwrap().is_empty());
}

/// Counts sends and answers after a delay.
struct CountingTransport {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl HttpTransport for CountingTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(HttpResponse { status: 200, body: r#"{"id":"page-1"}"#.into() })
    }
}

#[tokio::test]
async fn test_concurrent_runs_of_one_plan_write_once() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(CountingTransport { delay: Duration::from_millis(50), calls: AtomicUsize::new(0) });
    let secrets = StaticSecretResolver::new().with("NOTION_TOKEN", "ntn-secret");
    let engine = engine_with(&dir, transport.clone(), Arc::new(secrets), |_| {});

    let plan = notion_write_plan("exec-race", "https://api.notion.test/v1/pages".into(), false);
    let (opts_a, opts_b) = (RunOptions::default(), RunOptions::default());
    let (a, b) = tokio::join!(
        engine.run_plan(&plan, &opts_a),
        engine.run_plan(&plan, &opts_b)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    let statuses = [a.log.status, b.log.status];
    assert!(statuses.contains(&RunStatus::Success));
    assert!(statuses.contains(&RunStatus::Failed));
    let loser = if a.log.status == RunStatus::Failed { &a.log } else { &b.log };
    assert!(loser.error.as_deref().unwrap().starts_with(IDEMPOTENCY_IN_FLIGHT));
}

struct SlowTransport(Duration);

#[async_trait]
impl HttpTransport for SlowTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        tokio::time::sleep(self.0).await;
        Ok(HttpResponse { status: 200, body: "{}".into() })
    }
}

#[tokio::test]
async fn test_runtime_ceiling_denies_between_steps() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(
        &dir,
        Arc::new(SlowTransport(Duration::from_millis(80))),
        Arc::new(StaticSecretResolver::new()),
        |config| config.spec.executor.max_runtime_ms = Some(30),
    );
    let plan = plan(json!({
        "execution_id": "exec-ceiling",
        "threadId": "thread-1",
        "goal": "slow",
        "steps": [
            http_step("a", "GET", "http://slow.test/a".into(), json!({"http_status": [200]})),
            http_step("b", "GET", "http://slow.test/b".into(), json!({"http_status": [200]})),
        ]
    }));

    let run = engine.run_plan(&plan, &RunOptions::default()).await.unwrap();

    assert_eq!(run.log.status, RunStatus::Denied);
    assert_eq!(run.log.policy_denied.as_ref().unwrap().code, POLICY_MAX_RUNTIME_MS);
    assert_eq!(run.log.steps.len(), 1);
    assert_eq!(run.log.steps[0].status, StepStatus::Success);
}

#[tokio::test]
async fn test_step_timeout_fails_the_step() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(
        &dir,
        Arc::new(SlowTransport(Duration::from_secs(5))),
        Arc::new(StaticSecretResolver::new()),
        |_| {},
    );
    let mut step = http_step("a", "GET", "http://slow.test/a".into(), json!({"http_status": [200]}));
    step["timeout_ms"] = json!(20);
    let plan = plan(json!({
        "execution_id": "exec-timeout",
        "threadId": "thread-1",
        "goal": "slow",
        "steps": [step]
    }));

    let run = engine.run_plan(&plan, &RunOptions::default()).await.unwrap();
    assert_eq!(run.log.status, RunStatus::Failed);
    assert_eq!(run.log.steps[0].error.as_deref(), Some("Timeout after 20ms"));
}
