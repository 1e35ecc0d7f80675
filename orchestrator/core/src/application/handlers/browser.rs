// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Browser operator steps.
//!
//! The operator service behind the step url receives
//! `{action, params, execution_id, threadId}` as a JSON POST. `browser.l0.*`
//! is the read-only tier: only actions in [`L0_ALLOWED_ACTIONS`] are sent,
//! anything else fails before any call is made.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{base_request, call, outbound_payload};
use crate::application::step_executor::{StepContext, StepHandler, StepOutcome};
use crate::domain::codes::{BROWSER_L0_ACTION_NOT_PERMITTED, STEP_PAYLOAD_INVALID};
use crate::domain::plan::{ExecutionStep, HttpMethod, StepKind};
use crate::domain::transport::HttpTransport;

pub const L0_ALLOWED_ACTIONS: [&str; 5] = ["navigate", "read", "extract", "screenshot", "wait"];

/// `params` from the payload, or the whole payload minus `action`.
fn params_of(payload: &Value) -> Value {
    let payload = outbound_payload(payload);
    if let Some(params) = payload.get("params") {
        return params.clone();
    }
    match payload {
        Value::Object(mut map) => {
            map.remove("action");
            Value::Object(map)
        }
        Value::Null => json!({}),
        other => other,
    }
}

async fn dispatch(
    transport: &dyn HttpTransport,
    ctx: &StepContext,
    step: &ExecutionStep,
    action: &str,
    tier: Option<&str>,
) -> StepOutcome {
    let mut body = json!({
        "action": action,
        "params": params_of(step.payload()),
        "execution_id": ctx.execution_id,
        "threadId": ctx.thread_id,
    });
    if let Some(tier) = tier {
        body["tier"] = json!(tier);
    }

    let mut request = base_request(step);
    request.method = HttpMethod::Post;
    call(transport, request.with_payload(&body)).await
}

pub struct BrowserOperatorHandler {
    transport: Arc<dyn HttpTransport>,
}

impl BrowserOperatorHandler {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl StepHandler for BrowserOperatorHandler {
    async fn handle(&self, ctx: &StepContext, step: &ExecutionStep, kind: &StepKind) -> StepOutcome {
        let from_action = match kind {
            StepKind::BrowserOperator { action } => action.clone(),
            _ => None,
        };
        let action = from_action.or_else(|| step.payload().get("action").and_then(Value::as_str).map(str::to_string));
        match action.filter(|a| !a.trim().is_empty()) {
            Some(action) => dispatch(self.transport.as_ref(), ctx, step, &action, None).await,
            None => StepOutcome::failure(format!(
                "{STEP_PAYLOAD_INVALID}: browser.operator step {} names no action",
                step.step_id
            )),
        }
    }
}

pub struct BrowserL0Handler {
    transport: Arc<dyn HttpTransport>,
}

impl BrowserL0Handler {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl StepHandler for BrowserL0Handler {
    async fn handle(&self, ctx: &StepContext, step: &ExecutionStep, kind: &StepKind) -> StepOutcome {
        let StepKind::BrowserL0 { action } = kind else {
            return StepOutcome::failure(format!("{STEP_PAYLOAD_INVALID}: not a browser.l0 step"));
        };
        if !L0_ALLOWED_ACTIONS.contains(&action.as_str()) {
            return StepOutcome::failure(format!(
                "{BROWSER_L0_ACTION_NOT_PERMITTED}: `{action}` is not a read-only action ({})",
                L0_ALLOWED_ACTIONS.join(", ")
            ));
        }
        dispatch(self.transport.as_ref(), ctx, step, action, Some("l0")).await
    }
}
