// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One [`StepHandler`](crate::application::step_executor::StepHandler) per
//! [`StepKind`](crate::domain::plan::StepKind).

mod analysis;
mod browser;
mod docs;
mod http;
mod notion;

pub use analysis::AnalysisHandler;
pub use browser::{BrowserL0Handler, BrowserOperatorHandler, L0_ALLOWED_ACTIONS};
pub use docs::DocsCaptureHandler;
pub use http::HttpStepHandler;
pub use notion::NotionHandler;

use serde_json::Value;

use crate::application::step_executor::StepOutcome;
use crate::domain::plan::ExecutionStep;
use crate::domain::transport::{HttpRequest, HttpTransport};

/// Request skeleton carrying the step's method, url and headers.
fn base_request(step: &ExecutionStep) -> HttpRequest {
    let mut request = HttpRequest::new(step.method, step.url.clone());
    request.headers = step.headers.clone();
    request
}

/// Request with the step's declared payload as its body. A step without a
/// payload sends no body; a declared `null` is sent as JSON.
fn step_request(step: &ExecutionStep) -> HttpRequest {
    let request = base_request(step);
    match &step.payload {
        Some(payload) => request.with_payload(&outbound_payload(payload)),
        None => request,
    }
}

/// Step payload as sent to the adapter. The `guard` declaration is engine
/// metadata and never leaves the process.
fn outbound_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) if map.contains_key("guard") => {
            let mut map = map.clone();
            map.remove("guard");
            Value::Object(map)
        }
        other => other.clone(),
    }
}

async fn call(transport: &dyn HttpTransport, request: HttpRequest) -> StepOutcome {
    match transport.send(request).await {
        Ok(response) => StepOutcome::from_response(&response),
        Err(e) => StepOutcome::failure(e.to_string()),
    }
}
