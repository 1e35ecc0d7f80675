// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::base_request;
use crate::application::step_executor::{StepContext, StepHandler, StepOutcome};
use crate::domain::hashing::sha256_hex;
use crate::domain::plan::{ExecutionStep, HttpMethod, StepKind};
use crate::domain::transport::HttpTransport;

/// `docs.capture`: fetch a document and return its text with a content hash,
/// so later steps (and guards) can pin exactly what was read.
pub struct DocsCaptureHandler {
    transport: Arc<dyn HttpTransport>,
}

impl DocsCaptureHandler {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl StepHandler for DocsCaptureHandler {
    async fn handle(&self, _ctx: &StepContext, step: &ExecutionStep, _kind: &StepKind) -> StepOutcome {
        let mut request = base_request(step);
        request.method = HttpMethod::Get;

        match self.transport.send(request).await {
            Ok(response) => {
                let bytes = response.body.len();
                let sha256 = sha256_hex(&response.body);
                StepOutcome {
                    ok: response.is_ok(),
                    status: Some(response.status),
                    response: json!({
                        "url": step.url,
                        "text": response.body,
                        "bytes": bytes,
                        "sha256": sha256,
                    }),
                    error: None,
                }
            }
            Err(e) => StepOutcome::failure(e.to_string()),
        }
    }
}
