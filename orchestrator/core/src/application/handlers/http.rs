// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::sync::Arc;

use super::{call, step_request};
use crate::application::step_executor::{StepContext, StepHandler, StepOutcome};
use crate::domain::plan::{ExecutionStep, StepKind};
use crate::domain::transport::HttpTransport;

/// Generic adapter call: the step's method, url, headers and payload as-is.
pub struct HttpStepHandler {
    transport: Arc<dyn HttpTransport>,
}

impl HttpStepHandler {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl StepHandler for HttpStepHandler {
    async fn handle(&self, _ctx: &StepContext, step: &ExecutionStep, _kind: &StepKind) -> StepOutcome {
        let request = step_request(step);
        call(self.transport.as_ref(), request).await
    }
}
