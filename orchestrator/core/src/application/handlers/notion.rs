// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `notion.live.read` / `notion.live.write`.
//!
//! Both call the step's url with a bearer token taken from the secret named
//! by `notion.token_env` and a `Notion-Version` header. Explicit step headers
//! win. Reads may use POST (database queries) and so carry a payload too.

use async_trait::async_trait;
use std::sync::Arc;

use super::{call, step_request};
use crate::application::step_executor::{StepContext, StepHandler, StepOutcome};
use crate::domain::codes::MISSING_REQUIRED_SECRETS;
use crate::domain::engine_config::NotionConfig;
use crate::domain::plan::{ExecutionStep, StepKind};
use crate::domain::secrets::SecretResolver;
use crate::domain::transport::HttpTransport;

pub struct NotionHandler {
    transport: Arc<dyn HttpTransport>,
    secrets: Arc<dyn SecretResolver>,
    config: NotionConfig,
}

impl NotionHandler {
    pub fn new(transport: Arc<dyn HttpTransport>, secrets: Arc<dyn SecretResolver>, config: NotionConfig) -> Self {
        Self { transport, secrets, config }
    }

    pub fn with_config(mut self, config: NotionConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl StepHandler for NotionHandler {
    async fn handle(&self, _ctx: &StepContext, step: &ExecutionStep, _kind: &StepKind) -> StepOutcome {
        let Some(token) = self.secrets.resolve(&self.config.token_env) else {
            return StepOutcome::failure(format!(
                "{MISSING_REQUIRED_SECRETS}: {} is not set",
                self.config.token_env
            ));
        };

        let mut request = step_request(step);
        request.header_if_absent("Authorization", format!("Bearer {token}"));
        request.header_if_absent("Notion-Version", self.config.api_version.clone());

        call(self.transport.as_ref(), request).await
    }
}
