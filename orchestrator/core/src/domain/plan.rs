// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Plan Domain
//!
//! An `ExecutionPlan` is produced upstream by the planner, validated there, and
//! is read-only here. The engine hashes it once (the plan hash is its identity)
//! and walks its steps in declared order.
//!
//! The plan hash is the stable hash of the document exactly as it was
//! received, unknown fields included and no defaults filled in. Edits go
//! through [`ExecutionPlan::set_dry_run`] and
//! [`ExecutionPlan::set_execution_id`] so the hashed document follows them.
//!
//! ## Shape
//!
//! | Field | Notes |
//! |-------|-------|
//! | `steps` / `phases` | exactly one is populated |
//! | `required_secrets` | env-sourced entries are checked before the first step |
//! | `dry_run` | every step is recorded as skipped, nothing is called |
//! | `prestate` | source snapshot re-read before the first step |
//!
//! Each step's `action` string is parsed into the closed [`StepKind`] union so
//! dispatch is an exhaustive `match` rather than string comparisons.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::hashing::stable_hash;
use crate::domain::json_path;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan must populate exactly one of `steps` or `phases`")]
    StepsXorPhases,
    #[error("duplicate step_id: {0}")]
    DuplicateStepId(String),
    #[error("step {0}: expects.http_status must not be empty")]
    EmptyExpectedStatus(String),
    #[error("step {0}: step_id must not be empty")]
    EmptyStepId(String),
    #[error("unknown step action: {0}")]
    UnknownAction(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "Value")]
pub struct ExecutionPlan {
    pub execution_id: String,

    #[serde(rename = "threadId")]
    pub thread_id: String,

    #[serde(default)]
    pub dry_run: bool,

    pub goal: String,

    #[serde(default)]
    pub required_secrets: Vec<RequiredSecret>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<ExecutionStep>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phases: Option<Vec<ExecutionPhase>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prestate: Option<PrestateCheck>,

    /// The document as received.
    #[serde(skip)]
    source: Value,
}

/// Typed view of a plan document.
#[derive(Deserialize)]
struct PlanDocument {
    execution_id: String,
    #[serde(rename = "threadId")]
    thread_id: String,
    #[serde(default)]
    dry_run: bool,
    goal: String,
    #[serde(default)]
    required_secrets: Vec<RequiredSecret>,
    #[serde(default)]
    steps: Option<Vec<ExecutionStep>>,
    #[serde(default)]
    phases: Option<Vec<ExecutionPhase>>,
    #[serde(default)]
    prestate: Option<PrestateCheck>,
}

impl TryFrom<Value> for ExecutionPlan {
    type Error = serde_json::Error;

    fn try_from(source: Value) -> Result<Self, Self::Error> {
        let doc = PlanDocument::deserialize(&source)?;
        Ok(Self {
            execution_id: doc.execution_id,
            thread_id: doc.thread_id,
            dry_run: doc.dry_run,
            goal: doc.goal,
            required_secrets: doc.required_secrets,
            steps: doc.steps,
            phases: doc.phases,
            prestate: doc.prestate,
            source,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPhase {
    pub phase_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<ExecutionStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequiredSecret {
    pub name: String,
    #[serde(default)]
    pub source: SecretSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Where a required secret is expected to come from. Only `env` secrets are
/// verified by the executor; `adapter` secrets live behind the adapter endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    #[default]
    Env,
    Adapter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionStep {
    pub step_id: String,

    #[serde(default = "default_action")]
    pub action: String,

    pub adapter: Adapter,

    pub method: HttpMethod,

    pub url: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// `None` when the plan does not declare one; a declared `null` is kept.
    #[serde(default, deserialize_with = "declared", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    pub expects: Expectations,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Per-step override of the default step timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_approval: bool,
}

fn default_action() -> String {
    "http.request".to_string()
}

fn declared<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

static NO_PAYLOAD: Value = Value::Null;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Expectations {
    pub http_status: Vec<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_paths_present: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Adapter {
    WebhookAdapter,
    NotionAdapter,
    GoogleDriveAdapter,
    MakeAdapter,
    SlackAdapter,
    BuildMyAgentAdapter,
    BrowserOperatorAdapter,
}

impl Adapter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Adapter::WebhookAdapter => "WebhookAdapter",
            Adapter::NotionAdapter => "NotionAdapter",
            Adapter::GoogleDriveAdapter => "GoogleDriveAdapter",
            Adapter::MakeAdapter => "MakeAdapter",
            Adapter::SlackAdapter => "SlackAdapter",
            Adapter::BuildMyAgentAdapter => "BuildMyAgentAdapter",
            Adapter::BrowserOperatorAdapter => "BrowserOperatorAdapter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// GET and HEAD never carry a request body.
    pub fn carries_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }

    pub fn is_write(&self) -> bool {
        self.carries_body()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of step kinds, parsed from `ExecutionStep::action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Plain HTTP call (`http.request` or any unprefixed adapter action).
    Http,
    /// `analysis.<operation>`, evaluated locally.
    Analysis { operation: String },
    NotionLiveRead,
    NotionLiveWrite,
    DocsCapture,
    /// `browser.operator` or `browser.operator.<action>`
    BrowserOperator { action: Option<String> },
    /// `browser.l0.<action>`, read-only tier.
    BrowserL0 { action: String },
}

impl FromStr for StepKind {
    type Err = PlanError;

    fn from_str(action: &str) -> Result<Self, Self::Err> {
        let action = action.trim();
        if let Some(operation) = action.strip_prefix("analysis.") {
            if operation.is_empty() {
                return Err(PlanError::UnknownAction(action.to_string()));
            }
            return Ok(StepKind::Analysis { operation: operation.to_string() });
        }
        if let Some(l0) = action.strip_prefix("browser.l0.") {
            if l0.is_empty() {
                return Err(PlanError::UnknownAction(action.to_string()));
            }
            return Ok(StepKind::BrowserL0 { action: l0.to_string() });
        }
        if action == "browser.operator" {
            return Ok(StepKind::BrowserOperator { action: None });
        }
        if let Some(op) = action.strip_prefix("browser.operator.") {
            return Ok(StepKind::BrowserOperator { action: Some(op.to_string()) });
        }
        match action {
            "notion.live.read" => Ok(StepKind::NotionLiveRead),
            "notion.live.write" => Ok(StepKind::NotionLiveWrite),
            "docs.capture" => Ok(StepKind::DocsCapture),
            a if a.starts_with("notion.live.") || a.starts_with("browser.") || a.starts_with("docs.") => {
                Err(PlanError::UnknownAction(a.to_string()))
            }
            _ => Ok(StepKind::Http),
        }
    }
}

impl ExecutionStep {
    pub fn kind(&self) -> Result<StepKind, PlanError> {
        self.action.parse()
    }

    /// The payload, `null` when none is declared.
    pub fn payload(&self) -> &Value {
        self.payload.as_ref().unwrap_or(&NO_PAYLOAD)
    }

    /// Guard declaration carried in the payload, if any.
    pub fn guard_declaration(&self) -> Option<&Value> {
        self.payload().get("guard").filter(|g| g.is_object())
    }
}

/// Snapshot of the source state the planner built the plan against.
///
/// Before the first step the executor re-reads `url` (GET) and compares the
/// stable hash of the response, or of the value at `json_path`, with
/// `expected_hash`. A mismatch denies the run with `PRESTATE_STALE`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrestateCheck {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    pub expected_hash: String,
}

impl PrestateCheck {
    pub const STEP_ID: &'static str = "prestate";

    /// The read that fetches the current state.
    pub fn read_step(&self) -> ExecutionStep {
        ExecutionStep {
            step_id: Self::STEP_ID.to_string(),
            action: default_action(),
            adapter: Adapter::WebhookAdapter,
            method: HttpMethod::Get,
            url: self.url.clone(),
            headers: self.headers.clone(),
            payload: None,
            expects: Expectations { http_status: vec![200], json_paths_present: Vec::new() },
            idempotency_key: None,
            timeout_ms: None,
            requires_approval: false,
        }
    }

    /// Stable hash of the observed state, `None` when `json_path` is absent.
    pub fn fingerprint(&self, response: &Value) -> Option<String> {
        match &self.json_path {
            Some(path) => json_path::resolve(response, path).map(stable_hash),
            None => Some(stable_hash(response)),
        }
    }
}

/// A step together with the phase it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct PlannedStep<'a> {
    pub phase_id: Option<&'a str>,
    pub step: &'a ExecutionStep,
}

impl ExecutionPlan {
    /// Stable hash of the plan document as received.
    pub fn plan_hash(&self) -> String {
        stable_hash(&self.source)
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
        self.patch_source("dry_run", Value::Bool(dry_run));
    }

    pub fn set_execution_id(&mut self, execution_id: impl Into<String>) {
        self.execution_id = execution_id.into();
        self.patch_source("execution_id", Value::String(self.execution_id.clone()));
    }

    fn patch_source(&mut self, field: &str, value: Value) {
        if let Value::Object(map) = &mut self.source {
            map.insert(field.to_string(), value);
        }
    }

    /// Steps in execution order; phases are flattened in declared order.
    pub fn ordered_steps(&self) -> Vec<PlannedStep<'_>> {
        if let Some(phases) = self.phases.as_ref().filter(|p| !p.is_empty()) {
            return phases
                .iter()
                .flat_map(|phase| {
                    phase.steps.iter().map(move |step| PlannedStep {
                        phase_id: Some(phase.phase_id.as_str()),
                        step,
                    })
                })
                .collect();
        }
        self.steps
            .iter()
            .flatten()
            .map(|step| PlannedStep { phase_id: None, step })
            .collect()
    }

    /// Structural checks the executor re-applies on entry.
    pub fn validate(&self) -> Result<(), PlanError> {
        let has_steps = self.steps.as_ref().is_some_and(|s| !s.is_empty());
        let has_phases = self.phases.as_ref().is_some_and(|p| !p.is_empty());
        if has_steps == has_phases {
            return Err(PlanError::StepsXorPhases);
        }

        let mut seen = HashSet::new();
        for planned in self.ordered_steps() {
            let step = planned.step;
            if step.step_id.trim().is_empty() {
                return Err(PlanError::EmptyStepId(step.action.clone()));
            }
            if !seen.insert(step.step_id.as_str()) {
                return Err(PlanError::DuplicateStepId(step.step_id.clone()));
            }
            if step.expects.http_status.is_empty() {
                return Err(PlanError::EmptyExpectedStatus(step.step_id.clone()));
            }
            step.kind()?;
        }
        Ok(())
    }

    pub fn env_secret_names(&self) -> impl Iterator<Item = &str> {
        self.required_secrets
            .iter()
            .filter(|s| s.source == SecretSource::Env)
            .map(|s| s.name.as_str())
    }
}
