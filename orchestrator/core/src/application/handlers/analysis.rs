// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `analysis.*` steps, evaluated in-process with no network access.
//!
//! | Operation | Payload | Response |
//! |-----------|---------|----------|
//! | `transform` | `{input, ops: [TransformOp]}` | `{output}` |
//! | `hash` | `{input}` | `{sha256}` (raw bytes for strings, stable hash otherwise) |
//! | `extract` | `{input, paths: [..]}` | `{values: {path: value}, missing: [..]}` |
//!
//! Success reports status 200 so plans can keep a uniform `expects`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::application::step_executor::{StepContext, StepHandler, StepOutcome};
use crate::domain::codes::STEP_PAYLOAD_INVALID;
use crate::domain::hashing::{sha256_hex, stable_hash};
use crate::domain::json_path;
use crate::domain::pinned_code::{PinnedProgram, TransformOp};
use crate::domain::plan::{ExecutionStep, StepKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisHandler;

fn invalid(step: &ExecutionStep, message: impl std::fmt::Display) -> StepOutcome {
    StepOutcome::failure(format!("{STEP_PAYLOAD_INVALID}: {} {message}", step.action))
}

fn transform(step: &ExecutionStep) -> StepOutcome {
    let input = match step.payload().get("input") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => return invalid(step, "needs `input`"),
    };
    let ops: Vec<TransformOp> = match step.payload().get("ops").cloned().map(serde_json::from_value) {
        Some(Ok(ops)) => ops,
        Some(Err(e)) => return invalid(step, format!("has invalid `ops`: {e}")),
        None => return invalid(step, "needs `ops`"),
    };
    match PinnedProgram::new(ops).run(&input) {
        Ok(output) => StepOutcome::local(json!({ "output": output })),
        Err(e) => invalid(step, e),
    }
}

fn hash(step: &ExecutionStep) -> StepOutcome {
    let digest = match step.payload().get("input") {
        Some(Value::String(text)) => sha256_hex(text),
        Some(other) => stable_hash(other),
        None => return invalid(step, "needs `input`"),
    };
    StepOutcome::local(json!({ "sha256": digest }))
}

fn extract(step: &ExecutionStep) -> StepOutcome {
    let Some(input) = step.payload().get("input") else {
        return invalid(step, "needs `input`");
    };
    let Some(paths) = step.payload().get("paths").and_then(Value::as_array) else {
        return invalid(step, "needs `paths`");
    };

    let mut values = Map::new();
    let mut missing = Vec::new();
    for path in paths.iter().filter_map(Value::as_str) {
        match json_path::resolve(input, path) {
            Some(value) => {
                values.insert(path.to_string(), value.clone());
            }
            None => missing.push(path.to_string()),
        }
    }
    StepOutcome::local(json!({ "values": values, "missing": missing }))
}

#[async_trait]
impl StepHandler for AnalysisHandler {
    async fn handle(&self, _ctx: &StepContext, step: &ExecutionStep, kind: &StepKind) -> StepOutcome {
        let StepKind::Analysis { operation } = kind else {
            return invalid(step, "is not an analysis step");
        };
        match operation.as_str() {
            "transform" => transform(step),
            "hash" => hash(step),
            "extract" => extract(step),
            other => invalid(step, format!("uses unknown operation `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> StepContext {
        StepContext { execution_id: "e".into(), thread_id: "t".into(), plan_hash: "ph".into() }
    }

    fn step(action: &str, payload: Value) -> ExecutionStep {
        serde_json::from_value(json!({
            "step_id": "a1",
            "action": action,
            "adapter": "WebhookAdapter",
            "method": "POST",
            "url": "local://analysis",
            "payload": payload,
            "expects": {"http_status": [200]}
        }))
        .unwrap()
    }

    async fn run(s: &ExecutionStep) -> StepOutcome {
        AnalysisHandler.handle(&ctx(), s, &s.kind().unwrap()).await
    }

    #[tokio::test]
    async fn test_transform() {
        let s = step(
            "analysis.transform",
            json!({"input": "b\na\nb\n", "ops": [{"op": "lines"}, {"op": "unique"}, {"op": "sort"}]}),
        );
        let outcome = run(&s).await;
        assert!(outcome.ok);
        assert_eq!(outcome.status, Some(200));
        assert_eq!(outcome.response, json!({"output": ["a", "b"]}));
    }

    #[tokio::test]
    async fn test_extract_reports_missing_paths() {
        let s = step(
            "analysis.extract",
            json!({"input": {"data": {"items": [{"id": 3}]}}, "paths": ["data.items[0].id", "data.next"]}),
        );
        let outcome = run(&s).await;
        assert_eq!(outcome.response["values"]["data.items[0].id"], json!(3));
        assert_eq!(outcome.response["missing"], json!(["data.next"]));
    }

    #[tokio::test]
    async fn test_unknown_operation_and_bad_payload() {
        let outcome = run(&step("analysis.summarize", json!({}))).await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().starts_with(STEP_PAYLOAD_INVALID));

        let outcome = run(&step("analysis.transform", json!({"input": "x", "ops": [{"op": "explode"}]}))).await;
        assert!(outcome.error.unwrap().contains("invalid `ops`"));
    }

    #[tokio::test]
    async fn test_hash_of_string_is_raw_sha256() {
        let outcome = run(&step("analysis.hash", json!({"input": "abc"}))).await;
        assert_eq!(
            outcome.response["sha256"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
