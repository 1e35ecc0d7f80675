// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Guard Evaluator
//!
//! Pure pre-acceptance checks on a step's output. A step opts in by carrying a
//! `guard` object in its payload:
//!
//! ```json
//! {
//!   "mode": "CODE_IS_SOURCE",
//!   "strict": true,
//!   "rendered_prompt": "Extract invoice ids from:\n<pinned input>",
//!   "pinned_input_text": "<pinned input>",
//!   "pinned_input_hash": "<sha256 of pinned input>",
//!   "pinned_code": {"ops": [{"op": "regex", "pattern": "INV-\\d+"}]}
//! }
//! ```
//!
//! | Mode | Accepts the output when |
//! |------|-------------------------|
//! | `CODE_IS_SOURCE` | re-running `pinned_code` on the pinned input reproduces it |
//! | `GROUNDED_OUTPUT` | every extracted claim occurs in `grounding_text` as a whole-word run |
//!
//! Both modes first check that the pinned input matches its hash and is
//! embedded in the rendered prompt. With `strict = false` every finding is a
//! warning and the run completes; with `strict = true` any finding blocks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::hashing::sha256_hex;
use crate::domain::pinned_code::PinnedProgram;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardMode {
    CodeIsSource,
    GroundedOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardSpec {
    pub mode: GuardMode,
    #[serde(default)]
    pub strict: bool,
    #[serde(alias = "renderedPrompt")]
    pub rendered_prompt: String,
    #[serde(alias = "pinnedInputText")]
    pub pinned_input_text: String,
    #[serde(alias = "pinnedInputHash")]
    pub pinned_input_hash: String,
    #[serde(default, alias = "pinnedCode", skip_serializing_if = "Option::is_none")]
    pub pinned_code: Option<PinnedProgram>,
    #[serde(default, alias = "groundingText", skip_serializing_if = "Option::is_none")]
    pub grounding_text: Option<String>,
}

impl GuardSpec {
    pub fn from_declaration(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardRunStatus {
    Completed,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardFinding {
    pub code: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardResult {
    pub mode: GuardMode,
    pub strict: bool,
    pub run_status: GuardRunStatus,
    pub errors: Vec<GuardFinding>,
}

impl GuardResult {
    pub fn blocked(&self) -> bool {
        self.run_status == GuardRunStatus::Blocked
    }
}

pub const PINNED_INPUT_HASH_MISMATCH: &str = "PINNED_INPUT_HASH_MISMATCH";
pub const PROMPT_MISSING_PINNED_INPUT: &str = "PROMPT_MISSING_PINNED_INPUT";
pub const PINNED_CODE_MISSING: &str = "PINNED_CODE_MISSING";
pub const PINNED_CODE_FAILED: &str = "PINNED_CODE_FAILED";
pub const OUTPUT_NOT_REPRODUCIBLE: &str = "OUTPUT_NOT_REPRODUCIBLE";
pub const GROUNDING_TEXT_MISSING: &str = "GROUNDING_TEXT_MISSING";
pub const UNGROUNDED_CLAIM: &str = "UNGROUNDED_CLAIM";
pub const NO_CLAIMS: &str = "NO_CLAIMS";

fn normalize_hash(hash: &str) -> String {
    let hash = hash.trim();
    hash.strip_prefix("sha256:").unwrap_or(hash).to_ascii_lowercase()
}

/// Lowercased alphanumeric words; punctuation and whitespace separate them.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `claim` occurs in `grounding` as a contiguous run of whole words.
fn is_grounded(claim: &[String], grounding: &[String]) -> bool {
    grounding.windows(claim.len()).any(|window| window == claim)
}

/// `output` field if the step returned one, else the whole response.
fn produced_output(step_output: &Value) -> &Value {
    step_output.get("output").unwrap_or(step_output)
}

fn outputs_match(expected: &Value, actual: &Value) -> bool {
    if expected == actual {
        return true;
    }
    match (expected, actual) {
        (Value::String(e), Value::String(a)) => e.trim() == a.trim(),
        // Adapter returned the structured output as a JSON string.
        (e, Value::String(a)) => serde_json::from_str::<Value>(a).is_ok_and(|parsed| &parsed == e),
        _ => false,
    }
}

fn collect_string_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_string_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_string_leaves(v, out)),
        _ => {}
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?', '\n'])
        .map(str::to_string)
        .collect()
}

/// Claims made by a step output: an explicit `claims` array, else the
/// sentences of a string output, else every string leaf.
fn extract_claims(step_output: &Value) -> Vec<String> {
    if let Some(Value::Array(claims)) = step_output.get("claims") {
        return claims
            .iter()
            .filter_map(|c| match c {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o
                    .get("text")
                    .or_else(|| o.get("claim"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect();
    }
    match produced_output(step_output) {
        Value::String(text) => split_sentences(text),
        other => {
            let mut leaves = Vec::new();
            collect_string_leaves(other, &mut leaves);
            leaves
        }
    }
}

/// Evaluate `spec` against a step's output.
pub fn evaluate(spec: &GuardSpec, step_output: &Value) -> GuardResult {
    let mut violations: Vec<(&'static str, String)> = Vec::new();

    let actual_hash = sha256_hex(spec.pinned_input_text.as_bytes());
    if normalize_hash(&spec.pinned_input_hash) != actual_hash {
        violations.push((
            PINNED_INPUT_HASH_MISMATCH,
            format!("pinned_input_hash does not match sha256(pinned_input_text) = {actual_hash}"),
        ));
    }
    let pinned = spec.pinned_input_text.trim();
    if !pinned.is_empty() && !spec.rendered_prompt.contains(pinned) {
        violations.push((
            PROMPT_MISSING_PINNED_INPUT,
            "rendered prompt does not embed the pinned input".to_string(),
        ));
    }

    match spec.mode {
        GuardMode::CodeIsSource => match &spec.pinned_code {
            None => violations.push((PINNED_CODE_MISSING, "CODE_IS_SOURCE requires pinned_code".to_string())),
            Some(program) => match program.run(&spec.pinned_input_text) {
                Err(e) => violations.push((PINNED_CODE_FAILED, format!("pinned code failed: {e}"))),
                Ok(expected) => {
                    let actual = produced_output(step_output);
                    if !outputs_match(&expected, actual) {
                        violations.push((
                            OUTPUT_NOT_REPRODUCIBLE,
                            format!("step output {actual} differs from pinned code output {expected}"),
                        ));
                    }
                }
            },
        },
        GuardMode::GroundedOutput => match spec.grounding_text.as_deref() {
            None => violations.push((
                GROUNDING_TEXT_MISSING,
                "GROUNDED_OUTPUT requires grounding_text".to_string(),
            )),
            Some(grounding) => {
                let grounding = words(grounding);
                let mut checked = 0;
                for claim in extract_claims(step_output) {
                    let claim_words = words(&claim);
                    if claim_words.is_empty() {
                        continue;
                    }
                    checked += 1;
                    if !is_grounded(&claim_words, &grounding) {
                        violations.push((UNGROUNDED_CLAIM, format!("claim not found in grounding text: {}", claim.trim())));
                    }
                }
                if checked == 0 {
                    violations.push((NO_CLAIMS, "step output makes no checkable claim".to_string()));
                }
            }
        },
    }

    let severity = if spec.strict { Severity::Error } else { Severity::Warning };
    let run_status = if spec.strict && !violations.is_empty() {
        GuardRunStatus::Blocked
    } else {
        GuardRunStatus::Completed
    };
    GuardResult {
        mode: spec.mode,
        strict: spec.strict,
        run_status,
        errors: violations
            .into_iter()
            .map(|(code, message)| GuardFinding { code: code.to_string(), message, severity })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const INPUT: &str = "Paid INV-7 and INV-9.";

    fn code_spec(strict: bool) -> GuardSpec {
        GuardSpec::from_declaration(&json!({
            "mode": "CODE_IS_SOURCE",
            "strict": strict,
            "rendered_prompt": format!("List invoices in:\n{INPUT}"),
            "pinned_input_text": INPUT,
            "pinned_input_hash": sha256_hex(INPUT),
            "pinned_code": {"ops": [{"op": "regex", "pattern": "INV-\\d+"}]}
        }))
        .unwrap()
    }

    #[test]
    fn test_code_is_source_accepts_reproducible_output() {
        let result = evaluate(&code_spec(true), &json!({"output": ["INV-7", "INV-9"]}));
        assert_eq!(result.run_status, GuardRunStatus::Completed);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_code_is_source_blocks_on_mismatch_when_strict() {
        let result = evaluate(&code_spec(true), &json!({"output": ["INV-7", "INV-10"]}));
        assert!(result.blocked());
        assert_eq!(result.errors[0].code, OUTPUT_NOT_REPRODUCIBLE);
        assert_eq!(result.errors[0].severity, Severity::Error);
    }

    #[test]
    fn test_non_strict_downgrades_to_warning() {
        let result = evaluate(&code_spec(false), &json!({"output": ["nope"]}));
        assert_eq!(result.run_status, GuardRunStatus::Completed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].severity, Severity::Warning);
    }

    #[test]
    fn test_pinned_input_integrity() {
        let mut spec = code_spec(true);
        spec.pinned_input_hash = "sha256:".to_string() + &sha256_hex(INPUT).to_uppercase();
        assert!(!evaluate(&spec, &json!({"output": ["INV-7", "INV-9"]})).blocked());

        spec.pinned_input_hash = sha256_hex("something else");
        spec.rendered_prompt = "no input here".into();
        let result = evaluate(&spec, &json!({"output": ["INV-7", "INV-9"]}));
        let codes: Vec<_> = result.errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec![PINNED_INPUT_HASH_MISMATCH, PROMPT_MISSING_PINNED_INPUT]);
    }

    #[test]
    fn test_grounded_output() {
        let grounding = "The contract renews on March 1. Payment terms are net 30.";
        let spec = GuardSpec::from_declaration(&json!({
            "mode": "GROUNDED_OUTPUT",
            "strict": true,
            "renderedPrompt": format!("Summarize: {grounding}"),
            "pinnedInputText": grounding,
            "pinnedInputHash": sha256_hex(grounding),
            "groundingText": grounding
        }))
        .unwrap();

        let ok = evaluate(&spec, &json!({"claims": ["payment terms are  NET 30", {"text": "The contract renews on March 1."}]}));
        assert!(!ok.blocked(), "{:?}", ok.errors);

        let sentences = evaluate(&spec, &json!({"output": "The contract renews on March 1. It auto-cancels."}));
        assert!(sentences.blocked());
        assert_eq!(sentences.errors.len(), 1);
        assert_eq!(sentences.errors[0].code, UNGROUNDED_CLAIM);
    }

    fn grounded_spec(grounding: &str, strict: bool) -> GuardSpec {
        GuardSpec::from_declaration(&json!({
            "mode": "GROUNDED_OUTPUT",
            "strict": strict,
            "rendered_prompt": format!("Summarize: {grounding}"),
            "pinned_input_text": grounding,
            "pinned_input_hash": sha256_hex(grounding),
            "grounding_text": grounding
        }))
        .unwrap()
    }

    #[test]
    fn test_claims_match_whole_words_only() {
        let spec = grounded_spec("Payment terms are net 30. Invoice INV-12 is open.", false);

        let partial = evaluate(&spec, &json!({"claims": ["net 3", "INV-1"]}));
        assert!(!partial.blocked());
        let codes: Vec<_> = partial.errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec![UNGROUNDED_CLAIM, UNGROUNDED_CLAIM]);
        assert!(partial.errors.iter().all(|e| e.severity == Severity::Warning));

        let whole = evaluate(&spec, &json!({"claims": ["NET 30", "inv-12 is open"]}));
        assert!(whole.errors.is_empty(), "{:?}", whole.errors);
    }

    #[test]
    fn test_output_without_claims_is_flagged() {
        let spec = grounded_spec("The contract renews on March 1.", true);
        for output in [json!({"claims": []}), json!({"output": ""}), json!({"output": " ... "}), json!({})] {
            let result = evaluate(&spec, &output);
            assert!(result.blocked(), "{output}");
            assert_eq!(result.errors[0].code, NO_CLAIMS);
        }
    }

    #[test]
    fn test_missing_mode_inputs() {
        let mut spec = code_spec(true);
        spec.pinned_code = None;
        assert_eq!(evaluate(&spec, &json!({})).errors[0].code, PINNED_CODE_MISSING);

        spec.mode = GuardMode::GroundedOutput;
        assert_eq!(evaluate(&spec, &json!({})).errors[0].code, GROUNDING_TEXT_MISSING);
    }
}
