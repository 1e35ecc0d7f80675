// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pinned Programs
//!
//! A pinned program is a small, deterministic pipeline of text/JSON transforms.
//! Analysis steps run one to produce their output, and the `CODE_IS_SOURCE`
//! guard re-runs the same program against the pinned input to prove that the
//! step output really came from it.
//!
//! ```json
//! {"ops": [{"op": "lines"}, {"op": "regex", "pattern": "INV-\\d+"}, {"op": "unique"}, {"op": "sort"}]}
//! ```
//!
//! Every op is total over its declared input type and fails with a
//! [`TransformError`] otherwise; no op reads the clock, the environment or the
//! network.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::hashing::sha256_hex;
use crate::domain::json_path;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("op `{op}` expects {expected}, got {actual}")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("invalid regex `{pattern}`: {message}")]
    InvalidRegex { pattern: String, message: String },
    #[error("input is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("path `{0}` not found")]
    PathNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    Trim,
    Lowercase,
    Uppercase,
    /// string -> array of non-empty trimmed lines
    Lines,
    /// string -> array of whitespace-separated words
    Words,
    /// string (or array of strings) -> array of all matches; capture group 1 if present
    Regex { pattern: String },
    ParseJson,
    JsonPath { path: String },
    Sort,
    Unique,
    Take { n: usize },
    Join {
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// array/string/object -> number of elements/chars/keys
    Count,
    Sha256,
}

fn default_separator() -> String {
    "\n".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedProgram {
    pub ops: Vec<TransformOp>,
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(op: &'static str, expected: &'static str, actual: &Value) -> TransformError {
    TransformError::TypeMismatch { op, expected, actual: type_name(actual) }
}

fn map_strings(
    op: &'static str,
    value: Value,
    f: impl Fn(&str) -> String,
) -> Result<Value, TransformError> {
    match value {
        Value::String(s) => Ok(Value::String(f(&s))),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(Value::String(f(&s))),
                other => Err(mismatch(op, "string", &other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Err(mismatch(op, "string or array of strings", &other)),
    }
}

fn sort_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TransformOp {
    fn apply(&self, value: Value) -> Result<Value, TransformError> {
        match self {
            TransformOp::Trim => map_strings("trim", value, |s| s.trim().to_string()),
            TransformOp::Lowercase => map_strings("lowercase", value, |s| s.to_lowercase()),
            TransformOp::Uppercase => map_strings("uppercase", value, |s| s.to_uppercase()),
            TransformOp::Lines => match value {
                Value::String(s) => Ok(Value::Array(
                    s.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(|l| Value::String(l.to_string()))
                        .collect(),
                )),
                other => Err(mismatch("lines", "string", &other)),
            },
            TransformOp::Words => match value {
                Value::String(s) => Ok(Value::Array(
                    s.split_whitespace().map(|w| Value::String(w.to_string())).collect(),
                )),
                other => Err(mismatch("words", "string", &other)),
            },
            TransformOp::Regex { pattern } => {
                let re = Regex::new(pattern).map_err(|e| TransformError::InvalidRegex {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                let haystacks: Vec<String> = match value {
                    Value::String(s) => vec![s],
                    Value::Array(items) => items
                        .into_iter()
                        .map(|item| match item {
                            Value::String(s) => Ok(s),
                            other => Err(mismatch("regex", "string", &other)),
                        })
                        .collect::<Result<_, _>>()?,
                    other => return Err(mismatch("regex", "string or array of strings", &other)),
                };
                let mut matches = Vec::new();
                for hay in &haystacks {
                    for caps in re.captures_iter(hay) {
                        let m = caps.get(1).or_else(|| caps.get(0));
                        if let Some(m) = m {
                            matches.push(Value::String(m.as_str().to_string()));
                        }
                    }
                }
                Ok(Value::Array(matches))
            }
            TransformOp::ParseJson => match value {
                Value::String(s) => {
                    serde_json::from_str(&s).map_err(|e| TransformError::InvalidJson(e.to_string()))
                }
                other => Err(mismatch("parse_json", "string", &other)),
            },
            TransformOp::JsonPath { path } => json_path::resolve(&value, path)
                .cloned()
                .ok_or_else(|| TransformError::PathNotFound(path.clone())),
            TransformOp::Sort => match value {
                Value::Array(mut items) => {
                    items.sort_by_key(sort_key);
                    Ok(Value::Array(items))
                }
                other => Err(mismatch("sort", "array", &other)),
            },
            TransformOp::Unique => match value {
                Value::Array(items) => {
                    let mut seen = Vec::with_capacity(items.len());
                    for item in items {
                        if !seen.contains(&item) {
                            seen.push(item);
                        }
                    }
                    Ok(Value::Array(seen))
                }
                other => Err(mismatch("unique", "array", &other)),
            },
            TransformOp::Take { n } => match value {
                Value::Array(items) => Ok(Value::Array(items.into_iter().take(*n).collect())),
                Value::String(s) => Ok(Value::String(s.chars().take(*n).collect())),
                other => Err(mismatch("take", "array or string", &other)),
            },
            TransformOp::Join { separator } => match value {
                Value::Array(items) => Ok(Value::String(
                    items.iter().map(sort_key).collect::<Vec<_>>().join(separator),
                )),
                other => Err(mismatch("join", "array", &other)),
            },
            TransformOp::Count => match value {
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Object(map) => Ok(Value::from(map.len())),
                other => Err(mismatch("count", "array, string or object", &other)),
            },
            TransformOp::Sha256 => match value {
                Value::String(s) => Ok(Value::String(sha256_hex(s.as_bytes()))),
                other => Ok(Value::String(sha256_hex(crate::domain::hashing::canonical_json(&other)))),
            },
        }
    }
}

impl PinnedProgram {
    pub fn new(ops: Vec<TransformOp>) -> Self {
        Self { ops }
    }

    /// Run the program over `input`, which starts as a JSON string.
    pub fn run(&self, input: &str) -> Result<Value, TransformError> {
        self.ops
            .iter()
            .try_fold(Value::String(input.to_string()), |value, op| op.apply(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_invoice_numbers() {
        let program: PinnedProgram = serde_json::from_value(json!({
            "ops": [
                {"op": "regex", "pattern": "INV-(\\d+)"},
                {"op": "unique"},
                {"op": "sort"}
            ]
        }))
        .unwrap();
        let out = program.run("paid INV-20 and INV-3, again INV-20").unwrap();
        assert_eq!(out, json!(["20", "3"]));
    }

    #[test]
    fn test_lines_count_and_join() {
        let program = PinnedProgram::new(vec![
            TransformOp::Lines,
            TransformOp::Lowercase,
            TransformOp::Take { n: 2 },
            TransformOp::Join { separator: "|".into() },
        ]);
        assert_eq!(program.run("  A \n\nB\nC").unwrap(), json!("a|b"));

        let count = PinnedProgram::new(vec![TransformOp::Words, TransformOp::Count]);
        assert_eq!(count.run("one two  three").unwrap(), json!(3));
    }

    #[test]
    fn test_json_path_over_parsed_input() {
        let program = PinnedProgram::new(vec![
            TransformOp::ParseJson,
            TransformOp::JsonPath { path: "items[1].name".into() },
        ]);
        assert_eq!(program.run(r#"{"items":[{"name":"a"},{"name":"b"}]}"#).unwrap(), json!("b"));
    }

    #[test]
    fn test_type_errors_are_reported() {
        let program = PinnedProgram::new(vec![TransformOp::Count, TransformOp::Lines]);
        assert_eq!(
            program.run("abc"),
            Err(TransformError::TypeMismatch { op: "lines", expected: "string", actual: "number" })
        );
        let bad = PinnedProgram::new(vec![TransformOp::Regex { pattern: "(".into() }]);
        assert!(matches!(bad.run("x"), Err(TransformError::InvalidRegex { .. })));
    }

    #[test]
    fn test_empty_program_is_identity() {
        assert_eq!(PinnedProgram::default().run("as-is").unwrap(), json!("as-is"));
    }
}
