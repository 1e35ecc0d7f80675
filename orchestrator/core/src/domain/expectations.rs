// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::json_path;
use crate::domain::plan::Expectations;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationReport {
    pub expected_http_status: Vec<u16>,
    pub http_status_ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_paths_checked: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_json_paths: Vec<String>,
}

impl ExpectationReport {
    pub fn passed(&self) -> bool {
        self.http_status_ok && self.missing_json_paths.is_empty()
    }
}

/// Check a step's HTTP status and response body against its declared expectations.
pub fn check(expects: &Expectations, http_status: Option<u16>, response: &Value) -> ExpectationReport {
    let http_status_ok = http_status.is_some_and(|s| expects.http_status.contains(&s));
    let missing_json_paths = expects
        .json_paths_present
        .iter()
        .filter(|path| !json_path::is_present(response, path))
        .cloned()
        .collect();

    ExpectationReport {
        expected_http_status: expects.http_status.clone(),
        http_status_ok,
        json_paths_checked: expects.json_paths_present.clone(),
        missing_json_paths,
    }
}
