// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Execution plan JSON loader. `-` reads the plan from stdin.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

use crate::domain::plan::ExecutionPlan;

pub fn parse_plan(json: &str) -> Result<ExecutionPlan> {
    serde_json::from_str(json).context("Failed to parse execution plan JSON")
}

pub fn load_plan(path: impl AsRef<Path>) -> Result<ExecutionPlan> {
    let path = path.as_ref();
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("Failed to read plan from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read plan: {}", path.display()))?
    };
    parse_plan(&raw).with_context(|| format!("Invalid plan: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_adapter_is_rejected() {
        let err = parse_plan(
            r#"{"execution_id":"e","threadId":"t","goal":"g","steps":[{"step_id":"a","adapter":"FtpAdapter","method":"GET","url":"http://x","expects":{"http_status":[200]}}]}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("FtpAdapter"));
    }

    #[test]
    fn test_loads_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{"execution_id":"e","threadId":"t","goal":"g","dry_run":true,"steps":[{"step_id":"a","adapter":"WebhookAdapter","method":"GET","url":"http://x","expects":{"http_status":[200]}}]}"#,
        )
        .unwrap();
        let plan = load_plan(&path).unwrap();
        assert!(plan.dry_run);
        assert_eq!(plan.ordered_steps().len(), 1);
    }
}
