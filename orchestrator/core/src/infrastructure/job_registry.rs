// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Job Registry YAML Parser
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → `JobRegistry`
//!
//! # Manifest Format
//!
//! ```yaml
//! apiVersion: sintra/v1
//! kind: JobRegistry
//! jobs:
//!   - job_id: inbox-sync
//!     command: "sync the support inbox into Notion"
//!     mode: supervised
//!     schedule:
//!       type: cron
//!       cron: "*/15 * * * *"
//!       timezone: "+02:00"
//!     budgets:
//!       max_runs_per_day: 48
//!   - job_id: weekly-report
//!     command: "compile the weekly report"
//!     schedule: { type: manual }
//! ```
//!
//! `apiVersion`/`kind` are optional; a bare `jobs:` list is accepted.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::domain::engine_config::API_VERSION;
use crate::domain::scheduler::{JobDefinition, JobRegistry};

pub const KIND: &str = "JobRegistry";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobRegistryManifest {
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    jobs: Vec<JobDefinition>,
}

pub fn parse_job_registry(yaml: &str) -> Result<JobRegistry> {
    let manifest: JobRegistryManifest = serde_yaml::from_str(yaml).context("Failed to parse job registry YAML")?;

    if let Some(api_version) = manifest.api_version.as_deref() {
        if api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", api_version, API_VERSION);
        }
    }
    if let Some(kind) = manifest.kind.as_deref() {
        if kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", kind, KIND);
        }
    }

    Ok(JobRegistry::from_jobs(manifest.jobs)?)
}

pub fn load_job_registry(path: impl AsRef<Path>) -> Result<JobRegistry> {
    let path = path.as_ref();
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job registry: {}", path.display()))?;
    parse_job_registry(&yaml).with_context(|| format!("Invalid job registry: {}", path.display()))
}
