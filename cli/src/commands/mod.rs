// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Sintra CLI

pub mod config;
pub mod credits;
pub mod plan;
pub mod receipt;
pub mod schedule;

pub use self::config::ConfigCommand;
pub use self::credits::CreditsCommand;
pub use self::plan::PlanCommand;
pub use self::receipt::ReceiptCommand;
pub use self::schedule::ScheduleCommand;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use sintra_core::application::Engine;
use sintra_core::domain::engine_config::EngineConfigManifest;
use sintra_core::domain::run_log::RunStatus;
use sintra_core::infrastructure::{EnvSecretResolver, ReqwestTransport};

/// Load, override and validate the engine configuration.
pub(crate) fn load_config(config_override: Option<PathBuf>) -> Result<EngineConfigManifest> {
    let config = EngineConfigManifest::load_or_default(config_override).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    debug!(
        state_dir = %config.spec.autonomy.state_dir.display(),
        backend = ?config.spec.storage.backend,
        "Configuration loaded"
    );
    Ok(config)
}

pub(crate) fn build_engine(config_override: Option<PathBuf>) -> Result<Engine> {
    let config = load_config(config_override)?;
    Engine::from_config(config, Arc::new(ReqwestTransport::new()), Arc::new(EnvSecretResolver))
}

/// `--at` as RFC 3339, defaulting to now.
pub(crate) fn parse_at(at: Option<&str>) -> Result<DateTime<Utc>> {
    match at {
        Some(raw) => Ok(DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid --at timestamp '{raw}', expected RFC 3339"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

pub(crate) fn paint_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Success => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
        RunStatus::Denied => status.as_str().red().bold(),
        RunStatus::AwaitingApproval | RunStatus::Running => status.as_str().yellow(),
    }
}
