// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Receipt commands
//!
//! Commands: verify

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use sintra_core::domain::run_log::ExecutionRunLog;
use sintra_core::infrastructure::receipts::{load_receipt, ReceiptStore};

use super::{load_config, paint_status};

#[derive(Subcommand)]
pub enum ReceiptCommand {
    /// Recompute a receipt's hash and compare it with the recorded one
    Verify {
        /// Receipt file
        #[arg(value_name = "FILE", required_unless_present = "execution_id")]
        file: Option<PathBuf>,

        /// Look the receipt up in the state directory instead
        #[arg(long, conflicts_with = "file")]
        execution_id: Option<String>,
    },
}

pub async fn handle_command(command: ReceiptCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ReceiptCommand::Verify { file, execution_id } => {
            let log: ExecutionRunLog = match (file, execution_id) {
                (Some(path), _) => load_receipt(&path)?,
                (None, Some(id)) => {
                    let config = load_config(config_override)?;
                    ReceiptStore::new(config.receipts_dir()).load(&id)?
                }
                (None, None) => anyhow::bail!("Pass a receipt file or --execution-id"),
            };

            log.verify_receipt()
                .with_context(|| format!("Receipt {} failed verification", log.execution_id))?;
            println!(
                "{} {} ({}, {} steps)",
                "✓ Receipt verified:".green(),
                log.execution_id,
                paint_status(log.status),
                log.steps.len()
            );
            Ok(())
        }
    }
}
