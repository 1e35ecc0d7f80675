// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Credit commands
//!
//! Commands: enforce, status

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use super::{build_engine, parse_at, print_json};

#[derive(Subcommand)]
pub enum CreditsCommand {
    /// Charge one run against today's budget
    Enforce {
        #[arg(long)]
        thread_id: String,

        /// Command being charged, recorded in the audit line
        #[arg(long)]
        command: String,

        #[arg(long)]
        domain_id: Option<String>,

        /// Charge instant (RFC 3339, default now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Show today's usage
    Status {
        #[arg(long)]
        at: Option<String>,

        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: CreditsCommand, config_override: Option<PathBuf>) -> Result<()> {
    let engine = build_engine(config_override)?;
    match command {
        CreditsCommand::Enforce { thread_id, command, domain_id, at } => {
            let at = parse_at(at.as_deref())?;
            match engine.credits().enforce(at, &thread_id, &command, domain_id.as_deref()).await? {
                None => {
                    println!("{}", "✓ Credits admitted".green());
                    Ok(())
                }
                Some(denied) => {
                    println!("{} {}", denied.code.red().bold(), denied.reason);
                    std::process::exit(1);
                }
            }
        }
        CreditsCommand::Status { at, json } => {
            let status = engine.credits().status(parse_at(at.as_deref())?).await?;
            if json {
                return print_json(&status);
            }
            println!("{}", "Credits:".bold());
            println!("  Monitoring: {}", if status.monitor_enabled { "on" } else { "off" });
            println!("  Day (UTC): {}", status.day_key_utc);
            println!("  Used: {}", status.used_units_today);
            match (status.budget_units_per_day, status.remaining_units) {
                (Some(budget), Some(remaining)) => println!("  Budget: {budget} ({remaining} remaining)"),
                _ => println!("  Budget: {}", "(none, monitoring only)".dimmed()),
            }
            Ok(())
        }
    }
}
