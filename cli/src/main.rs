// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Sintra CLI
//!
//! The `sintra` binary drives the execution and governance engine from the
//! command line. Every command runs in-process against the configured state
//! directory; there is no daemon.
//!
//! ## Commands
//!
//! - `sintra plan run|validate|hash` - Execute or inspect a plan
//! - `sintra schedule decide|tick|run` - Scheduler decisions and job runs
//! - `sintra credits enforce|status` - Daily credit budget
//! - `sintra receipt verify` - Check a sealed run receipt
//! - `sintra config show|validate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

use commands::{ConfigCommand, CreditsCommand, PlanCommand, ReceiptCommand, ScheduleCommand};

/// Sintra - governed execution of agent plans
#[derive(Parser)]
#[command(name = "sintra")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "SINTRA_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SINTRA_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "SINTRA_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute and inspect plans
    #[command(name = "plan")]
    Plan {
        #[command(subcommand)]
        command: PlanCommand,
    },

    /// Scheduler decisions
    #[command(name = "schedule")]
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },

    /// Credit budget enforcement
    #[command(name = "credits")]
    Credits {
        #[command(subcommand)]
        command: CreditsCommand,
    },

    /// Run receipts
    #[command(name = "receipt")]
    Receipt {
        #[command(subcommand)]
        command: ReceiptCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json)?;

    match cli.command {
        Some(Commands::Plan { command }) => commands::plan::handle_command(command, cli.config).await,
        Some(Commands::Schedule { command }) => commands::schedule::handle_command(command, cli.config).await,
        Some(Commands::Credits { command }) => commands::credits::handle_command(command, cli.config).await,
        Some(Commands::Receipt { command }) => commands::receipt::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    // Logs go to stderr so command output stays pipeable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
