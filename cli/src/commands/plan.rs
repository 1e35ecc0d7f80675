// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Plan commands
//!
//! Commands: run, validate, hash

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use sintra_core::application::engine::PlanRun;
use sintra_core::application::RunOptions;
use sintra_core::domain::events::ExecutionEvent;
use sintra_core::domain::plan::ExecutionPlan;
use sintra_core::domain::run_log::{ExecutionRunLog, RunStatus, StepStatus};
use sintra_core::infrastructure::plan_parser::load_plan;

use super::{build_engine, paint_status, print_json};

#[derive(Subcommand)]
pub enum PlanCommand {
    /// Execute a plan and save its receipt
    Run {
        /// Plan JSON file ("-" reads stdin)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Approve a gated step (repeatable)
        #[arg(long = "approve", value_name = "STEP_ID")]
        approve: Vec<String>,

        /// Approve every gated step
        #[arg(long)]
        auto_approve: bool,

        /// Force a dry run regardless of the plan
        #[arg(long)]
        dry_run: bool,

        /// Run under a newly generated execution id
        #[arg(long)]
        fresh_id: bool,

        /// Print the full run log as JSON
        #[arg(long)]
        json: bool,

        /// Stream step results to stderr while the plan runs
        #[arg(long)]
        watch: bool,
    },

    /// Check a plan's structure and step actions
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print a plan's stable hash
    Hash {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

pub async fn handle_command(command: PlanCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        PlanCommand::Run { file, approve, auto_approve, dry_run, fresh_id, json, watch } => {
            let mut plan = load_plan(&file)?;
            if dry_run {
                plan.set_dry_run(true);
            }
            if fresh_id {
                plan.set_execution_id(uuid::Uuid::new_v4().to_string());
            }
            let options = RunOptions { approved_steps: approve.into_iter().collect(), auto_approve };
            run(plan, options, config_override, json, watch).await
        }
        PlanCommand::Validate { file } => validate(file),
        PlanCommand::Hash { file } => {
            let plan = load_plan(&file)?;
            println!("{}", plan.plan_hash());
            Ok(())
        }
    }
}

async fn run(
    plan: ExecutionPlan,
    options: RunOptions,
    config_override: Option<PathBuf>,
    json: bool,
    watch: bool,
) -> Result<()> {
    let engine = build_engine(config_override)?;
    let watcher = watch.then(|| {
        let mut events = engine.event_bus().subscribe_execution(plan.execution_id.clone());
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    ExecutionEvent::StepFinished { step_id, status, http_status, duration_ms, replayed, .. } => {
                        let http = http_status.map(|s| s.to_string()).unwrap_or_else(|| "---".to_string());
                        let replay = if replayed { " replayed" } else { "" };
                        eprintln!("  {} {step_id} {status:?} {http} {duration_ms}ms{replay}", "→".cyan());
                    }
                    ExecutionEvent::RunFinished { .. } => break,
                    ExecutionEvent::RunStarted { .. } => {}
                }
            }
        })
    });

    let PlanRun { log, receipt_path } = engine.run_plan(&plan, &options).await?;
    if let Some(watcher) = watcher {
        let _ = watcher.await;
    }

    if json {
        print_json(&log)?;
    } else {
        print_summary(&log);
        if let Some(path) = &receipt_path {
            println!("  Receipt: {}", path.display());
        }
    }

    if matches!(log.status, RunStatus::Failed | RunStatus::Denied) {
        std::process::exit(1);
    }
    Ok(())
}

pub(crate) fn print_summary(log: &ExecutionRunLog) {
    println!("{} {} ({})", "Run".bold(), log.execution_id, paint_status(log.status));
    for step in &log.steps {
        let marker = match step.status {
            StepStatus::Success => "✓".green(),
            StepStatus::Failed => "✗".red(),
            StepStatus::Skipped => "-".dimmed(),
        };
        let http = step.http_status.map(|s| s.to_string()).unwrap_or_else(|| "---".to_string());
        let replay = match &step.idempotency {
            Some(trace) if trace.replayed => " (replayed)".dimmed().to_string(),
            _ => String::new(),
        };
        println!("  {marker} {} {} {http} {}ms{replay}", step.step_id, step.action, step.duration_ms);
        if let Some(error) = &step.error {
            println!("      {}", error.red());
        }
    }
    if let Some(denied) = &log.policy_denied {
        println!("  {} {}: {}", "Denied".red().bold(), denied.code, denied.reason);
    }
    if let Some(approval) = &log.approval_required {
        println!("  {} step {} ({})", "Awaiting approval:".yellow(), approval.step_id, approval.reason);
    }
    if !log.missing_secrets.is_empty() {
        println!("  {} {}", "Missing secrets:".red(), log.missing_secrets.join(", "));
    }
    if let Some(error) = &log.error {
        println!("  {} {}", "Error:".red(), error);
    }
    if let Some(hash) = &log.receipt_hash {
        println!("  Receipt hash: {}", hash.dimmed());
    }
}

fn validate(file: PathBuf) -> Result<()> {
    let plan = load_plan(&file)?;
    plan.validate().context("Plan validation failed")?;

    let steps = plan.ordered_steps();
    for planned in &steps {
        let kind = planned
            .step
            .kind()
            .with_context(|| format!("Step {} has an unsupported action", planned.step.step_id))?;
        println!("  {} {:?}", planned.step.step_id, kind);
    }
    println!("{}", format!("✓ Plan is valid ({} steps)", steps.len()).green());
    Ok(())
}
