// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Scheduler commands
//!
//! Commands: decide, tick, run

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use sintra_core::application::RunOptions;
use sintra_core::domain::scheduler::{JobDefinition, JobRegistry, SchedulerAction, SchedulerDecisionTrace};
use sintra_core::infrastructure::job_registry::load_job_registry;
use sintra_core::infrastructure::plan_parser::load_plan;

use super::{build_engine, parse_at, print_json};

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// Explain whether one job may run now
    Decide {
        /// Job registry YAML
        #[arg(long, env = "SINTRA_JOBS_PATH", value_name = "FILE")]
        registry: PathBuf,

        #[arg(long)]
        job: String,

        /// Evaluation instant (RFC 3339, default now)
        #[arg(long)]
        at: Option<String>,

        /// Treat as a manual trigger (skips the schedule gate)
        #[arg(long)]
        manual: bool,

        #[arg(long)]
        json: bool,
    },

    /// Decide every job in the registry
    Tick {
        #[arg(long, env = "SINTRA_JOBS_PATH", value_name = "FILE")]
        registry: PathBuf,

        #[arg(long)]
        at: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Decide, charge credits and execute a job's plan
    Run {
        #[arg(long, env = "SINTRA_JOBS_PATH", value_name = "FILE")]
        registry: PathBuf,

        #[arg(long)]
        job: String,

        /// Plan JSON to execute for the job
        #[arg(long, value_name = "FILE")]
        plan: PathBuf,

        #[arg(long)]
        manual: bool,

        /// Approve a gated step (repeatable)
        #[arg(long = "approve", value_name = "STEP_ID")]
        approve: Vec<String>,

        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: ScheduleCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ScheduleCommand::Decide { registry, job, at, manual, json } => {
            let registry = load_job_registry(&registry)?;
            let job = find_job(&registry, &job)?;
            let engine = build_engine(config_override)?;
            let trace = engine.scheduler().decide(job, parse_at(at.as_deref())?, manual).await;
            if json {
                print_json(&trace)
            } else {
                print_trace(&trace);
                Ok(())
            }
        }
        ScheduleCommand::Tick { registry, at, json } => {
            let registry = load_job_registry(&registry)?;
            let engine = build_engine(config_override)?;
            let traces = engine.scheduler().tick(&registry, parse_at(at.as_deref())?).await;
            if json {
                print_json(&traces)
            } else {
                traces.iter().for_each(print_trace);
                Ok(())
            }
        }
        ScheduleCommand::Run { registry, job, plan, manual, approve, json } => {
            let registry = load_job_registry(&registry)?;
            let job = find_job(&registry, &job)?;
            let plan = load_plan(&plan)?;
            let engine = build_engine(config_override)?;
            let options = RunOptions { approved_steps: approve.into_iter().collect(), auto_approve: false };

            let outcome = engine.run_job(job, &plan, chrono::Utc::now(), manual, options).await?;
            if json {
                return print_json(&serde_json::json!({
                    "decision": outcome.trace,
                    "ticket": outcome.ticket,
                    "credits_denied": outcome.credits_denied,
                    "run": outcome.run.as_ref().map(|r| &r.log),
                }));
            }
            print_trace(&outcome.trace);
            if let Some(denied) = &outcome.credits_denied {
                println!("  {} {}", "Credits denied:".red().bold(), denied.reason);
            }
            match &outcome.run {
                Some(run) => super::plan::print_summary(&run.log),
                None => println!("  {}", "No run started".dimmed()),
            }
            Ok(())
        }
    }
}

fn find_job<'a>(registry: &'a JobRegistry, job_id: &str) -> Result<&'a JobDefinition> {
    registry.get(job_id).with_context(|| format!("Job '{job_id}' is not in the registry"))
}

fn print_trace(trace: &SchedulerDecisionTrace) {
    let verdict = if trace.would_run { "RUN".green().bold() } else { "SKIP".yellow().bold() };
    let action = match trace.scheduler_action {
        SchedulerAction::Skip => "skip",
        SchedulerAction::RunThroughEngine => "run through engine",
    };
    println!("{verdict} {} [{}] {}", trace.job_id, trace.primary_reason.as_str(), action.dimmed());
    for reason in &trace.reasons {
        println!("  - {}: {}", reason.code.as_str(), reason.detail);
        println!("    {} {}", "to unblock:".dimmed(), reason.to_unblock);
    }
    if let Some(next) = trace.next_eligible_at {
        println!("  Next eligible: {}", next.to_rfc3339());
    }
    for warning in &trace.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
}
