// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod credits;
pub mod engine;
pub mod handlers;
pub mod plan_executor;
pub mod repository_factory;
pub mod scheduler;
pub mod step_executor;

pub use credits::{CreditEnforcer, CreditError, CreditStatus};
pub use engine::{Engine, JobRun, PlanRun};
pub use plan_executor::{PlanExecutor, RunOptions};
pub use scheduler::{BeginRunError, RunTicket, SchedulerDecisionEngine};
pub use step_executor::{StepDispatcher, StepExecutor, StepOutcome};
