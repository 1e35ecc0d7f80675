// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sintra Core
//!
//! Agent execution and governance engine: decides whether scheduled jobs may
//! run, executes approved plans with idempotency, guardrails and budgets, and
//! seals every run into a hashed receipt.
//!
//! # Architecture
//!
//! - **domain**: pure types, rules and the storage/transport traits
//! - **application**: executors, scheduler and credit services
//! - **infrastructure**: state store backends, HTTP, receipts, event bus

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
