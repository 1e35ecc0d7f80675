// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: plans, receipts, policies and the storage contract.
//!
//! Everything here is deterministic given its inputs. I/O sits behind the
//! [`repository::StateStore`] trait and is implemented in `infrastructure`.

pub mod codes;
pub mod credits;
pub mod engine_config;
pub mod events;
pub mod expectations;
pub mod guard;
pub mod hashing;
pub mod idempotency;
pub mod json_path;
pub mod pinned_code;
pub mod plan;
pub mod repository;
pub mod run_log;
pub mod schedule;
pub mod scheduler;
pub mod secrets;
pub mod transport;
