// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Audit Codes
//!
//! Denial and failure codes that appear in run logs, decision traces and
//! ledger lines. These strings are part of the audit contract: renaming one
//! requires bumping [`AUDIT_CONTRACT_VERSION`].

pub const AUDIT_CONTRACT_VERSION: &str = "1";

/// Wall-clock ceiling for a whole plan run was exceeded.
pub const POLICY_MAX_RUNTIME_MS: &str = "POLICY_MAX_RUNTIME_MS";

/// Daily credit-unit budget would be exceeded by this run.
pub const CREDITS_DAILY_BUDGET_UNITS_EXCEEDED: &str = "CREDITS_DAILY_BUDGET_UNITS_EXCEEDED";

/// The source state no longer matches the snapshot the plan was built on.
pub const PRESTATE_STALE: &str = "PRESTATE_STALE";
/// The source state could not be read back before the first step.
pub const PRESTATE_UNAVAILABLE: &str = "PRESTATE_UNAVAILABLE";

pub const MISSING_REQUIRED_SECRETS: &str = "MISSING_REQUIRED_SECRETS";
pub const PLAN_INVALID: &str = "PLAN_INVALID";
pub const APPROVAL_REQUIRED: &str = "APPROVAL_REQUIRED";

// Step-level failure codes
pub const STEP_TIMEOUT: &str = "STEP_TIMEOUT";
pub const UNEXPECTED_HTTP_STATUS: &str = "UNEXPECTED_HTTP_STATUS";
pub const MISSING_JSON_PATHS: &str = "MISSING_JSON_PATHS";
pub const GUARD_BLOCKED: &str = "GUARD_BLOCKED";
pub const GUARD_SPEC_INVALID: &str = "GUARD_SPEC_INVALID";
pub const IDEMPOTENCY_IN_FLIGHT: &str = "IDEMPOTENCY_IN_FLIGHT";
pub const IDEMPOTENCY_PERSISTENCE: &str = "IDEMPOTENCY_PERSISTENCE";
pub const BROWSER_L0_ACTION_NOT_PERMITTED: &str = "BROWSER_L0_ACTION_NOT_PERMITTED";
pub const STEP_PAYLOAD_INVALID: &str = "STEP_PAYLOAD_INVALID";
