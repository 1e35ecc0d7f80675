// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit_log;
pub mod event_bus;
pub mod http_transport;
pub mod job_registry;
pub mod plan_parser;
pub mod receipts;
pub mod repositories;
pub mod secrets;

pub use event_bus::{EngineEvent, EventBus};
pub use http_transport::ReqwestTransport;
pub use secrets::{EnvSecretResolver, StaticSecretResolver};
