// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete state stores and ledgers from the engine configuration,
//! keeping the domain layer free of backend choices.

use std::sync::Arc;

use crate::domain::credits::AuditLog;
use crate::domain::engine_config::{EngineConfigManifest, StorageBackendKind};
use crate::domain::repository::{SharedStateStore, StoreError};
use crate::infrastructure::audit_log::JsonlAuditLog;
use crate::infrastructure::repositories::{FileStateStore, InMemoryStateStore, SledStateStore};

/// Creates the main state store (idempotency records, scheduler state)
pub fn create_state_store(config: &EngineConfigManifest) -> Result<SharedStateStore, StoreError> {
    match config.spec.storage.backend {
        StorageBackendKind::File => Ok(Arc::new(FileStateStore::open(config.storage_path())?)),
        StorageBackendKind::Sled => Ok(Arc::new(SledStateStore::open(config.storage_path())?)),
        StorageBackendKind::Memory => Ok(Arc::new(InMemoryStateStore::new())),
    }
}

/// Creates the store holding daily credit entries.
///
/// The file backend keeps credits under their own directory so they can be
/// shared between engines that otherwise use separate stores.
pub fn create_credit_store(
    config: &EngineConfigManifest,
    main: &SharedStateStore,
) -> Result<SharedStateStore, StoreError> {
    match config.spec.storage.backend {
        StorageBackendKind::File => Ok(Arc::new(FileStateStore::open(config.credits_state_dir())?)),
        StorageBackendKind::Sled | StorageBackendKind::Memory => Ok(main.clone()),
    }
}

pub fn create_audit_log(config: &EngineConfigManifest) -> Arc<dyn AuditLog> {
    Arc::new(JsonlAuditLog::new(config.credits_ledger_dir()))
}
