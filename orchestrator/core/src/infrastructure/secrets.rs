// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Secret Resolvers
//!
//! Plans declare `required_secrets`; in this release every secret is read
//! from the process environment (loaded from `.env` by the CLI).
//! [`StaticSecretResolver`] backs tests and embedding callers that already
//! hold their credentials.

use std::collections::HashMap;

use crate::domain::secrets::SecretResolver;

/// Reads secrets from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticSecretResolver {
    secrets: HashMap<String, String>,
}

impl StaticSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

impl SecretResolver for StaticSecretResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        self.secrets.get(name).filter(|v| !v.trim().is_empty()).cloned()
    }
}
