// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

/// Lookup of named secrets (plan `required_secrets`, adapter tokens).
///
/// A secret that is set but empty counts as missing.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

/// Names from `names` that do not resolve, in input order.
pub fn missing_secrets<'a>(resolver: &dyn SecretResolver, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| resolver.resolve(name).is_none())
        .map(str::to_string)
        .collect()
}
