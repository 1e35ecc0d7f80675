// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Engine Configuration Types
//
// Defines the configuration schema for a Sintra engine host, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Step executor timeouts and the plan runtime ceiling
// - Autonomy state directory and storage backend selection
// - Credit monitor budget and ledger locations
// - Idempotency ledger corruption policy
// - Logging settings
//
// The closed environment set (DEFAULT_STEP_TIMEOUT_MS, POLICY_MAX_RUNTIME_MS,
// AUTONOMY_STATE_DIR, CREDITS_*) is layered on top of the file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::idempotency::CorruptRecordPolicy;

pub const API_VERSION: &str = "sintra/v1";
pub const KIND: &str = "EngineConfig";

/// Top-level Kubernetes-style engine configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfigManifest {
    /// API version (must be "sintra/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "EngineConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: EngineConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfigSpec {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub autonomy: AutonomyConfig,

    #[serde(default)]
    pub credits: CreditsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    #[serde(default)]
    pub notion: NotionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Hard per-step timeout unless a step sets `timeout_ms`
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Wall-clock ceiling for a whole plan run, checked before each step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime_ms: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { default_step_timeout_ms: default_step_timeout_ms(), max_runtime_ms: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyConfig {
    /// Root for scheduler state, idempotency records and receipts
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self { state_dir: default_state_dir() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsConfig {
    #[serde(default = "default_true")]
    pub monitor_enabled: bool,

    /// No budget means monitoring-only: usage is counted, never denied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_budget_units: Option<u64>,

    #[serde(default = "default_units_per_run")]
    pub units_per_run: u64,

    /// Defaults to `<state_dir>/credits`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Defaults to the credits state dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_dir: Option<PathBuf>,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            monitor_enabled: true,
            daily_budget_units: None,
            units_per_run: default_units_per_run(),
            state_dir: None,
            ledger_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    File,
    Sled,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    /// Defaults to `<state_dir>/store` (file) or `<state_dir>/store.sled` (sled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default)]
    pub on_corrupt: CorruptRecordPolicy,

    #[serde(default = "default_stale_claim_after_ms")]
    pub stale_claim_after_ms: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self { on_corrupt: CorruptRecordPolicy::default(), stale_claim_after_ms: default_stale_claim_after_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    /// Environment variable holding the integration token
    #[serde(default = "default_notion_token_env")]
    pub token_env: String,

    #[serde(default = "default_notion_version")]
    pub api_version: String,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self { token_env: default_notion_token_env(), api_version: default_notion_version() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".sintra/state")
}

fn default_units_per_run() -> u64 {
    1
}

fn default_stale_claim_after_ms() -> u64 {
    600_000
}

fn default_notion_token_env() -> String {
    "NOTION_TOKEN".to_string()
}

fn default_notion_version() -> String {
    "2022-06-28".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for EngineConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "sintra-engine".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: EngineConfigSpec::default(),
        }
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl EngineConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SINTRA_CONFIG_PATH environment variable
    /// 2. ./sintra-config.yaml (working directory)
    /// 3. ~/.sintra/config.yaml (user home)
    /// 4. /etc/sintra/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SINTRA_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./sintra-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".sintra").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/sintra/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::debug!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply the process environment on top of the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup. Invalid values are warned
    /// about and ignored; an empty value clears optional settings.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let spec = &mut self.spec;

        if let Some(val) = lookup("DEFAULT_STEP_TIMEOUT_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => spec.executor.default_step_timeout_ms = ms,
                _ => tracing::warn!("Invalid value for DEFAULT_STEP_TIMEOUT_MS: '{}'. Ignoring.", val),
            }
        }

        if let Some(val) = lookup("POLICY_MAX_RUNTIME_MS") {
            match val.trim() {
                "" | "0" => spec.executor.max_runtime_ms = None,
                v => match v.parse::<u64>() {
                    Ok(ms) => spec.executor.max_runtime_ms = Some(ms),
                    Err(_) => tracing::warn!("Invalid value for POLICY_MAX_RUNTIME_MS: '{}'. Ignoring.", val),
                },
            }
        }

        if let Some(val) = lookup("AUTONOMY_STATE_DIR").filter(|v| !v.trim().is_empty()) {
            spec.autonomy.state_dir = PathBuf::from(val.trim());
        }

        if let Some(val) = lookup("CREDITS_MONITOR_ENABLED") {
            match parse_bool(&val) {
                Some(enabled) => spec.credits.monitor_enabled = enabled,
                None => tracing::warn!(
                    "Invalid value for CREDITS_MONITOR_ENABLED: '{}'. Expected true/false. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("CREDITS_DAILY_BUDGET_UNITS") {
            match val.trim() {
                "" => spec.credits.daily_budget_units = None,
                v => match v.parse::<u64>() {
                    Ok(units) => spec.credits.daily_budget_units = Some(units),
                    Err(_) => tracing::warn!("Invalid value for CREDITS_DAILY_BUDGET_UNITS: '{}'. Ignoring.", val),
                },
            }
        }

        if let Some(val) = lookup("CREDITS_UNITS_PER_RUN") {
            match val.trim().parse::<u64>() {
                Ok(units) if units > 0 => spec.credits.units_per_run = units,
                _ => tracing::warn!("Invalid value for CREDITS_UNITS_PER_RUN: '{}'. Ignoring.", val),
            }
        }

        if let Some(val) = lookup("CREDITS_STATE_DIR").filter(|v| !v.trim().is_empty()) {
            spec.credits.state_dir = Some(PathBuf::from(val.trim()));
        }

        if let Some(val) = lookup("CREDITS_LEDGER_DIR").filter(|v| !v.trim().is_empty()) {
            spec.credits.ledger_dir = Some(PathBuf::from(val.trim()));
        }
    }

    pub fn credits_state_dir(&self) -> PathBuf {
        self.spec
            .credits
            .state_dir
            .clone()
            .unwrap_or_else(|| self.spec.autonomy.state_dir.join("credits"))
    }

    pub fn credits_ledger_dir(&self) -> PathBuf {
        self.spec.credits.ledger_dir.clone().unwrap_or_else(|| self.credits_state_dir())
    }

    pub fn storage_path(&self) -> PathBuf {
        match (&self.spec.storage.path, self.spec.storage.backend) {
            (Some(path), _) => path.clone(),
            (None, StorageBackendKind::Sled) => self.spec.autonomy.state_dir.join("store.sled"),
            (None, _) => self.spec.autonomy.state_dir.join("store"),
        }
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.spec.autonomy.state_dir.join("receipts")
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.executor.default_step_timeout_ms == 0 {
            anyhow::bail!("spec.executor.default_step_timeout_ms must be greater than 0");
        }

        if self.spec.credits.units_per_run == 0 {
            anyhow::bail!("spec.credits.units_per_run must be greater than 0");
        }

        if self.spec.autonomy.state_dir.as_os_str().is_empty() {
            anyhow::bail!("spec.autonomy.state_dir cannot be empty");
        }

        if !matches!(self.spec.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("spec.logging.format must be 'text' or 'json', got '{}'", self.spec.logging.format);
        }

        if self.spec.notion.token_env.is_empty() {
            anyhow::bail!("spec.notion.token_env cannot be empty");
        }

        Ok(())
    }
}
