// crates/preprovision-config/src/config.rs
// ============================================================================
// Module: Preprovision Configuration Model
// Description: TOML-backed configuration for logging and provisioning hooks.
// Purpose: Provide typed, validated configuration with fail-closed loading.
// Dependencies: serde, thiserror, toml, url
// ============================================================================

//! ## Overview
//! Configuration is split per hook: `[approval]` drives the external approval
//! gate, `[hvm_packages]` drives the package prefix filter, and `[logging]`
//! selects the structured log sink. Loading rejects oversized or non-UTF-8
//! input before parsing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable consulted when no config path is supplied.
pub const CONFIG_ENV_VAR: &str = "PREPROVISION_GATE_CONFIG";
/// Config file name used when neither a path nor the env var is supplied.
pub const DEFAULT_CONFIG_NAME: &str = "preprovision-gate.toml";
/// Maximum config file size in bytes.
pub const MAX_CONFIG_FILE_BYTES: u64 = 1024 * 1024;
/// Maximum total config path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum length of a single config path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Deadline used when `max_delay_ms` is absent or out of range.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
/// Exclusive upper bound for `max_delay_ms`.
pub const MAX_DELAY_CEILING_MS: f64 = 30_000.0;
/// Default denial code surfaced to callers.
pub const DEFAULT_DENIAL_CODE: &str = "PaymentMethodRequired";
/// Default denial message surfaced to callers.
pub const DEFAULT_DENIAL_MESSAGE: &str =
    "To be able to provision you must update your payment method.";
/// Default user agent for approval requests.
pub const DEFAULT_USER_AGENT: &str = "preprovision-gate/0.1";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation failures.
///
/// # Invariants
/// - Variants are stable for error classification.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file is not valid TOML for the model.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Config content violates a validation rule.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root configuration for the preprovision hooks.
///
/// # Invariants
/// - Hooks whose table is absent are disabled.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreprovisionConfig {
    /// Structured logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// External approval gate configuration.
    #[serde(default)]
    pub approval: Option<ApprovalConfig>,
    /// HVM package prefix filter configuration.
    #[serde(default)]
    pub hvm_packages: Option<PackageFilterConfig>,
}

impl PreprovisionConfig {
    /// Loads configuration from `path`, the [`CONFIG_ENV_VAR`] variable, or
    /// [`DEFAULT_CONFIG_NAME`], in that order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the path, file contents, or model are invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_config_path(path);
        validate_config_path(&resolved)?;
        let bytes = read_config_bytes(&resolved)?;
        let content = String::from_utf8(bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every configured section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.validate()?;
        if let Some(approval) = &self.approval {
            approval.validate()?;
        }
        if let Some(packages) = &self.hvm_packages {
            packages.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Severity of a structured log record.
///
/// # Invariants
/// - Ordering follows severity: `Trace < Debug < Info < Warn < Error`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Fine-grained tracing.
    Trace,
    /// Debug diagnostics.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Ignored failures worth a look.
    Warn,
    /// Failures that degraded a decision.
    Error,
}

/// Destination for forwarded log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `logging.path`.
    File,
    /// Records are discarded.
    None,
}

/// Structured logging configuration.
///
/// # Invariants
/// - `path` is required when `sink = "file"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level forwarded to the sink.
    #[serde(default)]
    pub level: LogLevel,
    /// Sink selection.
    #[serde(default)]
    pub sink: LogSinkKind,
    /// Log file path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl LoggingConfig {
    /// Validates sink settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the file sink has no path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sink == LogSinkKind::File {
            match &self.path {
                Some(path) if !path.as_os_str().is_empty() => {}
                _ => {
                    return Err(ConfigError::Invalid(
                        "logging.path is required for the file sink".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Approval Gate
// ============================================================================

/// Allow-list entries, either keyed by principal id with an expected display
/// name, or a bare list of principal ids.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AllowListConfig {
    /// Principal id mapped to the expected display name.
    Named(BTreeMap<String, String>),
    /// Principal ids with no expected display name.
    Ids(Vec<String>),
}

impl Default for AllowListConfig {
    fn default() -> Self {
        Self::Named(BTreeMap::new())
    }
}

impl AllowListConfig {
    /// Returns the normalized entries: principal id to optional expected name.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<String, Option<String>> {
        match self {
            Self::Named(map) => {
                map.iter().map(|(id, name)| (id.clone(), Some(name.clone()))).collect()
            }
            Self::Ids(ids) => ids.iter().map(|id| (id.clone(), None)).collect(),
        }
    }

    /// Returns the number of configured entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Named(map) => map.len(),
            Self::Ids(ids) => ids.len(),
        }
    }

    /// Returns true when no entries are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validates principal ids.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        let ids: Vec<&String> = match self {
            Self::Named(map) => map.keys().collect(),
            Self::Ids(ids) => ids.iter().collect(),
        };
        for id in ids {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "approval.allow_list principal id must be non-empty".to_string(),
                ));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "approval.allow_list contains duplicate principal id: {id}"
                )));
            }
        }
        Ok(())
    }
}

/// External approval gate configuration.
///
/// # Invariants
/// - `url` is an absolute `http` or `https` URL.
/// - `max_delay_ms` is clamped by [`ApprovalConfig::max_delay`], never rejected,
///   including when it is not a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalConfig {
    /// Base URL of the approval authority.
    pub url: String,
    /// Principals that bypass the remote check.
    pub allow_list: AllowListConfig,
    /// Maximum decision latency in milliseconds. Non-numeric values read as
    /// absent.
    #[serde(default, deserialize_with = "lenient_max_delay")]
    pub max_delay_ms: Option<f64>,
    /// Error code returned on denial.
    #[serde(default = "default_denial_code")]
    pub code: String,
    /// Error message returned on denial.
    #[serde(default = "default_denial_message")]
    pub message: String,
    /// User agent for approval requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ApprovalConfig {
    /// Builds a configuration with an empty allow-list and default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            allow_list: AllowListConfig::default(),
            max_delay_ms: None,
            code: default_denial_code(),
            message: default_denial_message(),
            user_agent: default_user_agent(),
        }
    }

    /// Returns the effective deadline for one approval check.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        clamp_max_delay(self.max_delay_ms)
    }

    /// Validates the approval settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("approval.url must be non-empty".to_string()));
        }
        let url = Url::parse(&self.url)
            .map_err(|err| ConfigError::Invalid(format!("approval.url is invalid: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid("approval.url must use http or https".to_string()));
        }
        if self.code.trim().is_empty() {
            return Err(ConfigError::Invalid("approval.code must be non-empty".to_string()));
        }
        if self.message.trim().is_empty() {
            return Err(ConfigError::Invalid("approval.message must be non-empty".to_string()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("approval.user_agent must be non-empty".to_string()));
        }
        self.allow_list.validate()
    }
}

/// Returns the effective approval deadline for a configured value.
///
/// Values that are absent, non-finite, not strictly positive, or not strictly
/// below [`MAX_DELAY_CEILING_MS`] fall back to [`DEFAULT_MAX_DELAY`].
/// Fractional milliseconds are truncated, with a floor of one millisecond.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Guarded to a finite value within [1, 30000)."
)]
pub fn clamp_max_delay(max_delay_ms: Option<f64>) -> Duration {
    match max_delay_ms {
        Some(ms) if ms.is_finite() && ms > 0.0 && ms < MAX_DELAY_CEILING_MS => {
            Duration::from_millis(ms.trunc().max(1.0) as u64)
        }
        _ => DEFAULT_MAX_DELAY,
    }
}

/// Reads `max_delay_ms`, mapping any non-numeric value to `None`.
#[allow(clippy::cast_precision_loss, reason = "Deadlines above 2^53 ms fall back anyway.")]
fn lenient_max_delay<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<toml::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(toml::Value::Float(ms)) => Some(ms),
        Some(toml::Value::Integer(ms)) => Some(ms as f64),
        _ => None,
    })
}

/// Serde default for [`ApprovalConfig::code`].
fn default_denial_code() -> String {
    DEFAULT_DENIAL_CODE.to_string()
}

/// Serde default for [`ApprovalConfig::message`].
fn default_denial_message() -> String {
    DEFAULT_DENIAL_MESSAGE.to_string()
}

/// Serde default for [`ApprovalConfig::user_agent`].
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

// ============================================================================
// SECTION: Package Filter
// ============================================================================

/// HVM package prefix filter configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageFilterConfig {
    /// Package name prefixes that HVM instances may not use.
    pub package_prefixes: Vec<String>,
}

impl PackageFilterConfig {
    /// Validates configured prefixes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a prefix is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.package_prefixes.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid(
                "hvm_packages.package_prefixes entries must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Loading Helpers
// ============================================================================

/// Resolves the config path from the argument, env var, or default name.
fn resolve_config_path(path: Option<&Path>) -> PathBuf {
    if let Some(path) = path {
        return path.to_path_buf();
    }
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_CONFIG_NAME),
    }
}

/// Rejects config paths that exceed length limits.
fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    if path.components().any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH)
    {
        return Err(ConfigError::Invalid("config path component too long".to_string()));
    }
    Ok(())
}

/// Reads the config file while enforcing [`MAX_CONFIG_FILE_BYTES`].
fn read_config_bytes(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let file = File::open(path)
        .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
    let metadata = file.metadata().map_err(|err| ConfigError::Io(err.to_string()))?;
    if metadata.len() > MAX_CONFIG_FILE_BYTES {
        return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
    }
    let mut bytes = Vec::new();
    file.take(MAX_CONFIG_FILE_BYTES.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| ConfigError::Io(err.to_string()))?;
    if u64::try_from(bytes.len()).map_or(true, |len| len > MAX_CONFIG_FILE_BYTES) {
        return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
    }
    Ok(bytes)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
