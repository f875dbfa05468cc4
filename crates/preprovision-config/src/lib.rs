// crates/preprovision-config/src/lib.rs
// ============================================================================
// Module: Preprovision Config
// Description: Canonical configuration model for the preprovision hooks.
// Purpose: Load, normalize, and validate plugin configuration in one place.
// Dependencies: serde, thiserror, toml, url
// ============================================================================

//! ## Overview
//! This crate owns the configuration model consumed by the preprovision gate
//! and its CLI. Configuration is loaded from TOML with strict input guards
//! (path length, file size, UTF-8) and validated before use.
//! Invariants:
//! - A loaded [`PreprovisionConfig`] has always passed [`PreprovisionConfig::validate`].
//! - The approval deadline is clamped, never rejected; see [`clamp_max_delay`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AllowListConfig;
pub use config::ApprovalConfig;
pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::DEFAULT_CONFIG_NAME;
pub use config::DEFAULT_DENIAL_CODE;
pub use config::DEFAULT_DENIAL_MESSAGE;
pub use config::DEFAULT_MAX_DELAY;
pub use config::DEFAULT_USER_AGENT;
pub use config::LogLevel;
pub use config::LogSinkKind;
pub use config::LoggingConfig;
pub use config::MAX_CONFIG_FILE_BYTES;
pub use config::MAX_DELAY_CEILING_MS;
pub use config::PackageFilterConfig;
pub use config::PreprovisionConfig;
pub use config::clamp_max_delay;
