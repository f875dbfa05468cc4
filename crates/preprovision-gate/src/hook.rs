// crates/preprovision-gate/src/hook.rs
// ============================================================================
// Module: Preprovision Hook Contract
// Description: Request and error types shared by all preprovision hooks.
// Purpose: Define the single-resolution contract the provisioning pipeline calls.
// Dependencies: async-trait, serde, thiserror
// ============================================================================

//! ## Overview
//! A preprovision hook receives the provisioning request and resolves once:
//! `Ok(())` lets the request proceed, `Err(ProvisionError)` stops it with a
//! user-visible code and message.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Request Types
// ============================================================================

/// Account that owns the provisioning request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    /// Opaque account identifier.
    pub id: String,
    /// Account login, used for logging only.
    #[serde(default)]
    pub login: Option<String>,
}

/// Image selected for the new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Image type (`zvol` for hardware-virtualized instances).
    #[serde(rename = "type")]
    pub image_type: String,
}

/// Package selected for the new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    /// Package name.
    pub name: String,
}

/// Provisioning request handed to each hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Requesting account.
    pub account: AccountRef,
    /// Image, when the request carries one.
    #[serde(default)]
    pub image: Option<ImageRef>,
    /// Package, when the request carries one.
    #[serde(default)]
    pub package: Option<PackageRef>,
}

impl ProvisionRequest {
    /// Builds a request for an account with no image or package.
    #[must_use]
    pub fn for_account(id: impl Into<String>, login: Option<String>) -> Self {
        Self {
            account: AccountRef {
                id: id.into(),
                login,
            },
            image: None,
            package: None,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Error code for package prefix denials.
pub const INVALID_PACKAGE_CODE: &str = "InvalidPackage";

/// User-visible provisioning denials.
///
/// # Invariants
/// - Variants are stable for error classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    /// The approval authority refused the account.
    #[error("{code}: {message}")]
    NotAuthorized {
        /// Configured denial code.
        code: String,
        /// Configured denial message.
        message: String,
    },
    /// The package may not be used for the requested image type.
    #[error("{message}")]
    InvalidPackage {
        /// Human-readable reason.
        message: String,
    },
}

impl ProvisionError {
    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::NotAuthorized {
                code, ..
            } => code,
            Self::InvalidPackage {
                ..
            } => INVALID_PACKAGE_CODE,
        }
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::NotAuthorized {
                message, ..
            }
            | Self::InvalidPackage {
                message,
            } => message,
        }
    }
}

// ============================================================================
// SECTION: Hook Trait
// ============================================================================

/// Hook consulted before a provisioning request proceeds.
#[async_trait]
pub trait PreprovisionHook: Send + Sync {
    /// Returns a stable hook name for logging.
    fn name(&self) -> &'static str;

    /// Decides whether the request may proceed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the request must not proceed.
    async fn allow_provision(&self, request: &ProvisionRequest) -> Result<(), ProvisionError>;
}
