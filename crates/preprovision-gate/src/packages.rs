// crates/preprovision-gate/src/packages.rs
// ============================================================================
// Module: HVM Package Filter
// Description: Rejects disallowed package prefixes for hardware-virtualized images.
// Purpose: Keep HVM instances off package families that cannot host them.
// Dependencies: preprovision-config
// ============================================================================

//! ## Overview
//! The filter only applies when the request carries a `zvol` image and a
//! package; any other request passes untouched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use preprovision_config::PackageFilterConfig;
use serde_json::json;

use crate::audit::Logger;
use crate::hook::PreprovisionHook;
use crate::hook::ProvisionError;
use crate::hook::ProvisionRequest;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hook name and log component for the package filter.
pub const PACKAGE_FILTER_COMPONENT: &str = "hvm-disallowed-packages";
/// Image type of hardware-virtualized instances.
pub const HVM_IMAGE_TYPE: &str = "zvol";

// ============================================================================
// SECTION: Filter
// ============================================================================

/// Package prefix filter for HVM provisioning.
pub struct PackageFilter {
    /// Disallowed package name prefixes, checked in order.
    prefixes: Vec<String>,
    /// Component logger.
    logger: Logger,
}

impl PackageFilter {
    /// Builds a filter from configuration.
    #[must_use]
    pub fn new(config: &PackageFilterConfig, logger: &Logger) -> Self {
        Self {
            prefixes: config.package_prefixes.clone(),
            logger: logger.with_component(PACKAGE_FILTER_COMPONENT),
        }
    }

    /// Returns the first prefix that rejects the request, if any.
    #[must_use]
    pub fn matching_prefix(&self, request: &ProvisionRequest) -> Option<&str> {
        if self.prefixes.is_empty() {
            self.logger.debug("no package prefixes; allowing", json!({}));
            return None;
        }
        let Some(image) = &request.image else {
            self.logger.debug("no image on request; skipping checks", json!({}));
            return None;
        };
        if image.image_type != HVM_IMAGE_TYPE {
            self.logger.debug("not an hvm image; skipping checks", json!({}));
            return None;
        }
        let Some(package) = &request.package else {
            self.logger.debug("no package on request; skipping checks", json!({}));
            return None;
        };
        self.prefixes.iter().map(String::as_str).find(|prefix| {
            self.logger.debug("checking prefix", json!({"prefix": prefix}));
            package.name.starts_with(prefix)
        })
    }
}

#[async_trait]
impl PreprovisionHook for PackageFilter {
    fn name(&self) -> &'static str {
        PACKAGE_FILTER_COMPONENT
    }

    async fn allow_provision(&self, request: &ProvisionRequest) -> Result<(), ProvisionError> {
        let Some(prefix) = self.matching_prefix(request) else {
            return Ok(());
        };
        let name = request.package.as_ref().map_or("", |package| package.name.as_str());
        self.logger.info("package prefix disallowed", json!({"prefix": prefix, "package": name}));
        Err(ProvisionError::InvalidPackage {
            message: format!("HVM instances may not use \"{prefix}*\" packages: {name}"),
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
