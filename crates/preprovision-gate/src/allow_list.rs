// crates/preprovision-gate/src/allow_list.rs
// ============================================================================
// Module: Approval Allow-List
// Description: Read-only set of principals that bypass the remote check.
// Purpose: Short-circuit approval for pre-approved principals.
// Dependencies: preprovision-config
// ============================================================================

//! ## Overview
//! Presence of a principal id is sufficient to bypass the approval authority.
//! The expected display name only corroborates the entry for logging: a
//! mismatch still bypasses but is reported so stale entries get noticed.

use std::collections::BTreeMap;

use preprovision_config::AllowListConfig;

/// Result of screening a principal against the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowListMatch<'a> {
    /// Principal is not listed; the remote check must run.
    NotListed,
    /// Principal is listed and the display name matches (or none is expected).
    Listed,
    /// Principal is listed but the display name differs from the expected one.
    NameMismatch {
        /// Display name recorded in the allow-list.
        expected: &'a str,
    },
}

impl AllowListMatch<'_> {
    /// Returns true when the remote check is bypassed.
    #[must_use]
    pub const fn bypasses(&self) -> bool {
        !matches!(self, Self::NotListed)
    }
}

/// Read-only allow-list built at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    /// Principal id to optional expected display name.
    entries: BTreeMap<String, Option<String>>,
}

impl AllowList {
    /// Builds an allow-list from normalized entries.
    #[must_use]
    pub const fn new(entries: BTreeMap<String, Option<String>>) -> Self {
        Self {
            entries,
        }
    }

    /// Returns the number of listed principals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no principal is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Screens a principal and its optional display name.
    #[must_use]
    pub fn screen(&self, principal_id: &str, display_name: Option<&str>) -> AllowListMatch<'_> {
        match self.entries.get(principal_id) {
            None => AllowListMatch::NotListed,
            Some(None) => AllowListMatch::Listed,
            Some(Some(expected)) if Some(expected.as_str()) == display_name => {
                AllowListMatch::Listed
            }
            Some(Some(expected)) => AllowListMatch::NameMismatch {
                expected,
            },
        }
    }
}

impl From<&AllowListConfig> for AllowList {
    fn from(config: &AllowListConfig) -> Self {
        Self::new(config.entries())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
