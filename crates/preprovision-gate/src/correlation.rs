// crates/preprovision-gate/src/correlation.rs
// ============================================================================
// Module: Check Correlation Ids
// Description: Per-check identifiers stamped on every log record of a check.
// Purpose: Tie forwarded log lines and audit rings back to one approval check.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! Ids have the form `<prefix>-<epoch>-<seq>`. The epoch is drawn once per
//! issuer so ids from different processes do not collide; the sequence
//! counts checks within the issuer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

// ============================================================================
// SECTION: Issuer
// ============================================================================

/// Issues correlation ids for approval checks.
///
/// # Invariants
/// - Ids from one issuer never repeat.
#[derive(Debug)]
pub struct CheckIdIssuer {
    /// Leading label of every id.
    prefix: &'static str,
    /// Random per-issuer epoch.
    epoch: u32,
    /// Sequence number of the next id.
    next: AtomicU64,
}

impl CheckIdIssuer {
    /// Creates an issuer with a fresh random epoch.
    #[must_use]
    pub fn new(prefix: &'static str) -> Self {
        Self::with_epoch(prefix, rand::random())
    }

    /// Creates an issuer with a fixed epoch.
    #[must_use]
    pub const fn with_epoch(prefix: &'static str, epoch: u32) -> Self {
        Self {
            prefix,
            epoch,
            next: AtomicU64::new(1),
        }
    }

    /// Returns the next id.
    #[must_use]
    pub fn issue(&self) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:08x}-{seq}", self.prefix, self.epoch)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
