// crates/preprovision-gate/src/authority/tests.rs
// ============================================================================
// Module: Approval Authority Tests
// Description: Unit tests for approval URL construction.
// Purpose: Validate path joining and principal segment encoding.
// Dependencies: preprovision-gate
// ============================================================================

//! ## Overview
//! Checks that the approval path is appended as segments to the base URL.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use super::AuthorityError;
use super::HttpApprovalAuthority;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

fn authority_with_base(base_url: &str) -> HttpApprovalAuthority {
    HttpApprovalAuthority::new(
        Url::parse(base_url).expect("base url"),
        "preprovision-gate-tests",
        Duration::from_millis(250),
    )
    .expect("authority")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn approval_url_appends_segments() {
    let authority = authority_with_base("http://example.local");
    let url = authority.approval_url("acct-1").unwrap();
    assert_eq!(url.as_str(), "http://example.local/approval/acct-1");
}

#[test]
fn approval_url_handles_trailing_slash_and_prefix() {
    let authority = authority_with_base("https://example.local/api/");
    let url = authority.approval_url("acct-1").unwrap();
    assert_eq!(url.as_str(), "https://example.local/api/approval/acct-1");
}

#[test]
fn approval_url_encodes_principal_as_one_segment() {
    let authority = authority_with_base("http://example.local");
    let url = authority.approval_url("acct/../1 x").unwrap();
    assert_eq!(url.path(), "/approval/acct%2F..%2F1%20x");
}

#[test]
fn cannot_be_a_base_rejected() {
    let err = HttpApprovalAuthority::new(
        Url::parse("mailto:approval@example.local").unwrap(),
        "ua",
        Duration::from_millis(250),
    )
    .err()
    .expect("cannot-be-a-base url");
    assert!(matches!(err, AuthorityError::InvalidUrl(_)));
}
