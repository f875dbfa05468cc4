// crates/preprovision-gate/src/authority.rs
// ============================================================================
// Module: Approval Authority
// Description: Transport to the remote approval service.
// Purpose: Issue one bounded, non-retried GET per approval check.
// Dependencies: async-trait, reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! An [`ApprovalAuthority`] answers "may this principal provision?" with the
//! raw HTTP status. Interpretation of the status belongs to the gate; the
//! authority only reports what came back. [`HttpApprovalAuthority`] calls
//! `GET <base>/approval/<principal>` with connect and request timeouts equal
//! to the gate deadline and redirects disabled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::redirect::Policy;
use serde_json::Value;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum approval response body retained for logging.
pub const MAX_APPROVAL_BODY_BYTES: usize = 64 * 1024;

// ============================================================================
// SECTION: Public Types
// ============================================================================

/// Response received from the approval authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Parsed JSON body, when present, small enough, and well-formed.
    pub body: Option<Value>,
}

/// Approval authority transport failures.
///
/// # Invariants
/// - Variants are stable for error classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    /// Approval URL could not be built for the principal.
    #[error("invalid approval url: {0}")]
    InvalidUrl(String),
    /// Request failed before a response arrived.
    #[error("approval transport failed: {0}")]
    Transport(String),
}

/// Remote approval authority interface.
#[async_trait]
pub trait ApprovalAuthority: Send + Sync {
    /// Requests approval for a principal.
    ///
    /// `Ok(None)` reports a completed exchange that produced no response.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError`] when the request fails in transport.
    async fn request_approval(
        &self,
        principal_id: &str,
    ) -> Result<Option<ApprovalResponse>, AuthorityError>;
}

// ============================================================================
// SECTION: HTTP Authority
// ============================================================================

/// HTTP approval authority backed by a shared reqwest client.
///
/// # Invariants
/// - `base_url` can be a base (has path segments).
/// - The client never follows redirects.
pub struct HttpApprovalAuthority {
    /// Approval service base URL.
    base_url: Url,
    /// HTTP client configured with timeouts; shared across checks.
    client: Client,
}

impl HttpApprovalAuthority {
    /// Builds an authority whose connect and request timeouts equal `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError`] when the URL cannot be a base or the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: Url,
        user_agent: &str,
        deadline: Duration,
    ) -> Result<Self, AuthorityError> {
        if base_url.cannot_be_a_base() {
            return Err(AuthorityError::InvalidUrl(format!("{base_url} cannot be a base")));
        }
        let client = Client::builder()
            .connect_timeout(deadline)
            .timeout(deadline)
            .user_agent(user_agent.to_string())
            .redirect(Policy::none())
            .build()
            .map_err(|err| AuthorityError::Transport(err.to_string()))?;
        Ok(Self {
            base_url,
            client,
        })
    }

    /// Returns `<base>/approval/<principal>` with the principal as one segment.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::InvalidUrl`] when the base has no path segments.
    pub fn approval_url(&self, principal_id: &str) -> Result<Url, AuthorityError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                AuthorityError::InvalidUrl(format!("{} cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .push("approval")
            .push(principal_id);
        Ok(url)
    }
}

#[async_trait]
impl ApprovalAuthority for HttpApprovalAuthority {
    async fn request_approval(
        &self,
        principal_id: &str,
    ) -> Result<Option<ApprovalResponse>, AuthorityError> {
        let url = self.approval_url(principal_id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| AuthorityError::Transport(err.to_string()))?;
        let status = response.status();
        let body = read_json_body(response).await;
        Ok(Some(ApprovalResponse {
            status,
            body,
        }))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads the response body as JSON, dropping it when oversized or malformed.
async fn read_json_body(mut response: Response) -> Option<Value> {
    let max_bytes = u64::try_from(MAX_APPROVAL_BODY_BYTES).ok()?;
    if response.content_length().is_some_and(|len| len > max_bytes) {
        return None;
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.ok()? {
        if body.len().saturating_add(chunk.len()) > MAX_APPROVAL_BODY_BYTES {
            return None;
        }
        body.extend_from_slice(&chunk);
    }
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice(&body).ok()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
