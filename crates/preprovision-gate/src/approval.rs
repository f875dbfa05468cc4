// crates/preprovision-gate/src/approval.rs
// ============================================================================
// Module: External Approval Gate
// Description: Time-bounded admission check against a remote approval authority.
// Purpose: Deny only on explicit refusal; allow on every other outcome.
// Dependencies: preprovision-config, serde_json, tokio
// ============================================================================

//! ## Overview
//! [`ApprovalGate::check`] screens the principal against the allow-list and,
//! when not listed, races one approval request against a deadline timer.
//! Both racers compete for a single-resolution slot holding a one-shot
//! sender: whichever claims it first decides the [`Outcome`], the other finds
//! the slot empty. A request that loses to the timer is still awaited in the
//! background so its late arrival can be recorded.
//!
//! Only HTTP 402 and 403 deny. Timeouts, transport failures, missing
//! responses, and unexpected statuses all allow, because an unavailable
//! approval service must never block provisioning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use preprovision_config::ApprovalConfig;
use preprovision_config::ConfigError;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use url::Url;

use crate::allow_list::AllowList;
use crate::allow_list::AllowListMatch;
use crate::audit::AuditTrail;
use crate::audit::CheckContext;
use crate::audit::CheckLogger;
use crate::audit::Logger;
use crate::authority::ApprovalAuthority;
use crate::authority::ApprovalResponse;
use crate::authority::AuthorityError;
use crate::authority::HttpApprovalAuthority;
use crate::correlation::CheckIdIssuer;
use crate::hook::PreprovisionHook;
use crate::hook::ProvisionError;
use crate::hook::ProvisionRequest;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hook name and log component for the approval gate.
pub const APPROVAL_COMPONENT: &str = "preprovision";
/// Prefix for correlation identifiers issued per check.
const CORRELATION_PREFIX: &str = "pp";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Approval gate construction failures.
///
/// # Invariants
/// - Variants are stable for error classification.
#[derive(Debug, Error)]
pub enum GateError {
    /// Configuration failed validation.
    #[error("invalid approval config: {0}")]
    Config(String),
    /// Approval authority could not be built.
    #[error("approval authority unavailable: {0}")]
    Authority(String),
}

impl From<ConfigError> for GateError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<AuthorityError> for GateError {
    fn from(err: AuthorityError) -> Self {
        Self::Authority(err.to_string())
    }
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Validated, immutable approval gate settings.
///
/// # Invariants
/// - `max_delay` lies strictly between zero and thirty seconds.
/// - `base_url` is an absolute `http`/`https` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Approval authority base URL.
    base_url: Url,
    /// Deadline for one remote check.
    max_delay: Duration,
    /// Principals that bypass the remote check.
    allow_list: AllowList,
    /// Denial surfaced on 402/403.
    denial: Denial,
    /// User agent for approval requests.
    user_agent: String,
}

impl GateConfig {
    /// Validates approval configuration and resolves the effective deadline.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] when validation fails.
    pub fn from_config(config: &ApprovalConfig) -> Result<Self, GateError> {
        config.validate()?;
        let base_url = Url::parse(&config.url)
            .map_err(|err| GateError::Config(format!("approval.url is invalid: {err}")))?;
        Ok(Self {
            base_url,
            max_delay: config.max_delay(),
            allow_list: AllowList::from(&config.allow_list),
            denial: Denial {
                code: config.code.clone(),
                message: config.message.clone(),
            },
            user_agent: config.user_agent.clone(),
        })
    }

    /// Returns the deadline for one remote check.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns the allow-list.
    #[must_use]
    pub const fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Returns the configured denial.
    #[must_use]
    pub const fn denial(&self) -> &Denial {
        &self.denial
    }
}

// ============================================================================
// SECTION: Check Types
// ============================================================================

/// Input for one approval check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    /// Principal (account) identifier.
    pub principal_id: String,
    /// Principal display name, used for logging only.
    pub principal_display_name: Option<String>,
}

impl CheckRequest {
    /// Builds a request for a principal with an optional display name.
    #[must_use]
    pub fn new(principal_id: impl Into<String>, principal_display_name: Option<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            principal_display_name,
        }
    }
}

impl From<&ProvisionRequest> for CheckRequest {
    fn from(request: &ProvisionRequest) -> Self {
        Self {
            principal_id: request.account.id.clone(),
            principal_display_name: request.account.login.clone(),
        }
    }
}

/// Fixed denial returned when the authority refuses a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    /// Configured error code.
    pub code: String,
    /// Configured error message.
    pub message: String,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Why a check allowed the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    /// Principal is on the allow-list.
    AllowListed,
    /// Authority answered with a 2xx status.
    Granted,
    /// Deadline elapsed before the authority answered.
    Timeout,
    /// Request failed in transport or produced no response.
    TransportFailure,
    /// Authority answered with a status that is neither 2xx nor 402/403.
    UnexpectedStatus(u16),
    /// Both racers went away without resolving (runtime shutdown).
    Interrupted,
}

impl AllowReason {
    /// Returns a stable label for the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllowListed => "allow_listed",
            Self::Granted => "granted",
            Self::Timeout => "timeout",
            Self::TransportFailure => "transport_failure",
            Self::UnexpectedStatus(_) => "unexpected_status",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Terminal decision of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Request may proceed.
    Allow(AllowReason),
    /// Request is refused.
    Deny(Denial),
}

impl Outcome {
    /// Returns true for [`Outcome::Allow`].
    #[must_use]
    pub const fn is_allow(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// Converts the outcome into the hook result.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotAuthorized`] for [`Outcome::Deny`].
    pub fn into_result(self) -> Result<(), ProvisionError> {
        match self {
            Self::Allow(_) => Ok(()),
            Self::Deny(denial) => Err(ProvisionError::NotAuthorized {
                code: denial.code,
                message: denial.message,
            }),
        }
    }
}

/// Outcome of one check plus its forensic context.
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// Terminal decision.
    pub outcome: Outcome,
    /// Correlation identifier stamped on every record of this check.
    pub correlation_id: String,
    /// In-memory record ring of this check.
    pub audit: AuditTrail,
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// External approval gate.
///
/// # Invariants
/// - Configuration is immutable after construction.
/// - The authority (and its connection pool) is shared by all checks.
pub struct ApprovalGate {
    /// Validated settings.
    config: Arc<GateConfig>,
    /// Remote approval authority.
    authority: Arc<dyn ApprovalAuthority>,
    /// Parent logger for per-check child loggers.
    logger: Logger,
    /// Correlation identifier source.
    correlation: CheckIdIssuer,
}

impl ApprovalGate {
    /// Builds a gate backed by the HTTP approval authority.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &ApprovalConfig, logger: &Logger) -> Result<Self, GateError> {
        let config = GateConfig::from_config(config)?;
        let authority = HttpApprovalAuthority::new(
            config.base_url.clone(),
            &config.user_agent,
            config.max_delay,
        )?;
        Ok(Self::with_authority(config, Arc::new(authority), logger))
    }

    /// Builds a gate with a caller-supplied authority.
    #[must_use]
    pub fn with_authority(
        config: GateConfig,
        authority: Arc<dyn ApprovalAuthority>,
        logger: &Logger,
    ) -> Self {
        Self {
            config: Arc::new(config),
            authority,
            logger: logger.with_component(APPROVAL_COMPONENT),
            correlation: CheckIdIssuer::new(CORRELATION_PREFIX),
        }
    }

    /// Runs one approval check; resolves exactly once within the deadline.
    pub async fn check(&self, request: &CheckRequest) -> CheckReport {
        let correlation_id = self.correlation.issue();
        let context = CheckContext {
            principal_id: request.principal_id.clone(),
            principal_name: request.principal_display_name.clone(),
            correlation_id: correlation_id.clone(),
        };
        let audit = AuditTrail::new();
        let logger = self.logger.child(context, audit.clone());

        logger.debug("external approval start", json!({}));

        let screened = self
            .config
            .allow_list
            .screen(&request.principal_id, request.principal_display_name.as_deref());
        let outcome = match screened {
            AllowListMatch::Listed => {
                logger.info("account in allow list; skipping checks", json!({}));
                Outcome::Allow(AllowReason::AllowListed)
            }
            AllowListMatch::NameMismatch {
                expected,
            } => {
                logger.warn(
                    "account in allow list, but login name did not match",
                    json!({
                        "allowListName": expected,
                        "login": request.principal_display_name,
                    }),
                );
                Outcome::Allow(AllowReason::AllowListed)
            }
            AllowListMatch::NotListed => self.check_remote(&request.principal_id, &logger).await,
        };

        CheckReport {
            outcome,
            correlation_id,
            audit,
        }
    }

    /// Races one approval request against the deadline timer.
    async fn check_remote(&self, principal_id: &str, logger: &CheckLogger) -> Outcome {
        let deadline = self.config.max_delay;
        let (sender, receiver) = oneshot::channel();
        let resolution = Arc::new(Resolution::new(sender));

        let timer = tokio::spawn(expire_after(deadline, Arc::clone(&resolution), logger.clone()));
        let remote = RemoteCheck {
            authority: Arc::clone(&self.authority),
            principal_id: principal_id.to_string(),
            denial: self.config.denial.clone(),
            deadline,
            logger: logger.clone(),
            resolution,
            timer: timer.abort_handle(),
        };
        tokio::spawn(remote.run());

        if let Ok(outcome) = receiver.await {
            outcome
        } else {
            logger.error("external approval abandoned before resolution (ignoring)", json!({}));
            Outcome::Allow(AllowReason::Interrupted)
        }
    }
}

#[async_trait]
impl PreprovisionHook for ApprovalGate {
    fn name(&self) -> &'static str {
        APPROVAL_COMPONENT
    }

    async fn allow_provision(&self, request: &ProvisionRequest) -> Result<(), ProvisionError> {
        self.check(&CheckRequest::from(request)).await.outcome.into_result()
    }
}

// ============================================================================
// SECTION: Race Plumbing
// ============================================================================

/// Single-resolution slot shared by the timer and the remote request.
///
/// # Invariants
/// - At most one caller of [`Resolution::claim`] receives the sender.
struct Resolution {
    /// Sender for the caller's one-shot receiver; taken by the winner.
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl Resolution {
    /// Creates a slot holding `sender`.
    const fn new(sender: oneshot::Sender<Outcome>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Takes the sender; `None` means the other racer already won.
    fn claim(&self) -> Option<oneshot::Sender<Outcome>> {
        match self.sender.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Fails the check open once the deadline elapses.
async fn expire_after(deadline: Duration, resolution: Arc<Resolution>, logger: CheckLogger) {
    tokio::time::sleep(deadline).await;
    let Some(sender) = resolution.claim() else {
        return;
    };
    logger.error(
        "external approval aborted due to timeout (ignoring)",
        json!({"maxDelayMs": duration_ms(deadline)}),
    );
    let _ = sender.send(Outcome::Allow(AllowReason::Timeout));
}

/// Remote half of the race.
struct RemoteCheck {
    /// Authority to consult.
    authority: Arc<dyn ApprovalAuthority>,
    /// Principal under check.
    principal_id: String,
    /// Denial surfaced on 402/403.
    denial: Denial,
    /// Deadline, for late-arrival records.
    deadline: Duration,
    /// Per-check logger.
    logger: CheckLogger,
    /// Shared resolution slot.
    resolution: Arc<Resolution>,
    /// Timer to cancel when the request wins.
    timer: AbortHandle,
}

impl RemoteCheck {
    /// Issues the request and resolves the check if the timer has not.
    async fn run(self) {
        let reply = self.authority.request_approval(&self.principal_id).await;
        self.logger.trace("external approval response", describe_reply(&reply));

        let Some(sender) = self.resolution.claim() else {
            let mut fields = describe_reply(&reply);
            if let Value::Object(map) = &mut fields {
                map.insert("maxDelayMs".to_string(), json!(duration_ms(self.deadline)));
            }
            self.logger.error("external approval check completed after timeout", fields);
            return;
        };
        self.timer.abort();
        let outcome = classify_reply(reply, &self.denial, &self.logger);
        let _ = sender.send(outcome);
    }
}

/// Maps an authority reply to an outcome, recording why.
fn classify_reply(
    reply: Result<Option<ApprovalResponse>, AuthorityError>,
    denial: &Denial,
    logger: &CheckLogger,
) -> Outcome {
    let response = match reply {
        Err(err) => {
            logger.warn(
                "external approval check failed (ignoring)",
                json!({"err": err.to_string()}),
            );
            return Outcome::Allow(AllowReason::TransportFailure);
        }
        Ok(None) => {
            logger.warn("external approval returned no response (ignoring)", json!({}));
            return Outcome::Allow(AllowReason::TransportFailure);
        }
        Ok(Some(response)) => response,
    };

    let status = response.status;
    if status == StatusCode::PAYMENT_REQUIRED || status == StatusCode::FORBIDDEN {
        logger.info(
            "approval check denied",
            json!({"statusCode": status.as_u16(), "error": denial.to_string()}),
        );
        return Outcome::Deny(denial.clone());
    }
    if status.is_success() {
        logger.info(
            "external approval check granted",
            json!({"statusCode": status.as_u16(), "obj": response.body}),
        );
        return Outcome::Allow(AllowReason::Granted);
    }
    logger.warn(
        "external approval unexpected response (ignoring)",
        json!({"statusCode": status.as_u16(), "obj": response.body}),
    );
    Outcome::Allow(AllowReason::UnexpectedStatus(status.as_u16()))
}

/// Summarizes an authority reply for log fields.
fn describe_reply(reply: &Result<Option<ApprovalResponse>, AuthorityError>) -> Value {
    match reply {
        Ok(Some(response)) => {
            json!({"statusCode": response.status.as_u16(), "obj": response.body})
        }
        Ok(None) => json!({"statusCode": null}),
        Err(err) => json!({"err": err.to_string()}),
    }
}

/// Converts a duration to whole milliseconds, saturating.
fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
