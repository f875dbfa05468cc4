// crates/preprovision-gate/src/approval/tests.rs
// ============================================================================
// Module: Approval Gate Tests
// Description: Unit tests for the approval race and status mapping.
// Purpose: Validate single resolution, fail-open paths, and late arrivals.
// Dependencies: preprovision-gate, tokio
// ============================================================================

//! ## Overview
//! Drives the gate with a scripted authority on a paused clock so timer and
//! request ordering is deterministic.

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

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use preprovision_config::AllowListConfig;
use preprovision_config::ApprovalConfig;
use preprovision_config::LogLevel;
use reqwest::StatusCode;
use serde_json::json;

use super::AllowReason;
use super::ApprovalGate;
use super::CheckReport;
use super::CheckRequest;
use super::Denial;
use super::GateConfig;
use super::Outcome;
use crate::audit::Logger;
use crate::audit::MemoryLogSink;
use crate::authority::ApprovalAuthority;
use crate::authority::ApprovalResponse;
use crate::authority::AuthorityError;
use crate::hook::PreprovisionHook;
use crate::hook::ProvisionError;
use crate::hook::ProvisionRequest;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

const DEADLINE_MS: f64 = 1_000.0;

/// Authority that answers with a fixed reply after a fixed delay.
struct ScriptedAuthority {
    delay: Duration,
    reply: Result<Option<ApprovalResponse>, AuthorityError>,
    calls: AtomicUsize,
}

impl ScriptedAuthority {
    fn new(delay_ms: u64, reply: Result<Option<ApprovalResponse>, AuthorityError>) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(delay_ms),
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    fn status(delay_ms: u64, status: u16) -> Arc<Self> {
        Self::new(
            delay_ms,
            Ok(Some(ApprovalResponse {
                status: StatusCode::from_u16(status).unwrap(),
                body: Some(json!({"status": status})),
            })),
        )
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApprovalAuthority for ScriptedAuthority {
    async fn request_approval(
        &self,
        _principal_id: &str,
    ) -> Result<Option<ApprovalResponse>, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.reply.clone()
    }
}

fn approval_config() -> ApprovalConfig {
    let mut allow = BTreeMap::new();
    allow.insert("acct-vip".to_string(), "vip".to_string());
    let mut config = ApprovalConfig::new("http://approval.invalid");
    config.allow_list = AllowListConfig::Named(allow);
    config.max_delay_ms = Some(DEADLINE_MS);
    config.code = "PaymentRequired".to_string();
    config.message = "update billing".to_string();
    config
}

fn gate(authority: &Arc<ScriptedAuthority>) -> ApprovalGate {
    gate_with_logger(authority, &Logger::noop())
}

fn gate_with_logger(authority: &Arc<ScriptedAuthority>, logger: &Logger) -> ApprovalGate {
    let config = GateConfig::from_config(&approval_config()).unwrap();
    let authority: Arc<dyn ApprovalAuthority> = authority.clone();
    ApprovalGate::with_authority(config, authority, logger)
}

fn request(id: &str) -> CheckRequest {
    CheckRequest::new(id, Some("someone".to_string()))
}

fn messages(report: &CheckReport) -> Vec<&'static str> {
    report.audit.records().iter().map(|record| record.msg).collect()
}

fn has_record(report: &CheckReport, level: LogLevel, msg: &str) -> bool {
    report.audit.records().iter().any(|record| record.level == level && record.msg == msg)
}

fn expected_denial() -> Denial {
    Denial {
        code: "PaymentRequired".to_string(),
        message: "update billing".to_string(),
    }
}

// ============================================================================
// SECTION: Allow-List
// ============================================================================

#[tokio::test(start_paused = true)]
async fn allow_listed_principal_skips_remote_call() {
    let authority = ScriptedAuthority::status(10, 403);
    let report = gate(&authority).check(&CheckRequest::new("acct-vip", Some("vip".into()))).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::AllowListed));
    assert_eq!(authority.calls(), 0);
    assert!(has_record(&report, LogLevel::Info, "account in allow list; skipping checks"));
}

#[tokio::test(start_paused = true)]
async fn allow_listed_name_mismatch_allows_with_warning() {
    let authority = ScriptedAuthority::status(10, 403);
    let report =
        gate(&authority).check(&CheckRequest::new("acct-vip", Some("mallory".into()))).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::AllowListed));
    assert_eq!(authority.calls(), 0);
    let warning = report
        .audit
        .records()
        .into_iter()
        .find(|record| record.msg == "account in allow list, but login name did not match")
        .expect("mismatch record");
    assert_eq!(warning.level, LogLevel::Warn);
    assert_eq!(warning.fields["allowListName"], json!("vip"));
    assert_eq!(warning.fields["login"], json!("mallory"));
}

// ============================================================================
// SECTION: Status Mapping
// ============================================================================

#[tokio::test(start_paused = true)]
async fn payment_required_denies_with_configured_error() {
    let authority = ScriptedAuthority::status(50, 402);
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Deny(expected_denial()));
    assert!(has_record(&report, LogLevel::Info, "approval check denied"));
    let err = report.outcome.into_result().unwrap_err();
    assert_eq!(err.to_string(), "PaymentRequired: update billing");
}

#[tokio::test(start_paused = true)]
async fn forbidden_denies_regardless_of_body() {
    let authority = ScriptedAuthority::new(
        50,
        Ok(Some(ApprovalResponse {
            status: StatusCode::FORBIDDEN,
            body: None,
        })),
    );
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Deny(expected_denial()));
}

#[tokio::test(start_paused = true)]
async fn success_status_grants() {
    let authority = ScriptedAuthority::status(50, 200);
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::Granted));
    assert!(has_record(&report, LogLevel::Info, "external approval check granted"));
}

#[tokio::test(start_paused = true)]
async fn server_error_fails_open() {
    let authority = ScriptedAuthority::status(50, 500);
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::UnexpectedStatus(500)));
    let msg = "external approval unexpected response (ignoring)";
    assert!(has_record(&report, LogLevel::Warn, msg));
}

#[tokio::test(start_paused = true)]
async fn unauthorized_is_not_a_denial() {
    let authority = ScriptedAuthority::status(50, 401);
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::UnexpectedStatus(401)));
}

#[tokio::test(start_paused = true)]
async fn transport_error_fails_open() {
    let authority = ScriptedAuthority::new(
        50,
        Err(AuthorityError::Transport("connection refused".to_string())),
    );
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::TransportFailure));
    assert!(has_record(&report, LogLevel::Warn, "external approval check failed (ignoring)"));
}

#[tokio::test(start_paused = true)]
async fn missing_response_is_a_transport_failure() {
    let authority = ScriptedAuthority::new(50, Ok(None));
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::TransportFailure));
    assert!(report.audit.records().iter().any(|record| record.level == LogLevel::Warn));
}

// ============================================================================
// SECTION: Deadline Race
// ============================================================================

#[tokio::test(start_paused = true)]
async fn slow_authority_times_out_open() {
    let authority = ScriptedAuthority::status(5_000, 200);
    let started = tokio::time::Instant::now();
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::Timeout));
    assert!(started.elapsed() < Duration::from_millis(1_100));
    let timeout = report
        .audit
        .records()
        .into_iter()
        .find(|record| record.msg == "external approval aborted due to timeout (ignoring)")
        .expect("timeout record");
    assert_eq!(timeout.level, LogLevel::Error);
    assert_eq!(timeout.fields["maxDelayMs"], json!(1_000));
}

#[tokio::test(start_paused = true)]
async fn late_denial_is_logged_without_effect() {
    let authority = ScriptedAuthority::status(5_000, 402);
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::Timeout));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let msg = "external approval check completed after timeout";
    assert!(has_record(&report, LogLevel::Error, msg));
    assert!(!messages(&report).contains(&"approval check denied"));
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::Timeout));
}

#[tokio::test(start_paused = true)]
async fn late_transport_error_is_logged_without_effect() {
    let authority =
        ScriptedAuthority::new(5_000, Err(AuthorityError::Transport("reset".to_string())));
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::Timeout));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let late = report
        .audit
        .records()
        .into_iter()
        .find(|record| record.msg == "external approval check completed after timeout")
        .expect("late record");
    assert_eq!(late.fields["err"], json!("approval transport failed: reset"));
    assert!(!messages(&report).contains(&"external approval check failed (ignoring)"));
}

#[tokio::test(start_paused = true)]
async fn fast_reply_records_no_timeout() {
    let authority = ScriptedAuthority::status(100, 200);
    let report = gate(&authority).check(&request("acct-1")).await;
    assert_eq!(report.outcome, Outcome::Allow(AllowReason::Granted));

    tokio::time::sleep(Duration::from_secs(5)).await;
    let messages = messages(&report);
    assert!(!messages.contains(&"external approval aborted due to timeout (ignoring)"));
    assert!(!messages.contains(&"external approval check completed after timeout"));
}

#[tokio::test(start_paused = true)]
async fn each_check_issues_exactly_one_request() {
    let authority = ScriptedAuthority::status(5_000, 500);
    let gate = gate(&authority);
    let first = gate.check(&request("acct-1")).await;
    let second = gate.check(&request("acct-2")).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(authority.calls(), 2);
    assert_ne!(first.correlation_id, second.correlation_id);
}

// ============================================================================
// SECTION: Logging
// ============================================================================

#[tokio::test(start_paused = true)]
async fn sink_honors_level_while_trail_keeps_everything() {
    let sink = Arc::new(MemoryLogSink::new());
    let logger = Logger::new(sink.clone(), LogLevel::Warn, "test");
    let authority = ScriptedAuthority::status(50, 500);
    let report = gate_with_logger(&authority, &logger).check(&request("acct-1")).await;

    let trail = messages(&report);
    assert!(trail.contains(&"external approval start"));
    assert!(trail.contains(&"external approval response"));
    let forwarded = sink.records();
    assert!(forwarded.iter().all(|record| record.level >= LogLevel::Warn));
    assert!(forwarded.iter().all(|record| record.component == "preprovision"));
    let msg = "external approval unexpected response (ignoring)";
    assert!(forwarded.iter().any(|record| record.msg == msg));
}

#[tokio::test(start_paused = true)]
async fn records_carry_check_context() {
    let authority = ScriptedAuthority::status(50, 200);
    let report = gate(&authority).check(&request("acct-1")).await;
    assert!(report.correlation_id.starts_with("pp-"));
    for record in report.audit.records() {
        let context = record.check.expect("check context");
        assert_eq!(context.principal_id, "acct-1");
        assert_eq!(context.principal_name.as_deref(), Some("someone"));
        assert_eq!(context.correlation_id, report.correlation_id);
    }
}

#[tokio::test(start_paused = true)]
async fn denial_record_carries_formatted_error() {
    let authority = ScriptedAuthority::status(50, 402);
    let report = gate(&authority).check(&request("acct-1")).await;
    let denied = report
        .audit
        .records()
        .into_iter()
        .find(|record| record.msg == "approval check denied")
        .expect("denial record");
    assert_eq!(denied.fields["statusCode"], json!(402));
    assert_eq!(denied.fields["error"], json!("PaymentRequired: update billing"));
}

// ============================================================================
// SECTION: Hook Contract
// ============================================================================

#[tokio::test(start_paused = true)]
async fn hook_maps_denial_to_not_authorized() {
    let authority = ScriptedAuthority::status(50, 403);
    let gate = gate(&authority);
    assert_eq!(gate.name(), "preprovision");
    let err = gate
        .allow_provision(&ProvisionRequest::for_account("acct-1", None))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ProvisionError::NotAuthorized {
            code: "PaymentRequired".to_string(),
            message: "update billing".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn hook_allows_on_timeout() {
    let authority = ScriptedAuthority::status(5_000, 403);
    let request = ProvisionRequest::for_account("acct-1", None);
    let result = gate(&authority).allow_provision(&request).await;
    assert!(result.is_ok());
}

#[test]
fn gate_config_clamps_out_of_range_deadline() {
    let mut config = approval_config();
    config.max_delay_ms = Some(45_000.0);
    let gate_config = GateConfig::from_config(&config).unwrap();
    assert_eq!(gate_config.max_delay(), Duration::from_secs(10));
    assert_eq!(gate_config.allow_list().len(), 1);
    assert_eq!(gate_config.denial(), &expected_denial());
}

#[test]
fn gate_config_rejects_invalid_url() {
    let config = ApprovalConfig::new("not a url");
    assert!(GateConfig::from_config(&config).is_err());
}
