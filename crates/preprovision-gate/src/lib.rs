// crates/preprovision-gate/src/lib.rs
// ============================================================================
// Module: Preprovision Gate
// Description: Admission hooks that run before a provisioning request proceeds.
// Purpose: Bound external approval checks in time and fail open on ambiguity.
// Dependencies: preprovision-config, reqwest, serde, tokio
// ============================================================================

//! ## Overview
//! This crate ships the preprovision hooks invoked ahead of resource creation:
//! the external approval gate ([`ApprovalGate`]) and the HVM package prefix
//! filter ([`PackageFilter`]). Both implement [`PreprovisionHook`].
//! Invariants:
//! - Every approval check resolves exactly once, within the configured deadline.
//! - Only an explicit 402/403 from the approval authority denies a request.
//! - Each check keeps its last [`AUDIT_RING_CAPACITY`] log records in memory.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod allow_list;
pub mod approval;
pub mod audit;
pub mod authority;
pub mod correlation;
pub mod hook;
pub mod packages;
pub mod ring;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use allow_list::AllowList;
pub use allow_list::AllowListMatch;
pub use approval::AllowReason;
pub use approval::ApprovalGate;
pub use approval::CheckReport;
pub use approval::CheckRequest;
pub use approval::Denial;
pub use approval::GateConfig;
pub use approval::GateError;
pub use approval::Outcome;
pub use audit::AUDIT_RING_CAPACITY;
pub use audit::AuditTrail;
pub use audit::CheckContext;
pub use audit::CheckLogger;
pub use audit::FileLogSink;
pub use audit::LogRecord;
pub use audit::LogSink;
pub use audit::Logger;
pub use audit::MemoryLogSink;
pub use audit::NoopLogSink;
pub use audit::StderrLogSink;
pub use authority::ApprovalAuthority;
pub use authority::ApprovalResponse;
pub use authority::AuthorityError;
pub use authority::HttpApprovalAuthority;
pub use hook::AccountRef;
pub use hook::ImageRef;
pub use hook::PackageRef;
pub use hook::PreprovisionHook;
pub use hook::ProvisionError;
pub use hook::ProvisionRequest;
pub use packages::PackageFilter;
pub use preprovision_config::LogLevel;
pub use ring::RingBuffer;
