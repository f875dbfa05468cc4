// crates/preprovision-cli/src/main.rs
// ============================================================================
// Module: Preprovision Gate CLI Entry Point
// Description: Command dispatcher for config validation and ad-hoc checks.
// Purpose: Run the configured preprovision hooks against a single request.
// Dependencies: clap, preprovision-config, preprovision-gate, serde, tokio
// ============================================================================

//! ## Overview
//! `preprovision-gate check` runs the configured hooks in pipeline order (the
//! HVM package filter, then the external approval gate) and prints a JSON
//! decision. The process exits 0 when the request may proceed and 3 when a
//! hook denies it. `preprovision-gate config validate` loads and validates the
//! configuration without contacting anything.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use preprovision_config::PreprovisionConfig;
use preprovision_gate::ApprovalGate;
use preprovision_gate::AuditTrail;
use preprovision_gate::CheckRequest;
use preprovision_gate::ImageRef;
use preprovision_gate::Logger;
use preprovision_gate::Outcome;
use preprovision_gate::PackageFilter;
use preprovision_gate::PackageRef;
use preprovision_gate::PreprovisionHook;
use preprovision_gate::ProvisionError;
use preprovision_gate::ProvisionRequest;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Exit code reported when a hook denies the request.
const DENY_EXIT_CODE: u8 = 3;
/// Log component for CLI-level records.
const CLI_COMPONENT: &str = "preprovision-cli";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "preprovision-gate", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Run the configured preprovision hooks for one request.
    Check(CheckCommand),
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a preprovision gate configuration file.
    Validate(ConfigValidateCommand),
}

/// Arguments for config validation.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Optional config file path (defaults to preprovision-gate.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for a single preprovision check.
#[derive(Args, Debug)]
struct CheckCommand {
    /// Account identifier of the requester.
    #[arg(long, value_name = "ID")]
    account_id: String,
    /// Account login, used for allow-list corroboration and logging.
    #[arg(long, value_name = "NAME")]
    login: Option<String>,
    /// Image type of the new instance (`zvol` for HVM).
    #[arg(long, value_name = "TYPE")]
    image_type: Option<String>,
    /// Package name of the new instance.
    #[arg(long, value_name = "NAME")]
    package: Option<String>,
    /// Optional config file path (defaults to preprovision-gate.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Write the approval check's audit records to stderr as JSON lines.
    #[arg(long)]
    dump_audit: bool,
}

// ============================================================================
// SECTION: Decision Output
// ============================================================================

/// JSON decision printed by `check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Decision {
    /// `allow` or `deny`.
    decision: &'static str,
    /// Hook that produced the decision, when one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    hook: Option<&'static str>,
    /// Allow reason label from the approval gate.
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    /// Denial code.
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    /// Denial message.
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    /// Correlation identifier of the approval check.
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl Decision {
    /// Decision for a request no hook objected to.
    const fn allow(hook: Option<&'static str>, reason: Option<&'static str>) -> Self {
        Self {
            decision: "allow",
            hook,
            reason,
            code: None,
            message: None,
            correlation_id: None,
        }
    }

    /// Decision for a request refused by `hook`.
    fn deny(hook: &'static str, err: &ProvisionError) -> Self {
        Self {
            decision: "deny",
            hook: Some(hook),
            reason: None,
            code: Some(err.code().to_string()),
            message: Some(err.message().to_string()),
            correlation_id: None,
        }
    }

    /// Returns true when the request may proceed.
    fn is_allow(&self) -> bool {
        self.decision == "allow"
    }

    /// Maps the decision to the process exit code.
    fn exit_code(&self) -> ExitCode {
        if self.is_allow() { ExitCode::SUCCESS } else { ExitCode::from(DENY_EXIT_CODE) }
    }
}

/// Result of running every configured hook.
struct Evaluation {
    /// Final decision.
    decision: Decision,
    /// Audit ring of the approval check, when it ran.
    audit: Option<AuditTrail>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Config {
            command,
        } => match command {
            ConfigCommand::Validate(command) => command_config_validate(&command),
        },
        Commands::Check(command) => command_check(&command).await,
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes the config validate command.
fn command_config_validate(command: &ConfigValidateCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config.clone())?;
    let hooks = [
        config.hvm_packages.as_ref().map(|_| "hvm-disallowed-packages"),
        config.approval.as_ref().map(|_| "preprovision"),
    ];
    let enabled: Vec<&str> = hooks.into_iter().flatten().collect();
    let summary = if enabled.is_empty() { "none".to_string() } else { enabled.join(", ") };
    write_stdout_line(&format!("config ok (hooks: {summary})"))
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the check command.
async fn command_check(command: &CheckCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config.clone())?;
    let logger = Logger::from_config(&config.logging, CLI_COMPONENT)
        .map_err(|err| CliError::new(format!("failed to open log sink: {err}")))?;
    let request = build_request(command);
    let evaluation = evaluate(&config, &request, &logger).await?;

    if command.dump_audit
        && let Some(audit) = &evaluation.audit
    {
        dump_audit(audit)?;
    }
    let payload = serde_json::to_string(&evaluation.decision)
        .map_err(|err| CliError::new(format!("failed to encode decision: {err}")))?;
    write_stdout_line(&payload).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(evaluation.decision.exit_code())
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Loads and validates configuration.
fn load_config(path: Option<PathBuf>) -> CliResult<PreprovisionConfig> {
    PreprovisionConfig::load(path.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

/// Builds the provisioning request from command arguments.
fn build_request(command: &CheckCommand) -> ProvisionRequest {
    let mut request = ProvisionRequest::for_account(&command.account_id, command.login.clone());
    request.image = command.image_type.as_ref().map(|image_type| ImageRef {
        image_type: image_type.clone(),
    });
    request.package = command.package.as_ref().map(|name| PackageRef {
        name: name.clone(),
    });
    request
}

/// Runs configured hooks in pipeline order; the first denial wins.
async fn evaluate(
    config: &PreprovisionConfig,
    request: &ProvisionRequest,
    logger: &Logger,
) -> CliResult<Evaluation> {
    if let Some(packages) = &config.hvm_packages {
        let filter = PackageFilter::new(packages, logger);
        if let Err(err) = filter.allow_provision(request).await {
            return Ok(Evaluation {
                decision: Decision::deny(filter.name(), &err),
                audit: None,
            });
        }
    }

    let Some(approval) = &config.approval else {
        return Ok(Evaluation {
            decision: Decision::allow(None, None),
            audit: None,
        });
    };
    let gate = ApprovalGate::new(approval, logger)
        .map_err(|err| CliError::new(format!("failed to build approval gate: {err}")))?;
    let report = gate.check(&CheckRequest::from(request)).await;
    let mut decision = match report.outcome {
        Outcome::Allow(reason) => Decision::allow(Some(gate.name()), Some(reason.as_str())),
        Outcome::Deny(denial) => Decision::deny(
            gate.name(),
            &ProvisionError::NotAuthorized {
                code: denial.code,
                message: denial.message,
            },
        ),
    };
    decision.correlation_id = Some(report.correlation_id);
    Ok(Evaluation {
        decision,
        audit: Some(report.audit),
    })
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes audit records to stderr as JSON lines.
fn dump_audit(audit: &AuditTrail) -> CliResult<()> {
    for record in audit.records() {
        let line = serde_json::to_string(&record)
            .map_err(|err| CliError::new(format!("failed to encode audit record: {err}")))?;
        write_stderr_line(&line).map_err(|err| CliError::new(output_error("stderr", &err)))?;
    }
    Ok(())
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
