// crates/preprovision-gate/src/audit.rs
// ============================================================================
// Module: Structured Logging and Audit Trail
// Description: Leveled log records, sinks, and per-check audit rings.
// Purpose: Emit JSON-line logs and keep recent check records for forensics.
// Dependencies: preprovision-config, serde, serde_json
// ============================================================================

//! ## Overview
//! [`Logger`] forwards leveled [`LogRecord`] values to a [`LogSink`]. Each
//! approval check derives a [`CheckLogger`] that tags records with the check's
//! [`CheckContext`] and writes every record, regardless of level, into a
//! per-check [`AuditTrail`] ring of [`AUDIT_RING_CAPACITY`] entries.
//! Audit rings are never persisted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use preprovision_config::LogLevel;
use preprovision_config::LogSinkKind;
use preprovision_config::LoggingConfig;
use serde::Serialize;
use serde_json::Value;

use crate::ring::RingBuffer;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Number of records retained per approval check.
pub const AUDIT_RING_CAPACITY: usize = 128;

// ============================================================================
// SECTION: Records
// ============================================================================

/// Correlation context attached to every record of one approval check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckContext {
    /// Principal (account) identifier.
    pub principal_id: String,
    /// Principal display name when supplied.
    pub principal_name: Option<String>,
    /// Correlation identifier issued for the check.
    pub correlation_id: String,
}

/// Structured log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Record timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity.
    pub level: LogLevel,
    /// Emitting component.
    pub component: &'static str,
    /// Stable message text.
    pub msg: &'static str,
    /// Check context when emitted by a [`CheckLogger`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<CheckContext>,
    /// Structured fields.
    pub fields: Value,
}

impl LogRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        level: LogLevel,
        component: &'static str,
        msg: &'static str,
        check: Option<CheckContext>,
        fields: Value,
    ) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            timestamp_ms,
            level,
            component,
            msg,
            check,
            fields,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for structured log records.
pub trait LogSink: Send + Sync {
    /// Records a log entry.
    fn record(&self, record: &LogRecord);
}

/// Sink that logs JSON lines to stderr.
pub struct StderrLogSink;

impl LogSink for StderrLogSink {
    fn record(&self, record: &LogRecord) {
        if let Ok(payload) = serde_json::to_string(record) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Sink that appends JSON lines to a file.
pub struct FileLogSink {
    /// File handle used for append-only logging.
    file: Mutex<File>,
}

impl FileLogSink {
    /// Opens the log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileLogSink {
    fn record(&self, record: &LogRecord) {
        let Ok(payload) = serde_json::to_string(record) else {
            return;
        };
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{payload}");
        }
    }
}

/// Sink that keeps records in memory, for embedding and tests.
#[derive(Default)]
pub struct MemoryLogSink {
    /// Captured records in arrival order.
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the captured records.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().map_or_else(|_| Vec::new(), |records| records.clone())
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, record: &LogRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// No-op sink.
///
/// # Invariants
/// - Records are intentionally discarded.
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn record(&self, _record: &LogRecord) {}
}

// ============================================================================
// SECTION: Audit Trail
// ============================================================================

/// Shared handle to the in-memory record ring of one approval check.
///
/// # Invariants
/// - Holds at most [`AUDIT_RING_CAPACITY`] records; oldest are evicted first.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    /// Ring shared by the check's logger and the caller's report.
    ring: Arc<Mutex<RingBuffer<LogRecord>>>,
}

impl AuditTrail {
    /// Creates an empty trail with [`AUDIT_RING_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: Arc::new(Mutex::new(RingBuffer::new(AUDIT_RING_CAPACITY))),
        }
    }

    /// Appends a record, evicting the oldest when full.
    pub fn push(&self, record: LogRecord) {
        let mut ring = match self.ring.lock() {
            Ok(ring) => ring,
            Err(poisoned) => poisoned.into_inner(),
        };
        ring.push(record);
    }

    /// Returns retained records from oldest to newest.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.ring.lock().map_or_else(|_| Vec::new(), |ring| ring.to_vec())
    }

    /// Returns how many records were evicted.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.ring.lock().map_or(0, |ring| ring.evicted())
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Loggers
// ============================================================================

/// Leveled logger that forwards records to a sink.
#[derive(Clone)]
pub struct Logger {
    /// Destination for forwarded records.
    sink: Arc<dyn LogSink>,
    /// Minimum level forwarded to the sink.
    min_level: LogLevel,
    /// Component label stamped on records.
    component: &'static str,
}

impl Logger {
    /// Creates a logger for `component` forwarding records at or above `min_level`.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>, min_level: LogLevel, component: &'static str) -> Self {
        Self {
            sink,
            min_level,
            component,
        }
    }

    /// Builds a logger from the logging configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the file sink cannot be opened.
    pub fn from_config(config: &LoggingConfig, component: &'static str) -> io::Result<Self> {
        let sink: Arc<dyn LogSink> = match config.sink {
            LogSinkKind::Stderr => Arc::new(StderrLogSink),
            LogSinkKind::None => Arc::new(NoopLogSink),
            LogSinkKind::File => {
                let path = config.path.as_deref().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "logging.path is required")
                })?;
                Arc::new(FileLogSink::new(path)?)
            }
        };
        Ok(Self::new(sink, config.level, component))
    }

    /// Creates a logger that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopLogSink), LogLevel::Error, "noop")
    }

    /// Returns a logger sharing this sink under another component label.
    #[must_use]
    pub fn with_component(&self, component: &'static str) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            min_level: self.min_level,
            component,
        }
    }

    /// Returns true when records at `level` reach the sink.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Emits a record when `level` is enabled.
    pub fn log(&self, level: LogLevel, msg: &'static str, fields: Value) {
        if self.enabled(level) {
            self.sink.record(&LogRecord::new(level, self.component, msg, None, fields));
        }
    }

    /// Emits a debug record.
    pub fn debug(&self, msg: &'static str, fields: Value) {
        self.log(LogLevel::Debug, msg, fields);
    }

    /// Emits an info record.
    pub fn info(&self, msg: &'static str, fields: Value) {
        self.log(LogLevel::Info, msg, fields);
    }

    /// Derives a per-check child logger writing into `trail`.
    #[must_use]
    pub fn child(&self, context: CheckContext, trail: AuditTrail) -> CheckLogger {
        CheckLogger {
            parent: self.clone(),
            context: Arc::new(context),
            trail,
        }
    }
}

/// Child logger scoped to one approval check.
///
/// # Invariants
/// - Every record lands in the trail; the parent level filter applies only to
///   forwarding.
#[derive(Clone)]
pub struct CheckLogger {
    /// Parent logger receiving forwarded records.
    parent: Logger,
    /// Context stamped on every record.
    context: Arc<CheckContext>,
    /// Per-check ring.
    trail: AuditTrail,
}

impl CheckLogger {
    /// Emits a record into the trail and, when enabled, to the parent sink.
    pub fn log(&self, level: LogLevel, msg: &'static str, fields: Value) {
        let record = LogRecord::new(
            level,
            self.parent.component,
            msg,
            Some(self.context.as_ref().clone()),
            fields,
        );
        if self.parent.enabled(level) {
            self.parent.sink.record(&record);
        }
        self.trail.push(record);
    }

    /// Emits a trace record.
    pub fn trace(&self, msg: &'static str, fields: Value) {
        self.log(LogLevel::Trace, msg, fields);
    }

    /// Emits a debug record.
    pub fn debug(&self, msg: &'static str, fields: Value) {
        self.log(LogLevel::Debug, msg, fields);
    }

    /// Emits an info record.
    pub fn info(&self, msg: &'static str, fields: Value) {
        self.log(LogLevel::Info, msg, fields);
    }

    /// Emits a warn record.
    pub fn warn(&self, msg: &'static str, fields: Value) {
        self.log(LogLevel::Warn, msg, fields);
    }

    /// Emits an error record.
    pub fn error(&self, msg: &'static str, fields: Value) {
        self.log(LogLevel::Error, msg, fields);
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
