//! Library-level error taxonomy with stable kinds and exit-code mapping.
//!
//! `EtlError` is the primary error type returned by bioetl library
//! operations. Variants are grouped by origin:
//!
//! | Group | Description |
//! |-------|-------------|
//! | `Transport` | Network-level failures handled by the resilience layer |
//! | `Protocol` | HTTP/payload-level failures (bad status, unparseable body) |
//! | `Semantic` | Data contract violations (validation, drift, ordering) |
//! | `Artifact` | Output commit failures (partial, checksum, rename) |
//! | `Config` | Configuration loading and override errors |
//!
//! Library code returns `EtlError` and never calls `std::process::exit`;
//! only the CLI maps errors to exit codes via
//! [`to_exit_code()`](EtlError::to_exit_code).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exit_codes::ExitCode;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("semantic error: {0}")]
    Semantic(#[from] SemanticError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("run cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl EtlError {
    /// Map this error to the documented CLI exit code.
    #[must_use]
    pub fn to_exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::CLI_ARGS,
            Self::Semantic(SemanticError::ValidationFailed { .. })
            | Self::Semantic(SemanticError::DuplicatePrimaryKey { .. })
            | Self::Semantic(SemanticError::ColumnOrderMismatch { .. }) => ExitCode::VALIDATION,
            Self::Semantic(SemanticError::SchemaDrift { .. }) => ExitCode::SCHEMA_DRIFT,
            Self::Semantic(SemanticError::ReleaseMismatch { .. }) => ExitCode::RELEASE_MISMATCH,
            Self::Artifact(_) => ExitCode::PARTIAL_ARTIFACT,
            Self::Cancelled => ExitCode::CANCELLED,
            _ => ExitCode::INTERNAL,
        }
    }

    /// Stable kind identifier used in structured diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.kind(),
            Self::Protocol(e) => e.kind(),
            Self::Semantic(e) => e.kind(),
            Self::Artifact(e) => e.kind(),
            Self::Config(e) => e.kind(),
            Self::Io(_) => "Io",
            Self::Cancelled => "Cancelled",
            Self::Internal(_) => "Internal",
        }
    }
}

/// Network-level failures. The resilience layer handles these internally;
/// only `Exhausted`, `CircuitOpen`, and `ServiceUnavailable` surface to
/// callers of the HTTP layer.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network failure: {detail}")]
    Network { detail: String },

    #[error("rate limited (retry after {retry_after_secs:?} s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("service unavailable until {until}: {reason}")]
    ServiceUnavailable { until: DateTime<Utc>, reason: String },

    #[error("circuit open until {until}")]
    CircuitOpen { until: DateTime<Utc> },

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<TransportError>,
    },
}

impl TransportError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "Timeout",
            Self::Network { .. } => "Network",
            Self::RateLimited { .. } => "RateLimited",
            Self::ServiceUnavailable { .. } => "ServiceUnavailable",
            Self::CircuitOpen { .. } => "CircuitOpen",
            Self::Exhausted { .. } => "Exhausted",
        }
    }

    /// Numeric code recorded in fallback records for this failure class.
    #[must_use]
    pub fn fallback_code(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network { .. } => "network",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Exhausted { last, .. } => last.fallback_code(),
        }
    }
}

/// HTTP/payload-level failures that are never retried.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("bad request: HTTP {status}")]
    BadRequest { status: u16 },

    #[error("resource not found")]
    NotFound,

    #[error("malformed JSON body (sha256 {body_hash})")]
    ParseJson { body_hash: String },

    #[error("malformed XML body: {detail}")]
    ParseXml { detail: String },
}

impl ProtocolError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BadRequest",
            Self::NotFound => "NotFound",
            Self::ParseJson { .. } => "ParseJSON",
            Self::ParseXml { .. } => "ParseXML",
        }
    }
}

/// One failed check collected by the lazy validator: the column, the check
/// identifier, a capped sample of offending rendered values, and the total
/// count of failing rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureCase {
    pub column: String,
    pub check: String,
    pub values: Vec<String>,
    pub count: usize,
}

impl std::fmt::Display for FailureCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} ({} rows, e.g. {:?})",
            self.column, self.check, self.count, self.values
        )
    }
}

/// Data contract violations. These surface unconditionally; the pipeline
/// never attempts to repair data after Normalize.
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("validation failed: {} failure case(s)", failures.len())]
    ValidationFailed { failures: Vec<FailureCase> },

    #[error("schema drift for '{id}': expected major {expected}, loaded {actual}")]
    SchemaDrift {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("column order mismatch: expected {expected:?}, got {actual:?}")]
    ColumnOrderMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("{count} duplicate value(s) in primary key column '{column}'")]
    DuplicatePrimaryKey { column: String, count: usize },

    #[error("{missing} unresolved reference(s) for join key '{key}'")]
    ReferentialIntegrityGap {
        key: String,
        missing: usize,
        sample: Vec<String>,
    },

    #[error("release changed mid-run: pinned '{pinned}', observed '{observed}'")]
    ReleaseMismatch { pinned: String, observed: String },
}

impl SemanticError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "ValidationFailed",
            Self::SchemaDrift { .. } => "SchemaDrift",
            Self::ColumnOrderMismatch { .. } => "ColumnOrderMismatch",
            Self::DuplicatePrimaryKey { .. } => "DuplicatePrimaryKey",
            Self::ReferentialIntegrityGap { .. } => "ReferentialIntegrityGap",
            Self::ReleaseMismatch { .. } => "ReleaseMismatch",
        }
    }
}

/// Output commit failures. The writer guarantees per-file atomicity; these
/// errors report what the completeness check or a single commit found.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact set incomplete, missing: {path}")]
    PartialArtifact { path: String },

    #[error("artifact is empty: {path}")]
    EmptyArtifact { path: String },

    #[error("rename failed for {path}: {reason}")]
    RenameFailed { path: String, reason: String },

    #[error("checksum mismatch for {path}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}

impl ArtifactError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PartialArtifact { .. } => "PartialArtifact",
            Self::EmptyArtifact { .. } => "EmptyArtifact",
            Self::RenameFailed { .. } => "RenameFailed",
            Self::ChecksumMismatch { .. } => "ChecksumMismatch",
        }
    }
}

/// Configuration loading and override errors. All keys and permissible
/// ranges are declared statically; anything outside them is a hard error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown configuration key: {key}")]
    UnknownKey { key: String },

    #[error("value out of range for {key}: {value} (allowed: {allowed})")]
    OutOfRange {
        key: String,
        value: String,
        allowed: String,
    },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("batch size {requested} exceeds source maximum {maximum} for '{source_name}'")]
    BatchSizeTooLarge {
        source_name: String,
        requested: usize,
        maximum: usize,
    },

    #[error("configuration profile not found: {path}")]
    ProfileNotFound { path: String },

    #[error("failed to parse configuration: {reason}")]
    Parse { reason: String },
}

impl ConfigError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownKey { .. } => "UnknownKey",
            Self::OutOfRange { .. } => "OutOfRange",
            Self::InvalidValue { .. } => "InvalidValue",
            Self::BatchSizeTooLarge { .. } => "BatchSizeTooLarge",
            Self::ProfileNotFound { .. } => "ProfileNotFound",
            Self::Parse { .. } => "Parse",
        }
    }
}
