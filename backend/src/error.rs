//! Error types for the Citizen Connect loading pipeline.
//!
//! Each stage of a source run has its own error type:
//!
//! - [`FetchError`] - the source fetcher could not produce a raw table
//! - [`NormalizationError`] - the raw table cannot be shaped into canonical rows
//! - [`ValidationError`] - the keyed table broke the schema contract
//! - [`PublishError`] - the remote upsert failed
//! - [`ConfigError`] - configuration or reference data could not be loaded
//! - [`PipelineError`] - top-level wrapper returned for a single source
//!
//! Dropped rows (null value, malformed geometry) are not errors; they are
//! counted in [`crate::transform::normalize::NormalizeOutcome`].

use thiserror::Error;

use crate::validation::Violation;

// =============================================================================
// Fetch Errors
// =============================================================================

/// Errors from a source fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Failed to read the raw table.
    #[error("Failed to read raw table: {0}")]
    Io(#[from] std::io::Error),

    /// The raw table could not be parsed.
    #[error("Invalid raw table: {0}")]
    Parse(String),

    /// Unsupported raw table format.
    #[error("Unsupported raw table format: {0}")]
    UnsupportedFormat(String),

    /// The raw table contained no records.
    #[error("Raw table is empty")]
    Empty,
}

// =============================================================================
// Normalization Errors
// =============================================================================

/// Errors that abort normalization of a source.
#[derive(Debug, Error)]
pub enum NormalizationError {
    /// One or more required raw columns are absent.
    #[error("Missing required source column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// A geometry could not be serialized and the source policy is to fail.
    #[error("Malformed geometry in row {row}: {message}")]
    MalformedGeometry { row: usize, message: String },
}

// =============================================================================
// Validation Errors
// =============================================================================

/// A table was rejected by the schema validator.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// One or more named constraints were violated.
    #[error("Table rejected: {}", summarize(.violations))]
    Rejected { violations: Vec<Violation> },

    /// The schema itself could not be compiled.
    #[error("Invalid schema for column '{column}': {message}")]
    InvalidSchema { column: String, message: String },
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Publish Errors
// =============================================================================

/// Errors from the remote publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// HTTP transport failed.
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The service answered with an error status.
    #[error("Service error (HTTP {status}): {message}")]
    Service { status: u16, message: String },

    /// The service accepted the request but reported row errors.
    #[error("Upsert reported {0} row error(s)")]
    RowErrors(u64),

    /// The service response could not be understood.
    #[error("Invalid service response: {0}")]
    InvalidResponse(String),

    /// The table is missing its identity field.
    #[error("Table has no identity field '{0}'")]
    MissingIdentity(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading configuration or reference data.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing environment variable.
    #[error("Missing environment variable {0}")]
    MissingEnv(String),

    /// Failed to read a configuration file.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for the expected shape.
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Reference table could not be parsed.
    #[error("Invalid reference table: {0}")]
    Reference(String),

    /// Unknown source name.
    #[error("Unknown source: {0}")]
    UnknownSource(String),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Why a single source run ended without publishing.
///
/// Returned by [`crate::transform::pipeline::Pipeline::prepare`] and carried in
/// [`crate::transform::pipeline::SourceOutcome`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source fetch failed.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Normalization failed.
    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    /// Validation rejected the table.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Publishing failed.
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Configuration or reference data problem.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Short stage name used in summary lines.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Normalization(_) => "normalization",
            Self::Validation(_) => "validation",
            Self::Publish(_) => "publish",
            Self::Config(_) => "config",
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Result type for normalization.
pub type NormalizationResult<T> = Result<T, NormalizationError>;

/// Result type for schema compilation and validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Result type for publish operations.
pub type PublishResult<T> = Result<T, PublishError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for a single source run.
pub type PipelineResult<T> = Result<T, PipelineError>;
