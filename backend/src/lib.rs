//! # Citizen Connect - statistical source loader
//!
//! Loads statistical source data (American Community Survey 5-year estimates
//! and similar) into the Citizen Connect Socrata dataset.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Fetcher   │────▶│  Normalize  │────▶│   row_id    │────▶│  Validate   │────▶│   Upsert    │
//! │ (raw table) │     │ (rules+ref) │     │ (identity)  │     │ (contract)  │     │  (Socrata)  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! Sources run one after another. A source that fails at any step is
//! skipped and the run continues with the next one.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use citizen_connect::{Credentials, Pipeline, PipelineConfig, SocrataClient, SocrataSettings, TableSchema};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SocrataSettings::from_env();
//!     let client = SocrataClient::new(Credentials::from_env()?);
//!     let config = PipelineConfig::default();
//!
//!     let summary = Pipeline::new(client, settings.dataset(), TableSchema::canonical_now()?)
//!         .run_definitions(&config.sources)
//!         .await;
//!     println!("{} sources failed", summary.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per pipeline stage
//! - [`models`] - Raw tables and canonical rows
//! - [`parser`] - CSV/JSON parsing with auto-detection
//! - [`geometry`] - GeoJSON to WKT points
//! - [`reference`] - Variable metadata lookup
//! - [`transform`] - Boundary rules, normalization, identity, pipeline
//! - [`validation`] - Declarative table contract
//! - [`sources`] - Source fetchers and the ACS5 definition
//! - [`publish`] - Socrata and in-memory publishers
//! - [`config`] - Environment and pipeline configuration
//! - [`logs`] - Log broadcasting

// Core modules
pub mod error;
pub mod models;

// Parsing
pub mod geometry;
pub mod parser;
pub mod reference;

// Transformation
pub mod transform;

// Validation
pub mod validation;

// Collaborators
pub mod config;
pub mod publish;
pub mod sources;

// Logging
pub mod logs;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    FetchError,
    NormalizationError,
    PipelineError,
    PublishError,
    ValidationError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{CanonicalRow, KeyedRow, RawTable, CANONICAL_COLUMNS, ROW_ID_FIELD};

// =============================================================================
// Re-exports - Transform
// =============================================================================

pub use transform::{
    assign_row_ids,
    make_row_id,
    normalize,
    BoundaryRule,
    GeometryPolicy,
    NormalizeOutcome,
    NormalizerConfig,
    Pipeline,
    RunSummary,
    SourceJob,
    SourceOutcome,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{TableSchema, ValidatedTable, ValidationReport, Violation};

// =============================================================================
// Re-exports - Collaborators
// =============================================================================

pub use config::{PipelineConfig, SocrataSettings, SourceDefinition};
pub use publish::{Credentials, DatasetHandle, InMemoryPublisher, PublishReceipt, Publisher, SocrataClient};
pub use reference::ReferenceTable;
pub use sources::{FetchRequest, FileFetcher, GeoScope, SourceFetcher};
