//! Transformation module.
//!
//! - Rules: variable codes valid only on one side of a year boundary
//! - Normalize: raw table to canonical rows
//! - Identity: deterministic `row_id` for upserts
//! - Pipeline: per-source fetch, normalize, validate and publish

pub mod identity;
pub mod normalize;
pub mod pipeline;
pub mod rules;

pub use identity::{assign_row_ids, make_row_id, make_row_id_from_record};
pub use normalize::{normalize, GeometryPolicy, NormalizeOutcome, NormalizerConfig};
pub use pipeline::{Pipeline, RunSummary, SourceJob, SourceOutcome};
pub use rules::BoundaryRule;
