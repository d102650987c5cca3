//! Raw record normalization.
//!
//! Shapes a source's [`RawTable`] into [`CanonicalRow`]s:
//!
//! 1. check the required raw columns are present (fatal otherwise)
//! 2. drop observations on the wrong side of a [`BoundaryRule`]
//! 3. drop observations without a numeric value
//! 4. serialize the geometry to WKT (malformed: drop or fail, per policy)
//! 5. join reference metadata by variable code (left join)
//! 6. resolve the denominator value from the same geography and year
//!
//! The output has exactly the canonical columns; extra raw columns are ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::rules::{is_superseded, BoundaryRule};
use crate::error::{NormalizationError, NormalizationResult};
use crate::geometry::serialize_to_wkt;
use crate::models::{CanonicalRow, RawTable, REQUIRED_RAW_COLUMNS};
use crate::reference::ReferenceTable;

/// What to do with a row whose geometry cannot be serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryPolicy {
    /// Drop the row and log a warning.
    #[default]
    DropRow,
    /// Abort normalization of the whole source.
    FailSource,
}

/// Source-specific normalization settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Value written to the `source` column.
    pub source_name: String,
    #[serde(default)]
    pub boundary_rules: Vec<BoundaryRule>,
    #[serde(default)]
    pub malformed_geometry: GeometryPolicy,
}

/// Why a raw row did not make it into the output.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// The variable code is not valid for this year.
    Superseded,
    /// No numeric value.
    NullValue,
    /// Geometry could not be serialized.
    MalformedGeometry(String),
}

/// A raw row that was left out.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRow {
    /// Index in the raw table
    pub row: usize,
    pub reason: DropReason,
}

/// Result of normalizing one raw table.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub rows: Vec<CanonicalRow>,
    pub dropped: Vec<DroppedRow>,
}

impl NormalizeOutcome {
    fn count(&self, pred: impl Fn(&DropReason) -> bool) -> usize {
        self.dropped.iter().filter(|d| pred(&d.reason)).count()
    }

    pub fn superseded(&self) -> usize {
        self.count(|r| matches!(r, DropReason::Superseded))
    }

    pub fn null_values(&self) -> usize {
        self.count(|r| matches!(r, DropReason::NullValue))
    }

    pub fn malformed_geometries(&self) -> usize {
        self.count(|r| matches!(r, DropReason::MalformedGeometry(_)))
    }

    /// Get summary statistics
    pub fn summary(&self) -> String {
        format!(
            "{} rows kept; dropped {} superseded, {} null value, {} malformed geometry",
            self.rows.len(),
            self.superseded(),
            self.null_values(),
            self.malformed_geometries()
        )
    }
}

/// Normalize a raw table.
///
/// Pure: the result depends only on the arguments.
pub fn normalize(
    raw: &RawTable,
    reference: &ReferenceTable,
    config: &NormalizerConfig,
) -> NormalizationResult<NormalizeOutcome> {
    let missing = raw.missing_columns(&REQUIRED_RAW_COLUMNS);
    if !missing.is_empty() {
        return Err(NormalizationError::MissingColumns(missing));
    }

    let mut outcome = NormalizeOutcome::default();

    // Rows on the right side of every boundary, with their parsed value
    let mut kept: Vec<(usize, &Map<String, Value>, Option<f64>)> = Vec::new();
    for (idx, record) in raw.records.iter().enumerate() {
        let variable = text(record, "variable_code");
        let year = integer(record, "year");
        if is_superseded(&config.boundary_rules, variable.as_deref(), year) {
            outcome.dropped.push(DroppedRow { row: idx, reason: DropReason::Superseded });
            continue;
        }
        kept.push((idx, record, number(record, "value")));
    }

    let denominators = DenominatorIndex::build(&kept);

    for (idx, record, value) in kept {
        let Some(value) = value else {
            outcome.dropped.push(DroppedRow { row: idx, reason: DropReason::NullValue });
            continue;
        };

        let location = match serialize_to_wkt(record.get("geometry").unwrap_or(&Value::Null)) {
            Ok(wkt) => wkt,
            Err(e) => match config.malformed_geometry {
                GeometryPolicy::DropRow => {
                    outcome.dropped.push(DroppedRow {
                        row: idx,
                        reason: DropReason::MalformedGeometry(e.to_string()),
                    });
                    continue;
                }
                GeometryPolicy::FailSource => {
                    return Err(NormalizationError::MalformedGeometry {
                        row: idx,
                        message: e.to_string(),
                    })
                }
            },
        };

        let variable = text(record, "variable_code");
        let year = integer(record, "year");
        let geo_id = text(record, "geo_id");
        let entry = variable.as_deref().and_then(|v| reference.get(v));

        let denominator_variable = entry.and_then(|e| e.denominator_variable.clone());
        let denominator = denominator_variable
            .as_deref()
            .and_then(|d| denominators.lookup(d, geo_id.as_deref(), year));

        outcome.rows.push(CanonicalRow {
            source: config.source_name.clone(),
            topic: entry.and_then(|e| e.topic.clone()),
            concept: entry.and_then(|e| e.concept.clone()),
            variable,
            label: entry.and_then(|e| e.label.clone()),
            value,
            denominator_variable,
            denominator_label: entry.and_then(|e| e.denominator_label.clone()),
            denominator,
            year,
            year_date: text(record, "date"),
            geo_id,
            geo_name: text(record, "name"),
            geo_type: text(record, "geo_type"),
            location: Some(location),
        });
    }

    Ok(outcome)
}

/// Values of every kept observation, keyed by (variable, geo_id, year).
struct DenominatorIndex {
    values: HashMap<(String, String, i64), f64>,
}

impl DenominatorIndex {
    fn build(kept: &[(usize, &Map<String, Value>, Option<f64>)]) -> Self {
        let mut values = HashMap::new();
        for (_, record, value) in kept {
            if let (Some(variable), Some(geo_id), Some(year), Some(value)) = (
                text(record, "variable_code"),
                text(record, "geo_id"),
                integer(record, "year"),
                value,
            ) {
                values.insert((variable, geo_id, year), *value);
            }
        }
        Self { values }
    }

    fn lookup(&self, variable: &str, geo_id: Option<&str>, year: Option<i64>) -> Option<f64> {
        let key = (variable.to_string(), geo_id?.to_string(), year?);
        self.values.get(&key).copied()
    }
}

// =============================================================================
// Raw field readers
// =============================================================================

/// Non-empty text, from a string or a scalar.
pub(crate) fn text(record: &Map<String, Value>, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Finite number, from a JSON number or numeric text.
fn number(record: &Map<String, Value>, field: &str) -> Option<f64> {
    let parsed = match record.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Whole number, from an integer, a whole float, or their text forms.
pub(crate) fn integer(record: &Map<String, Value>, field: &str) -> Option<i64> {
    let value = number(record, field)?;
    (value.fract() == 0.0 && value.abs() < 1e15).then_some(value as i64)
}
