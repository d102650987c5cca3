//! Domain models for the loading pipeline.
//!
//! - [`RawTable`] - records returned by a source fetcher, before normalization
//! - [`CanonicalRow`] - one schema-ready output row, without its identity
//! - [`KeyedRow`] - a canonical row with its `row_id`
//! - [`CANONICAL_COLUMNS`] - the exact published column set

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Column names
// =============================================================================

/// Name of the identity column used for upserts.
pub const ROW_ID_FIELD: &str = "row_id";

/// Published columns, in dataset order.
pub const CANONICAL_COLUMNS: [&str; 16] = [
    "source",
    "topic",
    "concept",
    "variable",
    "label",
    "value",
    "denominator_variable",
    "denominator_label",
    "denominator",
    "year",
    "year_date",
    "geo_id",
    "geo_name",
    "geo_type",
    "location",
    ROW_ID_FIELD,
];

/// Raw columns every source table must provide.
pub const REQUIRED_RAW_COLUMNS: [&str; 8] = [
    "variable_code",
    "value",
    "name",
    "date",
    "year",
    "geometry",
    "geo_id",
    "geo_type",
];

// =============================================================================
// Raw Table
// =============================================================================

/// A raw table as produced by a source fetcher.
///
/// Records are JSON objects keyed by header. A header may be absent from an
/// individual record, which reads as null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Column headers, in source order.
    pub headers: Vec<String>,
    /// One object per raw record.
    pub records: Vec<Map<String, Value>>,
}

impl RawTable {
    /// Build a table from records, deriving headers from the keys seen.
    pub fn from_records(records: Vec<Map<String, Value>>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !headers.iter().any(|h| h == key) {
                    headers.push(key.clone());
                }
            }
        }
        Self { headers, records }
    }

    /// Whether the table declares `column`.
    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    /// Required raw columns absent from this table.
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// Canonical Row
// =============================================================================

/// One normalized observation, ready for identity assignment.
///
/// Fields that come straight from raw data stay optional here: the schema
/// validator, not the normalizer, decides whether a null is acceptable.
/// Nulls serialize as JSON `null` so every column is always present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRow {
    pub source: String,
    pub topic: Option<String>,
    pub concept: Option<String>,
    pub variable: Option<String>,
    pub label: Option<String>,
    pub value: f64,
    pub denominator_variable: Option<String>,
    pub denominator_label: Option<String>,
    pub denominator: Option<f64>,
    pub year: Option<i64>,
    pub year_date: Option<String>,
    pub geo_id: Option<String>,
    pub geo_name: Option<String>,
    pub geo_type: Option<String>,
    pub location: Option<String>,
}

/// A canonical row with its identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyedRow {
    #[serde(flatten)]
    pub row: CanonicalRow,
    pub row_id: String,
}

impl KeyedRow {
    /// Convert to an untyped record for validation and publishing.
    pub fn to_record(&self) -> Value {
        // Plain strings, numbers and nulls only: serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Convert keyed rows into the untyped table the validator consumes.
pub fn to_table(rows: &[KeyedRow]) -> Vec<Value> {
    rows.iter().map(KeyedRow::to_record).collect()
}

// =============================================================================
// Tests
// =============================================================================
