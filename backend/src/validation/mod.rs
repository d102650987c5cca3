//! Table validation against the published dataset contract.
//!
//! The contract is data, not control flow: a [`TableSchema`] is a list of
//! [`ColumnSpec`]s (type, nullability, uniqueness, value checks) plus a list
//! of named [`RowCheck`]s that relate several fields of one row. Checking a
//! table never mutates it and always reports every failing constraint by
//! name and column, with the number of offending rows and one example.
//!
//! Type, range and pattern constraints are compiled to JSON Schema (draft 7)
//! fragments and evaluated with `jsonschema`; element-wise predicates and
//! row checks are plain functions.
//!
//! # Example
//!
//! ```rust,ignore
//! use citizen_connect::validation::TableSchema;
//!
//! let schema = TableSchema::canonical(2024)?;
//! let report = schema.check(&records);
//! if !report.is_valid() {
//!     for violation in &report.violations {
//!         eprintln!("{}", violation);
//!     }
//! }
//! ```

mod checks;

use chrono::Datelike;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::error::{ValidationError, ValidationResult};
use crate::models::ROW_ID_FIELD;

pub use checks::{is_calendar_date, is_wkt_point, row_id_matches_fields, year_date_matches_year};

/// Lowest year accepted in the dataset.
pub const MIN_YEAR: i64 = 2000;

// =============================================================================
// Schema description
// =============================================================================

/// Declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Float,
}

impl ColumnType {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "number",
        }
    }
}

/// A named constraint on non-null values of one column.
#[derive(Debug, Clone)]
pub enum ValueCheck {
    /// Inclusive numeric bounds.
    Range { name: &'static str, min: Option<f64>, max: Option<f64> },
    /// Regular expression the whole string must match.
    Pattern { name: &'static str, regex: &'static str },
    /// Element-wise predicate.
    Predicate { name: &'static str, test: fn(&Value) -> bool },
}

impl ValueCheck {
    fn name(&self) -> &'static str {
        match self {
            Self::Range { name, .. } | Self::Pattern { name, .. } | Self::Predicate { name, .. } => name,
        }
    }
}

/// Declared column.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub checks: Vec<ValueCheck>,
}

impl ColumnSpec {
    pub fn new(name: &'static str, kind: ColumnType) -> Self {
        Self { name, kind, nullable: false, unique: false, checks: Vec::new() }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn check(mut self, check: ValueCheck) -> Self {
        self.checks.push(check);
        self
    }
}

/// A named check over the fields of one row.
#[derive(Debug, Clone)]
pub struct RowCheck {
    pub name: &'static str,
    /// `Err` carries the example shown in diagnostics.
    pub test: fn(&Map<String, Value>) -> Result<(), String>,
}

// =============================================================================
// Diagnostics
// =============================================================================

/// One failed constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Constraint name, e.g. `year:range` or `row_id_matches_fields`.
    pub check: String,
    pub column: Option<String>,
    /// Number of offending rows.
    pub rows: usize,
    /// First offending value or row description.
    pub example: Option<String>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed for {} row(s)", self.check, self.rows)?;
        if let Some(ref column) = self.column {
            write!(f, " in column '{}'", column)?;
        }
        if let Some(ref example) = self.example {
            write!(f, ", e.g. {}", example)?;
        }
        Ok(())
    }
}

/// Outcome of checking a table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub rows_checked: usize,
    pub violations: Vec<Violation>,
    /// Last row counted for each violation, aligned with `violations`.
    #[serde(skip)]
    last_row: Vec<usize>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Names of the violated constraints.
    pub fn failed_checks(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.check.as_str()).collect()
    }

    /// Count `row` against the (check, column) violation, once per row.
    fn record(&mut self, row: usize, check: String, column: Option<&str>, example: impl FnOnce() -> String) {
        let found = self
            .violations
            .iter()
            .position(|v| v.check == check && v.column.as_deref() == column);
        if let Some(idx) = found {
            if self.last_row[idx] != row {
                self.last_row[idx] = row;
                self.violations[idx].rows += 1;
            }
            return;
        }
        self.violations.push(Violation {
            check,
            column: column.map(String::from),
            rows: 1,
            example: Some(truncate(&example())),
        });
        self.last_row.push(row);
    }
}

fn truncate(text: &str) -> String {
    const MAX: usize = 120;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        format!("{}…", text.chars().take(MAX).collect::<String>())
    }
}

fn show(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        other => other.to_string(),
    }
}

// =============================================================================
// Validated table
// =============================================================================

/// A table that passed every check. Only [`TableSchema::validate`] builds one.
#[derive(Debug, Clone)]
pub struct ValidatedTable {
    records: Vec<Value>,
}

impl ValidatedTable {
    pub fn records(&self) -> &[Value] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Value> {
        self.records
    }

    /// Name of the identity column.
    pub fn identity_field(&self) -> &'static str {
        ROW_ID_FIELD
    }

    /// Identities in table order.
    pub fn row_ids(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter_map(|r| r.get(ROW_ID_FIELD).and_then(|v| v.as_str()))
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
// Table schema
// =============================================================================

struct CompiledColumn {
    spec: ColumnSpec,
    type_validator: jsonschema::Validator,
    /// One validator per Range/Pattern check, aligned with `spec.checks`.
    value_validators: Vec<Option<jsonschema::Validator>>,
}

/// A compiled table contract.
pub struct TableSchema {
    columns: Vec<CompiledColumn>,
    row_checks: Vec<RowCheck>,
    strict: bool,
}

fn compile(column: &str, schema: &Value) -> Result<jsonschema::Validator, ValidationError> {
    jsonschema::draft7::new(schema).map_err(|e| ValidationError::InvalidSchema {
        column: column.to_string(),
        message: e.to_string(),
    })
}

impl TableSchema {
    /// Compile a schema. `strict` rejects undeclared columns.
    pub fn new(
        columns: Vec<ColumnSpec>,
        row_checks: Vec<RowCheck>,
        strict: bool,
    ) -> ValidationResult<Self> {
        let mut compiled = Vec::with_capacity(columns.len());
        for spec in columns {
            let type_schema = if spec.nullable {
                json!({ "type": [spec.kind.json_type(), "null"] })
            } else {
                json!({ "type": spec.kind.json_type() })
            };
            let type_validator = compile(spec.name, &type_schema)?;

            let mut value_validators = Vec::with_capacity(spec.checks.len());
            for check in &spec.checks {
                let fragment = match check {
                    ValueCheck::Range { min, max, .. } => {
                        let mut obj = Map::new();
                        if let Some(min) = min {
                            obj.insert("minimum".into(), json!(min));
                        }
                        if let Some(max) = max {
                            obj.insert("maximum".into(), json!(max));
                        }
                        Some(Value::Object(obj))
                    }
                    ValueCheck::Pattern { regex, .. } => Some(json!({ "pattern": regex })),
                    ValueCheck::Predicate { .. } => None,
                };
                value_validators.push(match fragment {
                    Some(schema) => Some(compile(spec.name, &schema)?),
                    None => None,
                });
            }

            compiled.push(CompiledColumn { spec, type_validator, value_validators });
        }

        Ok(Self { columns: compiled, row_checks, strict })
    }

    /// The Citizen Connect dataset contract, with `year` capped at `current_year`.
    pub fn canonical(current_year: i32) -> ValidationResult<Self> {
        Self::new(canonical_columns(current_year), canonical_row_checks(), true)
    }

    /// The contract for the current calendar year.
    pub fn canonical_now() -> ValidationResult<Self> {
        Self::canonical(chrono::Utc::now().year())
    }

    /// Check a table and report every violated constraint.
    pub fn check(&self, table: &[Value]) -> ValidationReport {
        let mut report = ValidationReport { rows_checked: table.len(), ..Default::default() };
        let mut seen: Vec<HashSet<String>> = vec![HashSet::new(); self.columns.len()];

        for (idx, row) in table.iter().enumerate() {
            let Some(obj) = row.as_object() else {
                report.record(idx, "row_is_object".into(), None, || format!("row {}: {}", idx, row));
                continue;
            };

            if self.strict {
                for key in obj.keys() {
                    if !self.columns.iter().any(|c| c.spec.name == key) {
                        report.record(idx, "strict_columns".into(), Some(key.as_str()), || key.clone());
                    }
                }
            }

            for (col_idx, column) in self.columns.iter().enumerate() {
                self.check_cell(idx, column, obj, &mut seen[col_idx], &mut report);
            }

            for check in &self.row_checks {
                if let Err(example) = (check.test)(obj) {
                    report.record(idx, check.name.into(), None, || format!("row {}: {}", idx, example));
                }
            }
        }

        report
    }

    fn check_cell(
        &self,
        idx: usize,
        column: &CompiledColumn,
        row: &Map<String, Value>,
        seen: &mut HashSet<String>,
        report: &mut ValidationReport,
    ) {
        let name = column.spec.name;
        let Some(value) = row.get(name) else {
            report.record(idx, "required_columns".into(), Some(name), || name.to_string());
            return;
        };

        if value.is_null() {
            if !column.spec.nullable {
                report.record(idx, format!("{}:nullable", name), Some(name), || "null".into());
            }
            return;
        }

        if !column.type_validator.is_valid(value) {
            report.record(idx, format!("{}:type", name), Some(name), || show(value));
            return;
        }

        for (check, validator) in column.spec.checks.iter().zip(&column.value_validators) {
            let ok = match (check, validator) {
                (_, Some(validator)) => validator.is_valid(value),
                (ValueCheck::Predicate { test, .. }, None) => test(value),
                _ => true,
            };
            if !ok {
                report.record(idx, format!("{}:{}", name, check.name()), Some(name), || show(value));
            }
        }

        if column.spec.unique {
            let key = crate::transform::identity::field_string(value);
            if !seen.insert(key) {
                report.record(idx, format!("{}:unique", name), Some(name), || show(value));
            }
        }
    }

    /// Validate a table as a unit.
    ///
    /// On success the records are wrapped unchanged in a [`ValidatedTable`];
    /// on failure every violation is returned.
    pub fn validate(&self, table: Vec<Value>) -> ValidationResult<ValidatedTable> {
        let report = self.check(&table);
        if report.is_valid() {
            Ok(ValidatedTable { records: table })
        } else {
            Err(ValidationError::Rejected { violations: report.violations })
        }
    }
}

// =============================================================================
// Built-in contract
// =============================================================================

fn canonical_columns(current_year: i32) -> Vec<ColumnSpec> {
    use ColumnType::*;

    vec![
        ColumnSpec::new("source", String),
        ColumnSpec::new("topic", String).nullable(),
        ColumnSpec::new("concept", String).nullable(),
        ColumnSpec::new("variable", String),
        ColumnSpec::new("label", String),
        ColumnSpec::new("value", Float),
        ColumnSpec::new("denominator_variable", String).nullable(),
        ColumnSpec::new("denominator_label", String).nullable(),
        ColumnSpec::new("denominator", Float).nullable(),
        ColumnSpec::new("year", Integer).check(ValueCheck::Range {
            name: "range",
            min: Some(MIN_YEAR as f64),
            max: Some(current_year as f64),
        }),
        ColumnSpec::new("year_date", String)
            .check(ValueCheck::Pattern { name: "format", regex: r"^\d{4}-\d{2}-\d{2}$" })
            .check(ValueCheck::Predicate { name: "calendar_date", test: is_calendar_date }),
        ColumnSpec::new("geo_id", String),
        ColumnSpec::new("geo_name", String),
        ColumnSpec::new("geo_type", String),
        ColumnSpec::new("location", String)
            .check(ValueCheck::Predicate { name: "wkt_point", test: is_wkt_point }),
        ColumnSpec::new(ROW_ID_FIELD, String).unique(),
    ]
}

fn canonical_row_checks() -> Vec<RowCheck> {
    vec![
        RowCheck { name: "year_date_matches_year", test: year_date_matches_year },
        RowCheck { name: "row_id_matches_fields", test: row_id_matches_fields },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{to_table, CanonicalRow};
    use crate::transform::identity::assign_row_ids;

    const YEAR: i32 = 2024;

    fn schema() -> TableSchema {
        TableSchema::canonical(YEAR).unwrap()
    }

    fn row(variable: &str, year: i64, geo_id: &str) -> CanonicalRow {
        CanonicalRow {
            source: "ACS5".into(),
            topic: Some("Population".into()),
            concept: Some("Race".into()),
            variable: Some(variable.into()),
            label: Some("White alone".into()),
            value: 1200.0,
            denominator_variable: None,
            denominator_label: None,
            denominator: None,
            year: Some(year),
            year_date: Some(format!("{}-12-31", year)),
            geo_id: Some(geo_id.into()),
            geo_name: Some("Some County".into()),
            geo_type: Some("county".into()),
            location: Some("POINT (-86.6 32.5)".into()),
        }
    }

    fn table(rows: Vec<CanonicalRow>) -> Vec<Value> {
        to_table(&assign_row_ids(rows))
    }

    fn valid_table() -> Vec<Value> {
        table(vec![
            row("B02001_002E", 2018, "0500000US01001"),
            row("B02001_002E", 2018, "0500000US01003"),
            row("B02001_003E", 2017, "0500000US01001"),
        ])
    }

    fn set(table: &mut [Value], idx: usize, field: &str, value: Value) {
        table[idx].as_object_mut().unwrap().insert(field.into(), value);
    }

    fn failed(table: &[Value]) -> Vec<String> {
        schema()
            .check(table)
            .failed_checks()
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_valid_table_passes() {
        let report = schema().check(&valid_table());
        assert!(report.is_valid(), "{:?}", report.violations);
        assert_eq!(report.rows_checked, 3);
    }

    #[test]
    fn test_validate_returns_records_unchanged() {
        let records = valid_table();
        let validated = schema().validate(records.clone()).unwrap();
        assert_eq!(validated.records(), records.as_slice());
        assert_eq!(validated.identity_field(), "row_id");
        assert_eq!(validated.row_ids().len(), 3);
    }

    #[test]
    fn test_duplicate_rows_rejected() {
        let mut records = valid_table();
        records.push(records[0].clone());

        let err = schema().validate(records).unwrap_err();
        match err {
            ValidationError::Rejected { violations } => {
                let dup = violations.iter().find(|v| v.check == "row_id:unique").unwrap();
                assert_eq!(dup.rows, 1);
                assert_eq!(dup.column.as_deref(), Some("row_id"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_year_date_must_match_year() {
        let mut records = valid_table();
        // year=2018 with a 2019 date
        set(&mut records, 0, "year_date", json!("2019-01-01"));
        assert_eq!(failed(&records), vec!["year_date_matches_year"]);
    }

    #[test]
    fn test_year_out_of_range() {
        let mut records = table(vec![
            row("B02001_002E", 1999, "0500000US01001"),
            row("B02001_002E", (YEAR + 1) as i64, "0500000US01001"),
        ]);
        assert_eq!(failed(&records), vec!["year:range"]);

        let report = schema().check(&records);
        assert_eq!(report.violations[0].rows, 2);
        assert_eq!(report.violations[0].example.as_deref(), Some("1999"));

        set(&mut records, 1, "year", json!(YEAR));
        set(&mut records, 1, "year_date", json!(format!("{}-06-30", YEAR)));
        set(&mut records, 1, "row_id", json!(format!("ACS5|B02001_002E||{}|0500000US01001", YEAR)));
        assert_eq!(schema().check(&records).violations[0].rows, 1);
    }

    #[test]
    fn test_year_date_format_and_calendar() {
        let mut records = valid_table();
        set(&mut records, 0, "year_date", json!("2018/12/31"));
        set(&mut records, 1, "year_date", json!("2018-02-30"));
        let checks = failed(&records);
        assert!(checks.contains(&"year_date:format".to_string()));
        assert!(checks.contains(&"year_date:calendar_date".to_string()));
    }

    #[test]
    fn test_location_must_be_point() {
        let mut records = valid_table();
        set(&mut records, 2, "location", json!("LINESTRING (0 0, 1 1)"));
        assert_eq!(failed(&records), vec!["location:wkt_point"]);
    }

    #[test]
    fn test_stale_row_id_detected() {
        let mut records = valid_table();
        set(&mut records, 1, "geo_id", json!("0500000US01005"));
        let report = schema().check(&records);
        assert_eq!(report.failed_checks(), vec!["row_id_matches_fields"]);
        assert!(report.violations[0].example.as_ref().unwrap().contains("0500000US01005"));
    }

    #[test]
    fn test_extra_column_rejected() {
        let mut records = valid_table();
        set(&mut records, 0, "state", json!("01"));
        assert_eq!(failed(&records), vec!["strict_columns"]);
    }

    #[test]
    fn test_missing_column_rejected() {
        let mut records = valid_table();
        records[0].as_object_mut().unwrap().remove("geo_type");
        assert_eq!(failed(&records), vec!["required_columns"]);
    }

    #[test]
    fn test_each_missing_column_reported_once_per_row() {
        let mut records = valid_table();
        for record in &mut records {
            let obj = record.as_object_mut().unwrap();
            obj.remove("geo_type");
            obj.remove("geo_name");
        }

        let report = schema().check(&records);
        assert_eq!(report.violations.len(), 2);
        let columns: Vec<_> = report.violations.iter().map(|v| v.column.as_deref()).collect();
        assert_eq!(columns, vec![Some("geo_name"), Some("geo_type")]);
        assert!(report.violations.iter().all(|v| v.check == "required_columns" && v.rows == 3));
    }

    #[test]
    fn test_each_extra_column_reported_separately() {
        let mut records = valid_table();
        set(&mut records, 0, "state", json!("01"));
        set(&mut records, 1, "state", json!("01"));
        set(&mut records, 1, "county", json!("001"));

        let report = schema().check(&records);
        let state = report.violations.iter().find(|v| v.column.as_deref() == Some("state")).unwrap();
        let county = report.violations.iter().find(|v| v.column.as_deref() == Some("county")).unwrap();
        assert_eq!(state.rows, 2);
        assert_eq!(county.rows, 1);
        assert_eq!(state.check, "strict_columns");
    }

    #[test]
    fn test_nullability() {
        let mut records = valid_table();
        // label is required even though reference lookups may miss
        set(&mut records, 0, "label", Value::Null);
        // topic is nullable
        set(&mut records, 1, "topic", Value::Null);
        assert_eq!(failed(&records), vec!["label:nullable"]);
    }

    #[test]
    fn test_column_types() {
        let mut records = valid_table();
        set(&mut records, 0, "value", json!("1200"));
        set(&mut records, 1, "year", json!(2018.5));
        let checks = failed(&records);
        assert!(checks.contains(&"value:type".to_string()));
        assert!(checks.contains(&"year:type".to_string()));
    }

    #[test]
    fn test_non_object_row() {
        let mut records = valid_table();
        records.push(json!([1, 2, 3]));
        assert_eq!(failed(&records), vec!["row_is_object"]);
    }

    #[test]
    fn test_check_does_not_mutate() {
        let records = valid_table();
        let before = records.clone();
        let _ = schema().check(&records);
        assert_eq!(records, before);
    }

    #[test]
    fn test_violation_display() {
        let violation = Violation {
            check: "year:range".into(),
            column: Some("year".into()),
            rows: 3,
            example: Some("1999".into()),
        };
        assert_eq!(
            violation.to_string(),
            "year:range failed for 3 row(s) in column 'year', e.g. 1999"
        );
    }

    #[test]
    fn test_custom_schema() {
        let schema = TableSchema::new(
            vec![ColumnSpec::new("code", ColumnType::String)
                .check(ValueCheck::Pattern { name: "upper", regex: "^[A-Z]+$" })],
            vec![],
            false,
        )
        .unwrap();

        let report = schema.check(&[json!({ "code": "abc", "extra": 1 })]);
        assert_eq!(report.failed_checks(), vec!["code:upper"]);
    }

    #[test]
    fn test_built_in_contract_compiles_for_current_year() {
        let schema = TableSchema::canonical_now().unwrap();
        assert!(schema.check(&valid_table()).is_valid());
    }

    #[test]
    fn test_empty_table_passes() {
        assert!(schema().check(&[]).is_valid());
    }
}
