//! Row identity for upserts.
//!
//! A row's identity is `source|variable|denominator_variable|year|geo_id`,
//! with nulls written as the empty string. Value, label and year_date are not
//! part of it, so a republished value for the same subject replaces the
//! earlier row.

use serde_json::{Map, Value};

use crate::models::{CanonicalRow, KeyedRow};

/// Fields that make up the identity, in order.
pub const ID_FIELDS: [&str; 5] = ["source", "variable", "denominator_variable", "year", "geo_id"];

/// Separator between identity fields.
pub const SEPARATOR: &str = "|";

fn compose<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .map(|p| p.unwrap_or(""))
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// Identity of a typed row.
pub fn make_row_id(row: &CanonicalRow) -> String {
    let year = row.year.map(|y| y.to_string());
    compose([
        Some(row.source.as_str()),
        row.variable.as_deref(),
        row.denominator_variable.as_deref(),
        year.as_deref(),
        row.geo_id.as_deref(),
    ])
}

/// Identity of an untyped record, looked up by field name.
pub fn make_row_id_from_record(record: &Map<String, Value>) -> String {
    let parts: Vec<String> = ID_FIELDS
        .iter()
        .map(|field| record.get(*field).map(field_string).unwrap_or_default())
        .collect();
    parts.join(SEPARATOR)
}

/// String form of a field for identity purposes.
///
/// Whole floats print without a fractional part so `2018` and `2018.0`
/// produce the same identity.
pub fn field_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Attach identities to normalized rows.
pub fn assign_row_ids(rows: Vec<CanonicalRow>) -> Vec<KeyedRow> {
    rows.into_iter()
        .map(|row| {
            let row_id = make_row_id(&row);
            KeyedRow { row, row_id }
        })
        .collect()
}
