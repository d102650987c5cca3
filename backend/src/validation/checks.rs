//! Element-wise predicates and row checks used by the built-in contract.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::geometry::parse_wkt_point;
use crate::models::ROW_ID_FIELD;
use crate::transform::identity::{field_string, make_row_id_from_record};

/// `YYYY-MM-DD` that names a real calendar day.
pub fn is_calendar_date(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
}

/// WKT text describing a point.
pub fn is_wkt_point(value: &Value) -> bool {
    value.as_str().and_then(parse_wkt_point).is_some()
}

/// The first four characters of `year_date` spell `year`.
///
/// Rows where either field is null pass here; nullability is checked per column.
pub fn year_date_matches_year(row: &Map<String, Value>) -> Result<(), String> {
    let date = row.get("year_date").and_then(Value::as_str);
    let year = row.get("year").filter(|v| !v.is_null());
    let (Some(date), Some(year)) = (date, year) else {
        return Ok(());
    };

    let year = field_string(year);
    let prefix: String = date.chars().take(4).collect();
    if prefix == year {
        Ok(())
    } else {
        Err(format!("year={} year_date=\"{}\"", year, date))
    }
}

/// The stored `row_id` is what the identity fields produce today.
pub fn row_id_matches_fields(row: &Map<String, Value>) -> Result<(), String> {
    let Some(stored) = row.get(ROW_ID_FIELD).and_then(Value::as_str) else {
        return Ok(());
    };

    let expected = make_row_id_from_record(row);
    if stored == expected {
        Ok(())
    } else {
        Err(format!("row_id=\"{}\" expected \"{}\"", stored, expected))
    }
}
