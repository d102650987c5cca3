//! Point geometry conversion between GeoJSON and WKT.
//!
//! Sources hand us GeoJSON points (as objects, or as JSON text in CSV
//! exports). The dataset stores the WKT form, e.g. `POINT (-86.64 32.53)`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

const NUMBER: &str = r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?";

/// `POINT (x y)`, optionally with Z/M ordinates.
static WKT_POINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^\s*POINT\s*(?:ZM|Z|M)?\s*\(\s*({n})\s+({n})(?:\s+{n}){{0,2}}\s*\)\s*$",
        n = NUMBER
    ))
    .expect("WKT point pattern is valid")
});

/// Why a geometry could not be converted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("geometry is null")]
    Missing,

    #[error("expected a Point geometry, found {0}")]
    NotAPoint(String),

    #[error("invalid coordinates: {0}")]
    BadCoordinates(String),

    #[error("unreadable geometry text: {0}")]
    Unreadable(String),
}

/// A 2D point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Build a point from a GeoJSON value.
    ///
    /// Accepts a GeoJSON object, GeoJSON text, or text that is already a
    /// WKT point.
    pub fn from_geojson(value: &Value) -> Result<Self, GeometryError> {
        match value {
            Value::Null => Err(GeometryError::Missing),
            Value::Object(obj) => {
                let kind = obj.get("type").and_then(|t| t.as_str()).unwrap_or("");
                if kind != "Point" {
                    let found = if kind.is_empty() { "untyped object" } else { kind };
                    return Err(GeometryError::NotAPoint(found.to_string()));
                }
                let coords = obj
                    .get("coordinates")
                    .and_then(|c| c.as_array())
                    .ok_or_else(|| GeometryError::BadCoordinates("no coordinates array".into()))?;
                if coords.len() < 2 {
                    return Err(GeometryError::BadCoordinates(format!(
                        "{} ordinate(s)",
                        coords.len()
                    )));
                }
                let x = finite(coords[0].as_f64())?;
                let y = finite(coords[1].as_f64())?;
                Ok(Self { x, y })
            }
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(GeometryError::Missing);
                }
                if trimmed.starts_with('{') {
                    let parsed: Value = serde_json::from_str(trimmed)
                        .map_err(|e| GeometryError::Unreadable(e.to_string()))?;
                    return Self::from_geojson(&parsed);
                }
                parse_wkt_point(trimmed)
                    .ok_or_else(|| GeometryError::Unreadable(truncate(trimmed)))
            }
            other => Err(GeometryError::Unreadable(truncate(&other.to_string()))),
        }
    }

    /// WKT text form.
    pub fn to_wkt(&self) -> String {
        format!("POINT ({} {})", self.x, self.y)
    }
}

fn finite(ordinate: Option<f64>) -> Result<f64, GeometryError> {
    match ordinate {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(GeometryError::BadCoordinates(v.to_string())),
        None => Err(GeometryError::BadCoordinates("non-numeric ordinate".into())),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(60).collect()
}

/// Parse WKT text as a point. Returns `None` for anything else.
pub fn parse_wkt_point(text: &str) -> Option<Point> {
    let caps = WKT_POINT.captures(text)?;
    let x: f64 = caps.get(1)?.as_str().parse().ok()?;
    let y: f64 = caps.get(2)?.as_str().parse().ok()?;
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some(Point { x, y })
}

/// Serialize a source geometry to WKT.
pub fn serialize_to_wkt(value: &Value) -> Result<String, GeometryError> {
    Point::from_geojson(value).map(|p| p.to_wkt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_geojson_object_to_wkt() {
        let geometry = json!({ "type": "Point", "coordinates": [-86.642762, 32.534929] });
        assert_eq!(
            serialize_to_wkt(&geometry).unwrap(),
            "POINT (-86.642762 32.534929)"
        );
    }

    #[test]
    fn test_geojson_text_to_wkt() {
        let geometry = json!(r#"{"type":"Point","coordinates":[10,20.5]}"#);
        assert_eq!(serialize_to_wkt(&geometry).unwrap(), "POINT (10 20.5)");
    }

    #[test]
    fn test_polygon_rejected() {
        let geometry = json!({ "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]] });
        assert_eq!(
            serialize_to_wkt(&geometry),
            Err(GeometryError::NotAPoint("Polygon".into()))
        );
    }

    #[test]
    fn test_missing_and_garbage() {
        assert_eq!(serialize_to_wkt(&Value::Null), Err(GeometryError::Missing));
        assert!(matches!(
            serialize_to_wkt(&json!("somewhere")),
            Err(GeometryError::Unreadable(_))
        ));
        assert!(matches!(
            serialize_to_wkt(&json!({ "type": "Point", "coordinates": [1] })),
            Err(GeometryError::BadCoordinates(_))
        ));
    }

    #[test]
    fn test_parse_wkt_point_variants() {
        assert_eq!(parse_wkt_point("POINT (1 2)"), Some(Point { x: 1.0, y: 2.0 }));
        assert_eq!(parse_wkt_point("point(-1.5 2e1)"), Some(Point { x: -1.5, y: 20.0 }));
        assert!(parse_wkt_point("POINT Z (1 2 3)").is_some());
        assert!(parse_wkt_point("POINT EMPTY").is_none());
        assert!(parse_wkt_point("LINESTRING (1 2, 3 4)").is_none());
        assert!(parse_wkt_point("POINT (1)").is_none());
        assert!(parse_wkt_point("").is_none());
    }

    #[test]
    fn test_wkt_round_trips_through_parser() {
        let point = Point { x: -122.33, y: 47.61 };
        assert_eq!(parse_wkt_point(&point.to_wkt()), Some(point));
    }
}
