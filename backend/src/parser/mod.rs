//! Raw table parsing with encoding and delimiter auto-detection.
//!
//! Turns exported source files (CSV or a JSON array of objects) into a
//! [`RawTable`]. Empty CSV cells become JSON `null`. No source-specific
//! logic lives here.

use serde_json::{Map, Value};
use std::path::Path;

use crate::error::{FetchError, FetchResult};
use crate::models::RawTable;

/// Result of parsing with metadata
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub table: RawTable,
    /// Detected encoding
    pub encoding: String,
    /// Detected delimiter (`None` for JSON input)
    pub delimiter: Option<char>,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => String::from_utf8_lossy(bytes).to_string(),
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.to_string()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.to_string(),
        _ => String::from_utf8_lossy(bytes).to_string(),
    }
}

/// Detect the delimiter by counting occurrences in the header line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse CSV text into a raw table with an explicit delimiter.
///
/// # Example
/// ```ignore
/// use citizen_connect::parser::parse_csv_str;
///
/// let table = parse_csv_str("variable_code,value\nB01001_001E,55200", ',')?;
/// assert_eq!(table.records[0]["value"], "55200");
/// ```
pub fn parse_csv_str(content: &str, delimiter: char) -> FetchResult<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| FetchError::Parse(format!("Cannot read header: {}", e)))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(FetchError::Parse("No headers found".to_string()));
    }

    let mut records = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // +1 for 0-index, +1 for header
        let line = idx + 2;
        let row = result.map_err(|e| FetchError::Parse(format!("Line {}: {}", line, e)))?;

        if row.iter().all(|cell| cell.is_empty()) {
            continue;
        }

        let mut obj = Map::new();
        for (i, header) in headers.iter().enumerate() {
            let value = match row.get(i) {
                Some(cell) if !cell.is_empty() => Value::String(cell.to_string()),
                _ => Value::Null,
            };
            obj.insert(header.clone(), value);
        }
        records.push(obj);
    }

    Ok(RawTable { headers, records })
}

/// Parse a JSON array of objects into a raw table.
pub fn parse_json_str(content: &str) -> FetchResult<RawTable> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| FetchError::Parse(e.to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        _ => return Err(FetchError::Parse("expected a JSON array of records".into())),
    };

    let mut records = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(obj) => records.push(obj),
            other => {
                return Err(FetchError::Parse(format!(
                    "record {} is not an object: {}",
                    idx,
                    other
                )))
            }
        }
    }

    Ok(RawTable::from_records(records))
}

/// Parse bytes with auto-detection of encoding, format and delimiter.
pub fn parse_bytes_auto(bytes: &[u8]) -> FetchResult<ParseResult> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(FetchError::Empty);
    }

    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);

    if content.trim_start().starts_with('[') {
        let table = parse_json_str(&content)?;
        return Ok(ParseResult { table, encoding, delimiter: None });
    }

    let delimiter = detect_delimiter(&content);
    let table = parse_csv_str(&content, delimiter)?;
    Ok(ParseResult { table, encoding, delimiter: Some(delimiter) })
}

/// Read and parse a raw table file.
pub async fn parse_file_auto(path: &Path) -> FetchResult<ParseResult> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") | Some("tsv") | Some("txt") | Some("json") | None => {}
        Some(other) => return Err(FetchError::UnsupportedFormat(other.to_string())),
    }
    let bytes = tokio::fs::read(path).await?;
    parse_bytes_auto(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_csv() {
        let csv = "variable_code,value\nB01001_001E,55200\nB01001_002E,26800";
        let table = parse_csv_str(csv, ',').unwrap();

        assert_eq!(table.headers, vec!["variable_code", "value"]);
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[0]["variable_code"], "B01001_001E");
        assert_eq!(table.records[1]["value"], "26800");
    }

    #[test]
    fn test_quoted_values_keep_delimiters() {
        let csv = "name,value\n\"Autauga County, Alabama\",12";
        let table = parse_csv_str(csv, ',').unwrap();

        assert_eq!(table.records[0]["name"], "Autauga County, Alabama");
    }

    #[test]
    fn test_empty_cells_are_null() {
        let csv = "a,b,c\n1,,3";
        let table = parse_csv_str(csv, ',').unwrap();

        assert_eq!(table.records[0]["b"], Value::Null);
        assert_eq!(table.records[0]["c"], "3");
    }

    #[test]
    fn test_short_rows_fill_with_null() {
        let csv = "a,b,c\n1";
        let table = parse_csv_str(csv, ',').unwrap();

        assert_eq!(table.records[0]["a"], "1");
        assert_eq!(table.records[0]["c"], Value::Null);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let csv = "a;b\n1;2\n;\n3;4\n";
        let table = parse_csv_str(csv, ';').unwrap();

        assert_eq!(table.records.len(), 2);
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
        assert_eq!(detect_delimiter("a|b|c\n1|2|3"), '|');
    }

    #[test]
    fn test_auto_parse_csv() {
        let csv = "variable_code;value\nX;1\nY;2";
        let result = parse_bytes_auto(csv.as_bytes()).unwrap();

        assert_eq!(result.delimiter, Some(';'));
        assert_eq!(result.table.records.len(), 2);
    }

    #[test]
    fn test_auto_parse_json() {
        let json = r#"[{"variable_code": "X", "value": 1.5, "geometry": {"type": "Point", "coordinates": [1, 2]}}]"#;
        let result = parse_bytes_auto(json.as_bytes()).unwrap();

        assert_eq!(result.delimiter, None);
        assert!(result.table.has_column("geometry"));
        assert_eq!(result.table.records[0]["value"], 1.5);
    }

    #[test]
    fn test_json_must_be_array_of_objects() {
        assert!(parse_json_str(r#"{"a": 1}"#).is_err());
        assert!(parse_json_str(r#"[1, 2]"#).is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(parse_bytes_auto(b"  \n"), Err(FetchError::Empty)));
    }

    #[test]
    fn test_latin1_decoding() {
        // "Doña Ana" in ISO-8859-1
        let bytes: &[u8] = &[0x44, 0x6F, 0xF1, 0x61, 0x20, 0x41, 0x6E, 0x61];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert_eq!(decoded, "Doña Ana");
    }
}
