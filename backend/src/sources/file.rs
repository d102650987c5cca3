//! File-backed source fetcher.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{FetchRequest, SourceFetcher};
use crate::error::{FetchError, FetchResult};
use crate::logs::{log_info_indent, log_warning};
use crate::models::RawTable;
use crate::parser::parse_file_auto;
use crate::transform::normalize::{integer, text};

/// Reads a raw table exported from the statistical API.
///
/// The file holds the query result for one source (CSV or a JSON array of
/// objects, encoding and delimiter detected). The request narrows it:
///
/// - `variables` against `variable_code`
/// - `years` against `year`
/// - the geography level of `for_geo` against `geo_type`
///
/// A filter applies only when its request list is non-empty and its column
/// exists; a missing column is left for the normalizer to report.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SourceFetcher for FileFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<RawTable> {
        let parsed = parse_file_auto(&self.path).await?;
        log_info_indent(
            format!(
                "Read {} raw rows from {} ({})",
                parsed.table.len(),
                self.path.display(),
                parsed.encoding
            ),
            1,
        );

        let (table, unreadable) = filter_table(parsed.table, request);
        if unreadable > 0 {
            log_warning(format!(
                "{} raw rows have a null or unreadable variable_code, year or geo_type; kept for validation",
                unreadable
            ));
        }
        if table.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(table)
    }
}

/// Keep the records matching the request.
///
/// Only a readable field that differs from the request excludes a record.
/// Records whose filter fields are null or unreadable are kept, so the
/// validator rejects the table instead of the row vanishing; their count is
/// returned alongside the table.
pub fn filter_table(table: RawTable, request: &FetchRequest) -> (RawTable, usize) {
    let by_variable = !request.variables.is_empty() && table.has_column("variable_code");
    let by_year = !request.years.is_empty() && table.has_column("year");
    let level = request.geography.level();
    let by_level = !level.is_empty() && table.has_column("geo_type");

    let RawTable { headers, records } = table;
    let mut unreadable = 0;
    let records = records
        .into_iter()
        .filter(|record| {
            let checks = [
                by_variable.then(|| text(record, "variable_code").map(|v| request.variables.contains(&v))),
                by_year.then(|| integer(record, "year").map(|y| request.years.contains(&y))),
                by_level.then(|| text(record, "geo_type").map(|v| v.eq_ignore_ascii_case(level))),
            ];
            if checks.iter().flatten().any(|m| *m == Some(false)) {
                return false;
            }
            if checks.iter().flatten().any(Option::is_none) {
                unreadable += 1;
            }
            true
        })
        .collect();

    (RawTable { headers, records }, unreadable)
}
