//! Source fetchers.
//!
//! A fetcher turns a [`FetchRequest`] (variable codes, years, geography) into
//! a [`RawTable`]. The pipeline only sees the [`SourceFetcher`] trait; how the
//! table is obtained is the fetcher's business.
//!
//! - [`FileFetcher`] - reads a raw table exported to CSV or JSON
//! - [`acs5`] - the American Community Survey 5-year source definition

pub mod acs5;
pub mod file;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchResult;
use crate::models::RawTable;

pub use file::FileFetcher;

/// Geographic scope, in Census API terms.
///
/// `for_geo` names the level to return (`county:*`), `in_geo` the level it is
/// nested in (`state:*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoScope {
    pub for_geo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_geo: Option<String>,
}

impl GeoScope {
    pub fn new(for_geo: impl Into<String>, in_geo: Option<&str>) -> Self {
        Self {
            for_geo: for_geo.into(),
            in_geo: in_geo.map(String::from),
        }
    }

    /// Geography level requested, e.g. `county` for `county:*`.
    pub fn level(&self) -> &str {
        self.for_geo.split(':').next().unwrap_or("").trim()
    }
}

impl Default for GeoScope {
    fn default() -> Self {
        Self::new("county:*", Some("state:*"))
    }
}

/// What to fetch for one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub variables: Vec<String>,
    pub years: Vec<i64>,
    #[serde(default)]
    pub geography: GeoScope,
}

/// Produces the raw table for a source.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<RawTable>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_level() {
        assert_eq!(GeoScope::default().level(), "county");
        assert_eq!(GeoScope::new("tract", None).level(), "tract");
        assert_eq!(GeoScope::new("state:06", None).level(), "state");
    }

    #[test]
    fn test_request_from_json_defaults_geography() {
        let request: FetchRequest =
            serde_json::from_str(r#"{"variables": ["B28002_013E"], "years": [2018]}"#).unwrap();
        assert_eq!(request.geography, GeoScope::default());
        assert_eq!(request.years, vec![2018]);
    }
}
