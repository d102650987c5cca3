//! Pipeline configuration.
//!
//! Two layers:
//!
//! - [`SocrataSettings`] - target dataset, from the environment (`.env` honoured)
//! - [`PipelineConfig`] - the sources to load, from a JSON file or the built-in
//!   ACS5 definition
//!
//! ```json
//! {
//!   "sources": [{
//!     "name": "ACS5",
//!     "input": "sources/acs5.csv",
//!     "reference": "sources/acs5_labels.csv",
//!     "variables": ["DP05_0017E", "DP05_0018E"],
//!     "years": [2015, 2016, 2017, 2018],
//!     "geography": { "for_geo": "county:*", "in_geo": "state:*" },
//!     "boundary_rules": [
//!       { "old_code": "DP05_0017E", "new_code": "DP05_0018E", "boundary_year": 2017 }
//!     ],
//!     "malformed_geometry": "drop_row"
//!   }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};
use crate::publish::DatasetHandle;
use crate::sources::{acs5, FetchRequest, GeoScope};
use crate::transform::normalize::{GeometryPolicy, NormalizerConfig};
use crate::transform::rules::BoundaryRule;

/// Default Socrata domain.
pub const DEFAULT_DOMAIN: &str = "nhit-odp.data.socrata.com";
/// Default dataset id.
pub const DEFAULT_DATASET_ID: &str = "enbi-fu9w";

pub const DOMAIN_VAR: &str = "SOCRATA_DOMAIN";
pub const DATASET_ID_VAR: &str = "SOCRATA_DATASET_ID";

// =============================================================================
// Environment
// =============================================================================

/// Where tables are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocrataSettings {
    pub domain: String,
    pub dataset_id: String,
}

impl Default for SocrataSettings {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            dataset_id: DEFAULT_DATASET_ID.to_string(),
        }
    }
}

impl SocrataSettings {
    /// Read `SOCRATA_DOMAIN` and `SOCRATA_DATASET_ID`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            domain: non_empty_var(DOMAIN_VAR).unwrap_or(defaults.domain),
            dataset_id: non_empty_var(DATASET_ID_VAR).unwrap_or(defaults.dataset_id),
        }
    }

    pub fn dataset(&self) -> DatasetHandle {
        DatasetHandle::new(&self.domain, &self.dataset_id)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    dotenvy::var(name).ok().filter(|v| !v.trim().is_empty())
}

// =============================================================================
// Sources
// =============================================================================

/// One source to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Value written to the `source` column.
    pub name: String,
    /// Raw table file.
    pub input: PathBuf,
    /// Reference labels CSV.
    pub reference: PathBuf,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub years: Vec<i64>,
    #[serde(default)]
    pub geography: GeoScope,
    #[serde(default)]
    pub boundary_rules: Vec<BoundaryRule>,
    #[serde(default)]
    pub malformed_geometry: GeometryPolicy,
}

impl SourceDefinition {
    /// The built-in ACS5 source.
    pub fn acs5() -> Self {
        Self {
            name: acs5::SOURCE_NAME.to_string(),
            input: PathBuf::from(acs5::DEFAULT_INPUT),
            reference: PathBuf::from(acs5::DEFAULT_REFERENCE),
            variables: acs5::variables(),
            years: acs5::YEARS.to_vec(),
            geography: acs5::request().geography,
            boundary_rules: acs5::boundary_rules(),
            malformed_geometry: GeometryPolicy::default(),
        }
    }

    pub fn request(&self) -> FetchRequest {
        FetchRequest {
            variables: self.variables.clone(),
            years: self.years.clone(),
            geography: self.geography.clone(),
        }
    }

    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            source_name: self.name.clone(),
            boundary_rules: self.boundary_rules.clone(),
            malformed_geometry: self.malformed_geometry,
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.input.is_relative() {
            self.input = base.join(&self.input);
        }
        if self.reference.is_relative() {
            self.reference = base.join(&self.reference);
        }
    }
}

/// Sources processed by a run, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub sources: Vec<SourceDefinition>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: vec![SourceDefinition::acs5()],
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration document. Relative paths are kept as written.
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a configuration file. Relative source paths are resolved against
    /// the file's directory.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_json_str(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for source in &mut config.sources {
            source.resolve_paths(base);
        }
        Ok(config)
    }

    /// Load `path` when given, otherwise the built-in sources.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Look up a source by name (case-insensitive).
    pub fn source(&self, name: &str) -> ConfigResult<&SourceDefinition> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownSource(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_acs5() {
        let config = PipelineConfig::default();
        assert_eq!(config.sources.len(), 1);

        let acs5 = &config.sources[0];
        assert_eq!(acs5.name, "ACS5");
        assert_eq!(acs5.years, vec![2015, 2016, 2017, 2018]);
        assert_eq!(acs5.boundary_rules.len(), 2);
        assert_eq!(acs5.malformed_geometry, GeometryPolicy::DropRow);
        assert_eq!(acs5.request().geography.level(), "county");
    }

    #[test]
    fn test_from_json_with_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{"sources": [{"name": "ACS1", "input": "acs1.json", "reference": "labels.csv",
                "malformed_geometry": "fail_source"}]}"#,
        )
        .unwrap();

        let source = config.source("acs1").unwrap();
        assert_eq!(source.malformed_geometry, GeometryPolicy::FailSource);
        assert!(source.boundary_rules.is_empty());
        assert_eq!(source.geography, GeoScope::default());
        assert_eq!(source.normalizer_config().source_name, "ACS1");
    }

    #[test]
    fn test_unknown_source() {
        let err = PipelineConfig::default().source("BLS").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSource(ref n) if n == "BLS"));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let err = PipelineConfig::from_json_str(
            r#"{"sources": [{"name": "X", "input": "x.csv", "reference": "r.csv",
                "malformed_geometry": "ignore"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"sources": [{{"name": "ACS5", "input": "data/acs5.csv", "reference": "/abs/labels.csv"}}]}}"#
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.sources[0].input, dir.path().join("data/acs5.csv"));
        assert_eq!(config.sources[0].reference, PathBuf::from("/abs/labels.csv"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PipelineConfig::load("/nonexistent/pipeline.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pipeline.json"));
    }

    #[test]
    fn test_settings_dataset() {
        let settings = SocrataSettings::default();
        assert_eq!(settings.dataset().ui_url(), "https://nhit-odp.data.socrata.com/d/enbi-fu9w");
    }
}
