//! Reference metadata keyed by variable code.
//!
//! Each source ships a labels file (`sources/<source>_labels.csv`) with
//! cleaned-up topics, concepts and labels for the variables it requests:
//!
//! ```text
//! variable,topic,concept,label,denominator_variable,denominator_label
//! DP05_0018E,Age,Median age,Median age (years),,
//! ```
//!
//! The table is read once and only looked up afterwards.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

/// Metadata for one variable code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub variable: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub topic: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub concept: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub denominator_variable: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub denominator_label: Option<String>,
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}

/// Read-only lookup from variable code to [`ReferenceEntry`].
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: HashMap<String, ReferenceEntry>,
}

impl ReferenceTable {
    /// Build a table from entries. Later duplicates replace earlier ones.
    pub fn new(entries: impl IntoIterator<Item = ReferenceEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| (e.variable.clone(), e))
            .collect();
        Self { entries }
    }

    /// Parse a labels CSV.
    pub fn from_csv_str(content: &str) -> ConfigResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut entries = Vec::new();
        for (idx, result) in reader.deserialize::<ReferenceEntry>().enumerate() {
            let entry = result
                .map_err(|e| ConfigError::Reference(format!("line {}: {}", idx + 2, e)))?;
            if entry.variable.is_empty() {
                return Err(ConfigError::Reference(format!(
                    "line {}: empty variable code",
                    idx + 2
                )));
            }
            entries.push(entry);
        }

        Ok(Self::new(entries))
    }

    /// Load a labels CSV from disk.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_csv_str(&content)
    }

    /// Look up a variable code.
    pub fn get(&self, variable: &str) -> Option<&ReferenceEntry> {
        self.entries.get(variable)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
