//! Boundary rules for variables whose meaning changed between years.
//!
//! The Census Bureau sometimes renumbers a variable: from 2017 on, median age
//! is `DP05_0018E`, while before that `DP05_0018E` measured something else.
//! A rule `(old_code, new_code, boundary_year)` keeps each code only on its
//! side of the boundary:
//!
//! ```text
//! old_code:  kept for year <  boundary_year, dropped for year >= boundary_year
//! new_code:  dropped for year < boundary_year, kept for year >= boundary_year
//! ```

use serde::{Deserialize, Serialize};

/// One renumbering rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryRule {
    /// Code valid before the boundary.
    pub old_code: String,
    /// Code valid from the boundary on.
    pub new_code: String,
    /// First year in which `new_code` applies.
    pub boundary_year: i64,
}

impl BoundaryRule {
    pub fn new(old_code: impl Into<String>, new_code: impl Into<String>, boundary_year: i64) -> Self {
        Self {
            old_code: old_code.into(),
            new_code: new_code.into(),
            boundary_year,
        }
    }

    /// Whether an observation of `variable` in `year` is on the wrong side.
    pub fn excludes(&self, variable: &str, year: i64) -> bool {
        (variable == self.old_code && year >= self.boundary_year)
            || (variable == self.new_code && year < self.boundary_year)
    }
}

/// Whether any rule excludes the observation.
///
/// Rows without a readable year are never excluded here; the schema validator
/// rejects them later.
pub fn is_superseded(rules: &[BoundaryRule], variable: Option<&str>, year: Option<i64>) -> bool {
    match (variable, year) {
        (Some(variable), Some(year)) => rules.iter().any(|r| r.excludes(variable, year)),
        _ => false,
    }
}
