//! American Community Survey 5-year estimates.
//!
//! Variable codes, years, geography and boundary rules requested for the
//! Citizen Connect dataset.

use super::{FetchRequest, GeoScope};
use crate::transform::rules::BoundaryRule;

/// Value written to the `source` column.
pub const SOURCE_NAME: &str = "ACS5";

/// Years requested.
pub const YEARS: [i64; 4] = [2015, 2016, 2017, 2018];

/// Default raw table export.
pub const DEFAULT_INPUT: &str = "sources/acs5.csv";

/// Default reference labels.
pub const DEFAULT_REFERENCE: &str = "sources/acs5_labels.csv";

const FIXED_VARIABLES: &[&str] = &[
    // Median age
    "DP05_0017E",
    "DP05_0018E",
    // Population 60 years and older
    "S0101_C01_026E",
    "S0101_C01_028E",
    // Population by sex
    "DP05_0002E",
    "DP05_0003E",
    // Median household income
    "S1903_C03_001E",
    // Population below poverty level
    "S1701_C02_001E",
    // Foreign born
    "DP02_0092E",
    // Non-citizens
    "DP02_0095E",
    // High school graduate or higher
    "S1501_C01_014E",
    // With a disability
    "S1810_C02_001E",
    // Households with no internet access
    "B28002_013E",
];

/// Language spoken at home, every third line of C16001.
const LANGUAGE_VARIABLES: &[&str] = &[
    "C16001_002E",
    "C16001_003E",
    "C16001_006E",
    "C16001_009E",
    "C16001_012E",
    "C16001_015E",
    "C16001_018E",
    "C16001_021E",
    "C16001_024E",
    "C16001_027E",
    "C16001_030E",
    "C16001_033E",
    "C16001_036E",
];

fn numbered(table: &str, range: std::ops::Range<u32>) -> impl Iterator<Item = String> + '_ {
    range.map(move |n| format!("{}_{:03}E", table, n))
}

/// Every variable code requested from ACS5.
pub fn variables() -> Vec<String> {
    let mut codes: Vec<String> = FIXED_VARIABLES.iter().map(|v| v.to_string()).collect();
    // Race
    codes.extend(numbered("B02001", 2..9));
    // Civilian occupation, 16 years and older
    codes.extend(numbered("S2401_C01", 2..37));
    // Ancestry
    codes.extend(numbered("B04006", 2..108));
    codes.extend(LANGUAGE_VARIABLES.iter().map(|v| v.to_string()));
    codes
}

/// Codes renumbered in 2017.
pub fn boundary_rules() -> Vec<BoundaryRule> {
    vec![
        // Median age
        BoundaryRule::new("DP05_0017E", "DP05_0018E", 2017),
        // Population 60 years and older
        BoundaryRule::new("S0101_C01_026E", "S0101_C01_028E", 2017),
    ]
}

/// The ACS5 query: counties in every state.
pub fn request() -> FetchRequest {
    FetchRequest {
        variables: variables(),
        years: YEARS.to_vec(),
        geography: GeoScope::new("county:*", Some("state:*")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::rules::is_superseded;
    use std::collections::HashSet;

    #[test]
    fn test_variable_list() {
        let codes = variables();
        assert_eq!(codes.len(), 13 + 7 + 35 + 106 + 13);
        assert!(codes.contains(&"B02001_002E".to_string()));
        assert!(codes.contains(&"B02001_008E".to_string()));
        assert!(!codes.contains(&"B02001_009E".to_string()));
        assert!(codes.contains(&"S2401_C01_036E".to_string()));
        assert!(codes.contains(&"B04006_107E".to_string()));

        let unique: HashSet<&String> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn test_rules_cover_renumbered_codes() {
        let rules = boundary_rules();
        assert!(is_superseded(&rules, Some("S0101_C01_028E"), Some(2016)));
        assert!(is_superseded(&rules, Some("S0101_C01_026E"), Some(2018)));
        assert!(!is_superseded(&rules, Some("S0101_C01_026E"), Some(2015)));
    }

    #[test]
    fn test_request() {
        let request = request();
        assert_eq!(request.years, vec![2015, 2016, 2017, 2018]);
        assert_eq!(request.geography.for_geo, "county:*");
        assert_eq!(request.geography.in_geo.as_deref(), Some("state:*"));
    }
}
