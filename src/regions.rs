//! Static catalog of forecast regions
//!
//! One entry per prefectural forecast office of the Japan Meteorological
//! Agency, in JIS prefecture order. Hokkaido is represented by the
//! Ishikari/Sorachi/Shiribeshi office and Kagoshima by its mainland office.

use crate::AdvisoryError;
use serde::{Deserialize, Serialize};

/// A forecast region
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub code: String,
    pub display_name: String,
}

impl Region {
    fn from_entry(&(code, name): &(&str, &str)) -> Self {
        Self {
            code: code.to_string(),
            display_name: name.to_string(),
        }
    }
}

const CATALOG: [(&str, &str); 47] = [
    ("016000", "Hokkaido"),
    ("020000", "Aomori"),
    ("030000", "Iwate"),
    ("040000", "Miyagi"),
    ("050000", "Akita"),
    ("060000", "Yamagata"),
    ("070000", "Fukushima"),
    ("080000", "Ibaraki"),
    ("090000", "Tochigi"),
    ("100000", "Gunma"),
    ("110000", "Saitama"),
    ("120000", "Chiba"),
    ("130000", "Tokyo"),
    ("140000", "Kanagawa"),
    ("150000", "Niigata"),
    ("160000", "Toyama"),
    ("170000", "Ishikawa"),
    ("180000", "Fukui"),
    ("190000", "Yamanashi"),
    ("200000", "Nagano"),
    ("210000", "Gifu"),
    ("220000", "Shizuoka"),
    ("230000", "Aichi"),
    ("240000", "Mie"),
    ("250000", "Shiga"),
    ("260000", "Kyoto"),
    ("270000", "Osaka"),
    ("280000", "Hyogo"),
    ("290000", "Nara"),
    ("300000", "Wakayama"),
    ("310000", "Tottori"),
    ("320000", "Shimane"),
    ("330000", "Okayama"),
    ("340000", "Hiroshima"),
    ("350000", "Yamaguchi"),
    ("360000", "Tokushima"),
    ("370000", "Kagawa"),
    ("380000", "Ehime"),
    ("390000", "Kochi"),
    ("400000", "Fukuoka"),
    ("410000", "Saga"),
    ("420000", "Nagasaki"),
    ("430000", "Kumamoto"),
    ("440000", "Oita"),
    ("450000", "Miyazaki"),
    ("460100", "Kagoshima"),
    ("471000", "Okinawa"),
];

const SMOKE_TEST_CODES: [&str; 4] = ["016000", "130000", "270000", "471000"];

/// Read-only access to the region list
#[derive(Debug, Clone)]
pub struct RegionCatalog {
    regions: Vec<Region>,
}

impl Default for RegionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regions: CATALOG.iter().map(Region::from_entry).collect(),
        }
    }

    #[must_use]
    pub fn all(&self) -> &[Region] {
        &self.regions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    #[must_use]
    pub fn find(&self, code: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.code == code)
    }

    /// Resolve a set of codes, preserving catalog order. Unknown codes are rejected.
    pub fn select<S: AsRef<str>>(&self, codes: &[S]) -> Result<Vec<Region>, AdvisoryError> {
        let unknown: Vec<&str> = codes
            .iter()
            .map(|c| c.as_ref())
            .filter(|code| self.find(code).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(AdvisoryError::validation(format!(
                "unknown region code(s): {}",
                unknown.join(", ")
            )));
        }

        Ok(self
            .regions
            .iter()
            .filter(|r| codes.iter().any(|c| c.as_ref() == r.code))
            .cloned()
            .collect())
    }

    /// Fixed four-region set spanning the country, for smoke runs
    #[must_use]
    pub fn smoke_test(&self) -> Vec<Region> {
        self.regions
            .iter()
            .filter(|r| SMOKE_TEST_CODES.contains(&r.code.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_all_offices() {
        let catalog = RegionCatalog::new();
        assert_eq!(catalog.len(), 47);
        assert_eq!(catalog.all()[0].code, "016000");
        assert_eq!(catalog.all()[46].display_name, "Okinawa");
    }

    #[test]
    fn test_codes_are_unique_six_digit() {
        let catalog = RegionCatalog::new();
        let mut codes: Vec<&str> = catalog.all().iter().map(|r| r.code.as_str()).collect();
        assert!(codes.iter().all(|c| c.len() == 6 && c.chars().all(|ch| ch.is_ascii_digit())));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), 47);
    }

    #[test]
    fn test_select_preserves_catalog_order() {
        let catalog = RegionCatalog::new();
        let selected = catalog.select(&["471000", "130000"]).unwrap();
        let names: Vec<_> = selected.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["Tokyo", "Okinawa"]);
    }

    #[test]
    fn test_select_rejects_unknown_codes() {
        let catalog = RegionCatalog::new();
        let err = catalog.select(&["130000", "999999"]).unwrap_err();
        assert!(matches!(err, AdvisoryError::Validation { .. }));
        assert!(err.to_string().contains("999999"));
    }

    #[test]
    fn test_smoke_test_set() {
        let catalog = RegionCatalog::new();
        let codes: Vec<_> = catalog.smoke_test().into_iter().map(|r| r.code).collect();
        assert_eq!(codes, vec!["016000", "130000", "270000", "471000"]);
    }

    #[test]
    fn test_find() {
        let catalog = RegionCatalog::new();
        assert_eq!(catalog.find("270000").map(|r| r.display_name.as_str()), Some("Osaka"));
        assert!(catalog.find("000000").is_none());
    }
}
