//! Popularity ranking table
//!
//! Maps an item key to its install count. Used as the secondary ranking key
//! and to derive the minimum-install floor; never as a primary weight.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fraction of the mean install count that a neighbour must reach
pub const MIN_INSTALL_FRACTION: f64 = 0.05;

/// Item key -> install count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankingTable {
    installs: BTreeMap<String, u64>,
}

impl RankingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install count for `key`; unknown keys count as 0
    pub fn popularity(&self, key: &str) -> u64 {
        self.installs.get(key).copied().unwrap_or(0)
    }

    pub fn insert(&mut self, key: impl Into<String>, installs: u64) {
        self.installs.insert(key.into(), installs);
    }

    pub fn len(&self) -> usize {
        self.installs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installs.is_empty()
    }

    /// Mean install count, `None` for an empty table
    pub fn mean(&self) -> Option<f64> {
        if self.installs.is_empty() {
            return None;
        }
        let total: f64 = self.installs.values().map(|&v| v as f64).sum();
        Some(total / self.installs.len() as f64)
    }

    /// Floor install count: 5% of the mean over the whole table
    ///
    /// An empty table yields no floor at all (0.0).
    pub fn min_install_floor(&self) -> f64 {
        self.mean().map(|m| m * MIN_INSTALL_FRACTION).unwrap_or(0.0)
    }
}

impl FromIterator<(String, u64)> for RankingTable {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            installs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_popularity_defaults_to_zero() {
        let table: RankingTable = serde_json::from_str(r#"{"a": 80, "b": 100}"#).unwrap();
        assert_eq!(table.popularity("b"), 100);
        assert_eq!(table.popularity("missing"), 0);
    }

    #[test]
    fn test_min_install_floor() {
        let table: RankingTable =
            serde_json::from_str(r#"{"a": 10000, "b": 9000, "c": 8000, "d": 7}"#).unwrap();
        // mean = 27007 / 4
        let expected = 27007.0 / 4.0 * 0.05;
        assert!((table.min_install_floor() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_empty_table_has_no_floor() {
        let table = RankingTable::new();
        assert_eq!(table.mean(), None);
        assert_eq!(table.min_install_floor(), 0.0);
    }
}
