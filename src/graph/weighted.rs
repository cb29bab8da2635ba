//! Weighted co-installation graph
//!
//! The same shape carries raw co-install counts as decoded from the object
//! store and the floating-point weights produced by treatments:
//!
//! ```text
//! {
//!     "guid_a": {"guid_b": 10, "guid_c": 13},
//!     "guid_b": {"guid_a": 10, "guid_c": 4},
//!     "guid_c": {"guid_a": 13, "guid_b": 4}
//! }
//! ```
//!
//! Rows and neighbours are kept in key order so every whole-graph sum is
//! accumulated in the same order on every build.

use crate::{Result, TaarLiteError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Neighbour key -> weight for one source row
pub type Row = BTreeMap<String, f64>;

/// Item key -> (neighbour key -> weight)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightedGraph {
    rows: BTreeMap<String, Row>,
}

impl WeightedGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the row for a source key
    pub fn row(&self, key: &str) -> Option<&Row> {
        self.rows.get(key)
    }

    /// Whether the graph has a row for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    /// Insert (or replace) a row
    pub fn insert_row(&mut self, key: impl Into<String>, row: Row) {
        self.rows.insert(key.into(), row);
    }

    /// Iterate rows in key order
    pub fn rows(&self) -> impl Iterator<Item = (&String, &Row)> {
        self.rows.iter()
    }

    /// Iterate source keys in order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.rows.keys()
    }

    /// Number of source rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total number of (row, neighbour) entries
    pub fn edge_count(&self) -> usize {
        self.rows.values().map(|row| row.len()).sum()
    }

    /// Check every weight is a finite, non-negative number
    ///
    /// Rankings over NaN or negative weights are meaningless, so this is the
    /// gate a recommender passes before it is built.
    pub fn validate(&self) -> Result<()> {
        for (row_key, row) in &self.rows {
            for (neighbor, &value) in row {
                if !value.is_finite() || value < 0.0 {
                    return Err(TaarLiteError::InvalidGraph {
                        row: row_key.clone(),
                        neighbor: neighbor.clone(),
                        value,
                    });
                }
            }
        }
        Ok(())
    }

    /// Pairs `(a, b)` with `a < b` whose weights differ in the two directions
    ///
    /// A missing reverse edge counts as weight 0. The source data is expected
    /// to be symmetric, but nothing downstream depends on it, so this is only
    /// a diagnostic.
    pub fn asymmetric_pairs(&self, tolerance: f64) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (a, row) in &self.rows {
            for (b, &forward) in row {
                let backward = self.weight(b, a).unwrap_or(0.0);
                if (forward - backward).abs() > tolerance {
                    let pair = if a < b {
                        (a.clone(), b.clone())
                    } else {
                        (b.clone(), a.clone())
                    };
                    pairs.push(pair);
                }
            }
        }
        pairs.sort();
        pairs.dedup();
        pairs
    }

    /// Weight of the `row -> neighbor` edge, if present
    pub fn weight(&self, row: &str, neighbor: &str) -> Option<f64> {
        self.rows.get(row).and_then(|r| r.get(neighbor)).copied()
    }
}

impl FromIterator<(String, Row)> for WeightedGraph {
    fn from_iter<I: IntoIterator<Item = (String, Row)>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, Row>> for WeightedGraph {
    fn from(rows: BTreeMap<String, Row>) -> Self {
        Self { rows }
    }
}
