//! Treatment: proportional total relevance normalisation

use super::{normalize_row, Treatment, TreatmentContext};
use crate::graph::{Row, WeightedGraph};
use std::collections::HashMap;

/// Row-normalises every row, then divides each neighbour by the sum of its
/// row-normalised weights across every row it appears in
///
/// Equalises both the per-row scale and the per-neighbour scale, which makes
/// it the default production treatment. Worked example for `guid-1` in the
/// `guid-2` row of the test graph:
///
/// ```text
/// numerator   = 50/150                       (guid-2 row)
/// denominator = 50/150 + 100/210 + 5/305     (guid-2, guid-3, guid-6 rows)
/// weight      = 0.4035916824196597
/// ```
///
/// Rows summing to zero contribute nothing; a neighbour whose proportional
/// sum is zero is dropped with a warning instead of dividing by zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProportionalTotalRelevanceNorm;

impl Treatment for ProportionalTotalRelevanceNorm {
    fn treat(&self, graph: &WeightedGraph, _ctx: &TreatmentContext) -> WeightedGraph {
        let normalized: Vec<(&String, Option<Row>)> = graph
            .rows()
            .map(|(key, row)| (key, normalize_row(row)))
            .collect();

        let mut proportional_sums: HashMap<&str, f64> = HashMap::new();
        for (key, row) in &normalized {
            match row {
                Some(row) => {
                    for (neighbor, share) in row {
                        *proportional_sums.entry(neighbor.as_str()).or_insert(0.0) += share;
                    }
                }
                None => tracing::warn!(row = %key, "row weights sum to zero, skipping"),
            }
        }

        normalized
            .iter()
            .map(|(key, row)| {
                let treated: Row = row
                    .iter()
                    .flatten()
                    .filter_map(|(neighbor, share)| {
                        let norm_sum = proportional_sums
                            .get(neighbor.as_str())
                            .copied()
                            .unwrap_or(0.0);
                        if norm_sum <= 0.0 {
                            tracing::warn!(
                                row = %key,
                                neighbor = %neighbor,
                                "proportional weight sum is zero, dropping neighbour"
                            );
                            return None;
                        }
                        Some((neighbor.clone(), share / norm_sum))
                    })
                    .collect();
                ((*key).clone(), treated)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "proportional-total-relevance-norm"
    }
}
