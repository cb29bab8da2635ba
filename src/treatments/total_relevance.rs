//! Treatment: total relevance normalisation

use super::{Treatment, TreatmentContext};
use crate::graph::{Row, WeightedGraph};
use std::collections::HashMap;

/// Divides each weight by the neighbour's total weight across the graph
///
/// Where [`super::DegreeNorm`] dampens by how many rows a neighbour is in,
/// this dampens by its aggregate co-install mass. A neighbour whose total
/// is zero is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TotalRelevanceNorm;

impl Treatment for TotalRelevanceNorm {
    fn treat(&self, graph: &WeightedGraph, _ctx: &TreatmentContext) -> WeightedGraph {
        let mut totals: HashMap<&str, f64> = HashMap::new();
        for (_, row) in graph.rows() {
            for (neighbor, weight) in row {
                *totals.entry(neighbor.as_str()).or_insert(0.0) += weight;
            }
        }

        graph
            .rows()
            .map(|(key, row)| {
                let treated: Row = row
                    .iter()
                    .filter_map(|(neighbor, weight)| {
                        let total = totals.get(neighbor.as_str()).copied().unwrap_or(0.0);
                        if total <= 0.0 {
                            tracing::warn!(
                                row = %key,
                                neighbor = %neighbor,
                                "neighbour has no co-install mass, dropping"
                            );
                            return None;
                        }
                        Some((neighbor.clone(), weight / total))
                    })
                    .collect();
                (key.clone(), treated)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "total-relevance-norm"
    }
}
