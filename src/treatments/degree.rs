//! Treatment: degree normalisation

use super::{Treatment, TreatmentContext};
use crate::graph::WeightedGraph;
use std::collections::HashMap;

/// Divides each weight by the number of rows the neighbour appears in
///
/// Dampens neighbours that are co-installed with almost everything,
/// inversely proportional to how widely they occur.
#[derive(Debug, Clone, Copy, Default)]
pub struct DegreeNorm;

impl Treatment for DegreeNorm {
    fn treat(&self, graph: &WeightedGraph, _ctx: &TreatmentContext) -> WeightedGraph {
        let mut degree: HashMap<&str, usize> = HashMap::new();
        for (_, row) in graph.rows() {
            for neighbor in row.keys() {
                *degree.entry(neighbor.as_str()).or_insert(0) += 1;
            }
        }

        graph
            .rows()
            .map(|(key, row)| {
                let treated = row
                    .iter()
                    .map(|(neighbor, weight)| {
                        // every neighbour was counted at least once above
                        let count = degree.get(neighbor.as_str()).copied().unwrap_or(1);
                        (neighbor.clone(), weight / count as f64)
                    })
                    .collect();
                (key.clone(), treated)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "degree-norm"
    }
}
