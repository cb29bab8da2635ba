//! Treatment: none

use super::{Treatment, TreatmentContext};
use crate::graph::WeightedGraph;

/// Returns the co-installation graph unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTreatment;

impl Treatment for NoTreatment {
    fn treat(&self, graph: &WeightedGraph, _ctx: &TreatmentContext) -> WeightedGraph {
        graph.clone()
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
