//! Graph treatments
//!
//! A treatment turns a co-installation graph into another graph of the same
//! shape with comparable weights. Treatments are chained into a [`Pipeline`]
//! and applied left to right, each one receiving the previous output.
//!
//! Treatments are pure: the only inputs beyond the graph are carried by the
//! [`TreatmentContext`], which is built once per recommender build.

mod degree;
mod none;
mod proportional;
mod propagation;
mod prune;
mod total_relevance;

pub use degree::DegreeNorm;
pub use none::NoTreatment;
pub use proportional::ProportionalTotalRelevanceNorm;
pub use propagation::Propagation;
pub use prune::MinInstallPrune;
pub use total_relevance::TotalRelevanceNorm;

use crate::graph::{RankingTable, Row, WeightedGraph};
use std::fmt;
use std::sync::Arc;

/// Floor below which the min-install threshold is reported as suspicious
pub const LOW_FLOOR_WARNING: f64 = 100.0;

/// Side inputs shared by every treatment in one build
#[derive(Debug, Clone)]
pub struct TreatmentContext {
    ranking: Arc<RankingTable>,
    min_install_floor: f64,
}

impl TreatmentContext {
    /// Build the context, deriving the min-install floor from the full table
    pub fn new(ranking: Arc<RankingTable>) -> Self {
        let min_install_floor = ranking.min_install_floor();

        if ranking.is_empty() {
            tracing::warn!("ranking table is empty, min-install pruning disabled");
        } else if min_install_floor < LOW_FLOOR_WARNING {
            tracing::warn!(
                floor = min_install_floor,
                "minimum installs threshold low: [{}]",
                min_install_floor
            );
        }

        Self {
            ranking,
            min_install_floor,
        }
    }

    pub fn ranking(&self) -> &RankingTable {
        &self.ranking
    }

    /// Shared handle to the ranking table
    pub fn shared_ranking(&self) -> Arc<RankingTable> {
        self.ranking.clone()
    }

    pub fn min_install_floor(&self) -> f64 {
        self.min_install_floor
    }
}

/// Trait for graph treatments
pub trait Treatment: Send + Sync {
    /// Transform `graph` into a graph of the same shape
    ///
    /// The output may drop rows or neighbours but never introduces a key
    /// that does not occur somewhere in `graph`.
    fn treat(&self, graph: &WeightedGraph, ctx: &TreatmentContext) -> WeightedGraph;

    /// Get the name of this treatment
    fn name(&self) -> &'static str;
}

/// Ordered chain of treatments
#[derive(Clone, Default)]
pub struct Pipeline {
    treatments: Vec<Arc<dyn Treatment>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a treatment
    pub fn then(mut self, treatment: impl Treatment + 'static) -> Self {
        self.treatments.push(Arc::new(treatment));
        self
    }

    /// Apply every treatment in order
    pub fn apply(&self, graph: &WeightedGraph, ctx: &TreatmentContext) -> WeightedGraph {
        let mut iter = self.treatments.iter();
        let mut current = match iter.next() {
            Some(first) => first.treat(graph, ctx),
            None => return graph.clone(),
        };
        for treatment in iter {
            current = treatment.treat(&current, ctx);
        }
        current
    }

    /// Treatment names in application order
    pub fn names(&self) -> Vec<&'static str> {
        self.treatments.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.treatments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.treatments.is_empty()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Divide every weight in a row by the row total
///
/// Returns `None` when the row sums to zero (or is empty), since there is no
/// meaningful proportion to take.
pub fn normalize_row(row: &Row) -> Option<Row> {
    let total: f64 = row.values().sum();
    if total <= 0.0 {
        return None;
    }
    Some(
        row.iter()
            .map(|(key, weight)| (key.clone(), weight / total))
            .collect(),
    )
}
