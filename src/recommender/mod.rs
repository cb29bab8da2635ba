//! Ranked recommendations over a treated graph
//!
//! - **rank**: the composite (weight, popularity) ordering key
//! - **variant**: named treatment pipelines and the per-variant recommender set

mod rank;
mod variant;

pub use rank::{RankKey, Recommendation};
pub use variant::{RecommenderSet, Variant};

use crate::graph::{RankingTable, WeightedGraph};
use crate::treatments::{Pipeline, TreatmentContext};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Top-K recommender over one treated graph
///
/// Immutable once built. A new treated graph means building a new
/// `Recommender`; readers holding the old one keep a consistent view.
#[derive(Debug)]
pub struct Recommender {
    treated: WeightedGraph,
    ranking: Arc<RankingTable>,
    pipeline: Pipeline,
}

impl Recommender {
    /// Apply `pipeline` to `raw` and build the recommender
    ///
    /// # Errors
    /// Returns `InvalidGraph` if the raw graph or the treated output holds a
    /// negative or non-finite weight.
    pub fn build(
        raw: &WeightedGraph,
        ranking: Arc<RankingTable>,
        pipeline: Pipeline,
    ) -> Result<Self> {
        raw.validate()?;
        let ctx = TreatmentContext::new(ranking);
        Self::build_with_context(raw, &ctx, pipeline)
    }

    /// Build against an already prepared context (raw graph assumed valid)
    pub(crate) fn build_with_context(
        raw: &WeightedGraph,
        ctx: &TreatmentContext,
        pipeline: Pipeline,
    ) -> Result<Self> {
        let treated = pipeline.apply(raw, ctx);
        treated.validate()?;

        tracing::debug!(
            pipeline = ?pipeline,
            rows = treated.len(),
            edges = treated.edge_count(),
            "Built recommender"
        );

        Ok(Self {
            treated,
            ranking: ctx.shared_ranking(),
            pipeline,
        })
    }

    /// Top `limit` neighbours of `query_key`
    ///
    /// Sorted by weight descending, then popularity descending, then key
    /// ascending. An unknown key yields an empty list.
    pub fn recommend(&self, query_key: &str, limit: usize) -> Vec<Recommendation> {
        let Some(row) = self.treated.row(query_key) else {
            return Vec::new();
        };

        let mut results: Vec<Recommendation> = row
            .iter()
            .map(|(neighbor, &weight)| Recommendation {
                key: neighbor.clone(),
                weight,
                popularity: self.ranking.popularity(neighbor),
            })
            .collect();

        results.sort_by(|a, b| b.rank_key().cmp(&a.rank_key()).then_with(|| a.key.cmp(&b.key)));
        results.truncate(limit);
        results
    }

    /// `recommend(key, limit)` for every key in the treated graph
    ///
    /// Bulk export only; not used on the request path.
    pub fn recommendation_graph(&self, limit: usize) -> BTreeMap<String, Vec<Recommendation>> {
        self.treated
            .keys()
            .map(|key| (key.clone(), self.recommend(key, limit)))
            .collect()
    }

    pub fn treated_graph(&self) -> &WeightedGraph {
        &self.treated
    }

    pub fn ranking(&self) -> &RankingTable {
        &self.ranking
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}
