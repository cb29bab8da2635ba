//! Named variants and the per-variant recommender set
//!
//! Every variant is a fixed pipeline `[MinInstallPrune, <normalisation>]`.
//! Variants are resolved from their names once, and an unknown name is an
//! `UnsupportedVariant` error rather than a silent fallback.

use super::{Recommendation, Recommender};
use crate::graph::{RankingTable, WeightedGraph};
use crate::treatments::{
    DegreeNorm, MinInstallPrune, NoTreatment, Pipeline, Propagation,
    ProportionalTotalRelevanceNorm, TotalRelevanceNorm, TreatmentContext,
};
use crate::{Result, TaarLiteError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A named composition of treatments exposed to callers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Raw co-install counts
    None,
    /// Divided by neighbour degree
    Degree,
    /// Divided by neighbour total co-install mass
    TotalRelevance,
    /// Row-normalised, then divided by the neighbour's proportional mass
    #[default]
    ProportionalTotalRelevance,
    /// Experimental neighbours-of-neighbours propagation
    Propagation,
}

impl Variant {
    /// Variants served in production
    pub const PRODUCTION: [Variant; 4] = [
        Variant::None,
        Variant::Degree,
        Variant::TotalRelevance,
        Variant::ProportionalTotalRelevance,
    ];

    /// Every known variant
    pub const ALL: [Variant; 5] = [
        Variant::None,
        Variant::Degree,
        Variant::TotalRelevance,
        Variant::ProportionalTotalRelevance,
        Variant::Propagation,
    ];

    /// Name used in requests and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::None => "none",
            Variant::Degree => "degree",
            Variant::TotalRelevance => "total-relevance",
            Variant::ProportionalTotalRelevance => "proportional-total-relevance",
            Variant::Propagation => "propagation",
        }
    }

    pub fn is_experimental(&self) -> bool {
        matches!(self, Variant::Propagation)
    }

    /// Treatment chain for this variant
    pub fn pipeline(&self) -> Pipeline {
        let pipeline = Pipeline::new().then(MinInstallPrune);
        match self {
            Variant::None => pipeline.then(NoTreatment),
            Variant::Degree => pipeline.then(DegreeNorm),
            Variant::TotalRelevance => pipeline.then(TotalRelevanceNorm),
            Variant::ProportionalTotalRelevance => pipeline.then(ProportionalTotalRelevanceNorm),
            Variant::Propagation => pipeline.then(Propagation::default()),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = TaarLiteError;

    fn from_str(s: &str) -> Result<Self> {
        Variant::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| TaarLiteError::UnsupportedVariant(s.to_string()))
    }
}

/// One immutable recommender per enabled variant, built from the same inputs
#[derive(Debug)]
pub struct RecommenderSet {
    recommenders: BTreeMap<Variant, Recommender>,
}

impl RecommenderSet {
    /// Build a recommender for each of `variants`
    ///
    /// The raw graph is validated once and the min-install floor is derived
    /// once for the whole set.
    ///
    /// # Errors
    /// Returns `InvalidGraph` if any weight cannot be ranked.
    pub fn build(
        raw: &WeightedGraph,
        ranking: Arc<RankingTable>,
        variants: &[Variant],
    ) -> Result<Self> {
        raw.validate()?;
        let ctx = TreatmentContext::new(ranking);

        let mut recommenders = BTreeMap::new();
        for &variant in variants {
            let recommender = Recommender::build_with_context(raw, &ctx, variant.pipeline())?;
            recommenders.insert(variant, recommender);
        }

        tracing::info!(
            variants = ?recommenders.keys().map(|v| v.as_str()).collect::<Vec<_>>(),
            rows = raw.len(),
            floor = ctx.min_install_floor(),
            "Built recommender set"
        );

        Ok(Self { recommenders })
    }

    pub fn get(&self, variant: Variant) -> Option<&Recommender> {
        self.recommenders.get(&variant)
    }

    /// Enabled variants in order
    pub fn variants(&self) -> impl Iterator<Item = Variant> + '_ {
        self.recommenders.keys().copied()
    }

    /// Recommend through the variant called `variant_name`
    ///
    /// An unknown or disabled variant yields an empty list.
    pub fn recommend(
        &self,
        variant_name: &str,
        query_key: &str,
        limit: usize,
    ) -> Vec<Recommendation> {
        let variant = match variant_name.parse::<Variant>() {
            Ok(variant) => variant,
            Err(e) => {
                tracing::warn!(
                    variant = variant_name,
                    query_key,
                    "Invalid normalization parameter detected: {}",
                    e
                );
                return Vec::new();
            }
        };

        match self.get(variant) {
            Some(recommender) => recommender.recommend(query_key, limit),
            None => {
                tracing::warn!(variant = variant_name, query_key, "Variant is not enabled");
                Vec::new()
            }
        }
    }
}
