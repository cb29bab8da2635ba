//! Composite ranking key

use serde::Serialize;
use std::cmp::Ordering;

/// One ranked neighbour
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// Neighbour item key
    pub key: String,
    /// Treated weight
    pub weight: f64,
    /// Install count from the ranking table (0 if unranked)
    pub popularity: u64,
}

impl Recommendation {
    pub fn rank_key(&self) -> RankKey {
        RankKey::new(self.weight, self.popularity)
    }
}

/// Sort key ordered by weight, then popularity
///
/// Monotonic in both components: a heavier weight always wins, and equal
/// weights are separated by install count.
#[derive(Debug, Clone, Copy)]
pub struct RankKey {
    pub weight: f64,
    pub popularity: u64,
}

impl RankKey {
    pub fn new(weight: f64, popularity: u64) -> Self {
        Self { weight, popularity }
    }
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| self.popularity.cmp(&other.popularity))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey {}
