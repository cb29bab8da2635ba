//! Core graph data structures
//!
//! Defines the co-installation graph (raw counts or treated weights) and the
//! popularity ranking table used as tie-breaker and pruning threshold.

mod ranking;
mod weighted;

pub use ranking::RankingTable;
pub use weighted::{Row, WeightedGraph};
