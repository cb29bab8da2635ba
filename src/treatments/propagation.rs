//! Treatment: neighbour propagation (experimental)
//!
//! Spreads each row's weight to neighbours-of-neighbours, damped by depth.
//! A path `source -> k1 -> ... -> kd` contributes
//! `damping(d) * share(source, k1) * ... * share(k(d-1), kd)` to `kd`, where
//! `share` is the row-normalised weight and
//! `damping(d) = ((max_depth - d + 1) / max_depth)^2`.
//!
//! Paths are walked breadth-first from an explicit worklist. Each key is
//! expanded at most `max_expansions` times per source row, which bounds the
//! work on cyclic graphs independently of their size.

use super::{normalize_row, Treatment, TreatmentContext};
use crate::graph::{Row, WeightedGraph};
use std::collections::{HashMap, VecDeque};

/// Depth-bounded neighbour propagation
#[derive(Debug, Clone, Copy)]
pub struct Propagation {
    max_depth: usize,
    max_expansions: usize,
}

impl Default for Propagation {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_expansions: 2,
        }
    }
}

impl Propagation {
    pub fn new(max_depth: usize, max_expansions: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            max_expansions,
        }
    }

    fn damping(&self, depth: usize) -> f64 {
        let d = self.max_depth as f64;
        let factor = (d - depth as f64 + 1.0) / d;
        factor * factor
    }

    fn propagate_row(&self, source: &str, shares: &HashMap<&str, Row>) -> Row {
        let Some(start) = shares.get(source) else {
            return Row::new();
        };

        let mut scores = Row::new();
        let mut expansions: HashMap<&str, usize> = HashMap::new();
        let mut worklist: VecDeque<(&str, f64, usize)> = start
            .iter()
            .map(|(neighbor, share)| (neighbor.as_str(), *share, 1))
            .collect();

        while let Some((key, mass, depth)) = worklist.pop_front() {
            if key != source {
                *scores.entry(key.to_string()).or_insert(0.0) += self.damping(depth) * mass;
            }
            if depth >= self.max_depth {
                continue;
            }

            let count = expansions.entry(key).or_insert(0);
            if *count >= self.max_expansions {
                continue;
            }
            *count += 1;

            if let Some(next) = shares.get(key) {
                worklist.extend(
                    next.iter()
                        .map(|(neighbor, share)| (neighbor.as_str(), mass * share, depth + 1)),
                );
            }
        }

        normalize_row(&scores).unwrap_or_default()
    }
}

impl Treatment for Propagation {
    fn treat(&self, graph: &WeightedGraph, _ctx: &TreatmentContext) -> WeightedGraph {
        let shares: HashMap<&str, Row> = graph
            .rows()
            .filter_map(|(key, row)| normalize_row(row).map(|r| (key.as_str(), r)))
            .collect();

        graph
            .keys()
            .map(|key| (key.clone(), self.propagate_row(key, &shares)))
            .collect()
    }

    fn name(&self) -> &'static str {
        "propagation"
    }
}
