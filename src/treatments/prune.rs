//! Treatment: minimum-install pruning

use super::{Treatment, TreatmentContext};
use crate::graph::{Row, WeightedGraph};

/// Removes neighbours whose install count is below the context floor
///
/// The floor is 5% of the mean of the whole ranking table. A neighbour
/// missing from the table counts as 0 installs. Rows left with no
/// neighbours are dropped.
///
/// ```text
/// floor = 300
/// In:  {"a": {"b": 10, "c": 13}}   installs: b=1000, c=12
/// Out: {"a": {"b": 10}}
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MinInstallPrune;

impl Treatment for MinInstallPrune {
    fn treat(&self, graph: &WeightedGraph, ctx: &TreatmentContext) -> WeightedGraph {
        let floor = ctx.min_install_floor();
        let ranking = ctx.ranking();

        let mut pruned = 0usize;
        let treated: WeightedGraph = graph
            .rows()
            .filter_map(|(key, row)| {
                let kept: Row = row
                    .iter()
                    .filter(|(neighbor, _)| {
                        let keep = ranking.popularity(neighbor) as f64 >= floor;
                        if !keep {
                            pruned += 1;
                        }
                        keep
                    })
                    .map(|(neighbor, weight)| (neighbor.clone(), *weight))
                    .collect();
                (!kept.is_empty()).then(|| (key.clone(), kept))
            })
            .collect();

        tracing::debug!(floor, pruned, rows = treated.len(), "Pruned low-install neighbours");
        treated
    }

    fn name(&self) -> &'static str {
        "min-install-prune"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RankingTable;
    use crate::treatments::fixtures::*;

    fn cutoff_ranking() -> RankingTable {
        serde_json::from_str(
            r#"{"guid-1": 10000, "guid-2": 9000, "guid-3": 8000, "guid-4": 7,
                "guid-5": 6000, "guid-6": 5000, "guid-7": 4000, "guid-8": 3000,
                "guid-9": 2000}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_prunes_neighbours_below_floor() {
        let out = MinInstallPrune.treat(&mock_graph(), &ctx(cutoff_ranking()));

        // guid-4 has 7 installs, far below 5% of the mean
        for (_, row) in out.rows() {
            assert!(!row.contains_key("guid-4"));
        }
        let row = out.row("guid-2").unwrap();
        assert_eq!(row.len(), 4);
        assert_eq!(row["guid-1"], 50.0);
    }

    #[test]
    fn test_drops_rows_left_empty() {
        // guid-3 only had guid-4 as a neighbour in this graph
        let graph: WeightedGraph =
            serde_json::from_str(r#"{"guid-3": {"guid-4": 70}, "guid-1": {"guid-2": 5}}"#)
                .unwrap();
        let out = MinInstallPrune.treat(&graph, &ctx(cutoff_ranking()));
        assert!(!out.contains("guid-3"));
        assert!(out.contains("guid-1"));
    }

    #[test]
    fn test_low_floor_keeps_everything() {
        // floor = 0.3, every ranked neighbour passes; guid-5 .. guid-9 are ranked too
        let graph = mock_graph();
        let out = MinInstallPrune.treat(&graph, &ctx(mock_ranking()));
        assert_eq!(out, graph);
    }

    #[test]
    fn test_unranked_neighbour_is_pruned() {
        let graph: WeightedGraph =
            serde_json::from_str(r#"{"a": {"b": 1, "unknown": 1}}"#).unwrap();
        let ranking: RankingTable = serde_json::from_str(r#"{"a": 100, "b": 100}"#).unwrap();
        let out = MinInstallPrune.treat(&graph, &ctx(ranking));
        assert_eq!(out.row("a").unwrap().len(), 1);
    }

    #[test]
    fn test_empty_ranking_disables_pruning() {
        let graph = mock_graph();
        let out = MinInstallPrune.treat(&graph, &ctx(RankingTable::new()));
        assert_eq!(out, graph);
    }
}
