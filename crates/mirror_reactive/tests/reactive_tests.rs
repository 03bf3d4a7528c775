//! Property tests for reactive minimality

use mirror_reactive::*;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct Board {
    values: HashMap<u8, i64>,
    changed: Vec<u8>,
}

impl InvalidationSource<u8> for Board {
    fn drain_invalidations(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.changed)
    }
}

proptest! {
    /// A computation runs again only if one of its sources changed, and then exactly once.
    #[test]
    fn reruns_only_when_a_read_source_changed(
        reads in prop::collection::vec(prop::collection::hash_set(0u8..8, 0..4), 1..6),
        writes in prop::collection::vec(0u8..8, 0..12),
    ) {
        let mut graph: ReactiveGraph<u8, Board> = ReactiveGraph::default();
        let mut board = Board::default();

        let ids: Vec<(ComputationId, HashSet<u8>)> = reads
            .iter()
            .enumerate()
            .map(|(i, sources)| {
                let tracked: Vec<u8> = sources.iter().copied().collect();
                let id = graph.create(format!("c{}", i), move |b: &mut Board, scope| {
                    for source in &tracked {
                        scope.track(*source);
                        let _ = b.values.get(source);
                    }
                    Ok(())
                });
                (id, sources.clone())
            })
            .collect();

        graph.flush(&mut board).unwrap();

        for (n, source) in writes.iter().enumerate() {
            board.values.insert(*source, n as i64);
            board.changed.push(*source);
        }
        let touched: HashSet<u8> = writes.iter().copied().collect();
        graph.flush(&mut board).unwrap();

        for (id, sources) in &ids {
            let expected = if sources.is_disjoint(&touched) { 1 } else { 2 };
            prop_assert_eq!(graph.run_count(*id), Some(expected));
        }
    }
}

#[test]
fn test_stop_during_pending_flush() {
    let mut graph: ReactiveGraph<u8, Board> = ReactiveGraph::default();
    let mut board = Board::default();
    let id = graph.create("pending", |_: &mut Board, scope| {
        scope.track(1);
        Ok(())
    });
    // Stopped before it ever ran
    graph.stop(id).unwrap();
    let report = graph.flush(&mut board).unwrap();
    assert_eq!(report.runs(), 0);
    assert!(graph.is_empty());
}
