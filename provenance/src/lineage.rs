//! The lineage graph: compositions as vertices, one edge from each source
//! composition to every output derived from it, labelled by the producing
//! process.

use crate::composition::CompositionKind;
use lims_types::{CompositionId, ProcessId};
use petgraph::algo::is_cyclic_directed;
use petgraph::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineageNode {
    pub composition: CompositionId,
    pub kind: CompositionKind,
}

#[derive(Debug, Default)]
pub struct LineageGraph {
    graph: DiGraph<LineageNode, ProcessId>,
    index: HashMap<CompositionId, NodeIndex>,
}

impl LineageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_compositions(&self) -> usize {
        self.graph.node_count()
    }

    /// Add a vertex; adding the same composition twice is a no-op.
    pub fn add_composition(&mut self, composition: CompositionId, kind: CompositionKind) {
        if !self.index.contains_key(&composition) {
            let v = self.graph.add_node(LineageNode { composition, kind });
            self.index.insert(composition, v);
        }
    }

    /// Record that `output` was derived from `source` by `process`. Both
    /// compositions must have been added. Returns false if either is unknown.
    pub fn add_derivation(
        &mut self,
        source: CompositionId,
        output: CompositionId,
        process: ProcessId,
    ) -> bool {
        match (self.index.get(&source), self.index.get(&output)) {
            (Some(&s), Some(&o)) => {
                self.graph.add_edge(s, o, process);
                true
            }
            _ => false,
        }
    }

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// Every composition with a directed path from `start` in `direction`,
    /// excluding `start`, sorted by id.
    fn walk(&self, start: CompositionId, direction: Direction) -> Vec<LineageNode> {
        let Some(&v) = self.index.get(&start) else {
            return Vec::new();
        };
        let mut check = vec![v];
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        seen.insert(v);
        while let Some(x) = check.pop() {
            for y in self.graph.neighbors_directed(x, direction) {
                if seen.insert(y) {
                    check.push(y);
                }
            }
        }
        seen.remove(&v);
        let mut result: Vec<LineageNode> = seen.into_iter().map(|n| self.graph[n]).collect();
        result.sort_by_key(|n| n.composition);
        result
    }

    pub fn ancestors_of(&self, composition: CompositionId) -> Vec<LineageNode> {
        self.walk(composition, Incoming)
    }

    pub fn descendants_of(&self, composition: CompositionId) -> Vec<LineageNode> {
        self.walk(composition, Outgoing)
    }

    /// Ancestors of `composition` of the given kind.
    pub fn ancestors_of_kind(
        &self,
        composition: CompositionId,
        kind: CompositionKind,
    ) -> Vec<CompositionId> {
        self.ancestors_of(composition)
            .into_iter()
            .filter(|n| n.kind == kind)
            .map(|n| n.composition)
            .collect()
    }

    /// Processes that produced `composition` from its direct sources.
    pub fn producing_processes(&self, composition: CompositionId) -> Vec<ProcessId> {
        let Some(&v) = self.index.get(&composition) else {
            return Vec::new();
        };
        let mut processes: Vec<ProcessId> = self
            .graph
            .edges_directed(v, Incoming)
            .map(|e| *e.weight())
            .collect();
        processes.sort();
        processes.dedup();
        processes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn id(i: i64) -> CompositionId {
        CompositionId(i)
    }

    /// Two samples extracted, compressed, normalized, prepped and pooled.
    fn pipeline() -> LineageGraph {
        let mut g = LineageGraph::new();
        let kinds = [
            CompositionKind::Sample,
            CompositionKind::Gdna,
            CompositionKind::CompressedGdna,
            CompositionKind::NormalizedGdna,
            CompositionKind::LibraryShotgun,
        ];
        for lane in 0..2 {
            for (step, &kind) in kinds.iter().enumerate() {
                g.add_composition(id(10 * lane + step as i64), kind);
                if step > 0 {
                    g.add_derivation(
                        id(10 * lane + step as i64 - 1),
                        id(10 * lane + step as i64),
                        ProcessId(step as i64),
                    );
                }
            }
        }
        g.add_composition(id(100), CompositionKind::Pool);
        g.add_derivation(id(4), id(100), ProcessId(5));
        g.add_derivation(id(14), id(100), ProcessId(5));
        g
    }

    #[test]
    fn test_single_sample_ancestor() {
        let g = pipeline();
        assert_eq!(g.ancestors_of_kind(id(4), CompositionKind::Sample), vec![id(0)]);
        assert_eq!(g.ancestors_of_kind(id(13), CompositionKind::Sample), vec![id(10)]);
        assert_eq!(
            g.ancestors_of_kind(id(100), CompositionKind::Sample),
            vec![id(0), id(10)]
        );
        assert!(g.descendants_of(id(0)).iter().any(|n| n.composition == id(100)));
        assert!(!g.descendants_of(id(0)).iter().any(|n| n.composition == id(14)));
        assert!(g.is_acyclic());
    }

    #[test]
    fn test_unknown_compositions() {
        let mut g = pipeline();
        assert!(g.ancestors_of(id(999)).is_empty());
        assert!(!g.add_derivation(id(999), id(0), ProcessId(1)));
        assert_eq!(g.producing_processes(id(100)), vec![ProcessId(5)]);
        assert!(g.producing_processes(id(0)).is_empty());
    }

    proptest! {
        #[test]
        fn prop_chain_has_one_sample(len in 1usize..30) {
            let mut g = LineageGraph::new();
            g.add_composition(id(0), CompositionKind::Sample);
            for i in 1..=len as i64 {
                g.add_composition(id(i), CompositionKind::Gdna);
                g.add_derivation(id(i - 1), id(i), ProcessId(i));
            }
            let last = id(len as i64);
            prop_assert_eq!(g.ancestors_of_kind(last, CompositionKind::Sample), vec![id(0)]);
            prop_assert_eq!(g.ancestors_of(last).len(), len);
            prop_assert!(g.descendants_of(id(0)).iter().any(|n| n.composition == last));
        }
    }
}
