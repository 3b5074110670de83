//! The Attack-Graph Builder (§4.4): a keyed node map and a keyed edge
//! map guarded by one lock together, matching the original's single
//! `sync.RWMutex` over both maps rather than independent per-map
//! locking — readers of the graph (the sink write) must never observe
//! nodes and edges from different points in time.

use apt_common::model::{AttackEdge, AttackNode, Phase};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct GraphInner {
    nodes: HashMap<Phase, AttackNode>,
    edges: HashMap<String, AttackEdge>,
}

#[derive(Default)]
pub struct AttackGraphBuilder {
    inner: RwLock<GraphInner>,
}

impl AttackGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a correlator output sequence into the graph: every adjacent
    /// pair becomes (or reinforces) one edge.
    pub fn ingest_sequence(&self, nodes: &[AttackNode]) {
        for window in nodes.windows(2) {
            self.add_phase_transition(&window[0], &window[1]);
        }
        if nodes.len() == 1 {
            self.upsert_node(&nodes[0]);
        }
    }

    /// Upserts both endpoint nodes, then either bumps an existing edge's
    /// count/confidence or inserts a fresh one at confidence 0.3.
    pub fn add_phase_transition(&self, from: &AttackNode, to: &AttackNode) {
        let mut guard = self.inner.write();
        guard.nodes.insert(from.phase, from.clone());
        guard.nodes.insert(to.phase, to.clone());

        let key = AttackEdge::key(from.phase, to.phase);
        match guard.edges.get_mut(&key) {
            Some(edge) => {
                edge.count += 1;
                edge.confidence = (edge.confidence + 0.1).min(1.0);
            }
            None => {
                guard.edges.insert(
                    key,
                    AttackEdge {
                        from: from.phase,
                        to: to.phase,
                        confidence: 0.3,
                        count: 1,
                    },
                );
            }
        }
    }

    fn upsert_node(&self, node: &AttackNode) {
        self.inner.write().nodes.insert(node.phase, node.clone());
    }

    /// Snapshots the current graph for handing to a `GraphSink`. Taking
    /// the read lock once for both maps keeps the snapshot internally
    /// consistent with any concurrent `add_phase_transition`.
    pub fn snapshot(&self) -> (Vec<AttackNode>, Vec<AttackEdge>) {
        let guard = self.inner.read();
        (
            guard.nodes.values().cloned().collect(),
            guard.edges.values().cloned().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(phase: Phase) -> AttackNode {
        AttackNode {
            phase,
            timestamp: Utc::now(),
            source_ip: "1.1.1.1".into(),
            dest_ip: "2.2.2.2".into(),
            related_log_ids: vec![],
        }
    }

    #[test]
    fn repeated_transitions_raise_confidence_and_count() {
        let graph = AttackGraphBuilder::new();
        let a = node(Phase::InitialAccess);
        let b = node(Phase::LateralMovement);

        for _ in 0..3 {
            graph.add_phase_transition(&a, &b);
        }

        let (_, edges) = graph.snapshot();
        let edge = edges.into_iter().find(|e| e.from == Phase::InitialAccess && e.to == Phase::LateralMovement).unwrap();
        assert_eq!(edge.count, 3);
        assert!((edge.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn confidence_never_exceeds_one() {
        let graph = AttackGraphBuilder::new();
        let a = node(Phase::InitialAccess);
        let b = node(Phase::LateralMovement);
        for _ in 0..20 {
            graph.add_phase_transition(&a, &b);
        }
        let (_, edges) = graph.snapshot();
        assert!(edges[0].confidence <= 1.0);
    }

    #[test]
    fn ingest_sequence_creates_edges_for_each_adjacent_pair() {
        let graph = AttackGraphBuilder::new();
        let sequence = vec![
            node(Phase::InitialAccess),
            node(Phase::LateralMovement),
            node(Phase::CommandAndControl),
        ];
        graph.ingest_sequence(&sequence);
        let (nodes, edges) = graph.snapshot();
        assert_eq!(nodes.len(), 3);
        assert_eq!(edges.len(), 2);
    }
}
