//! Fragment connectivity graph
//!
//! Fragments whose bounds touch (within a tolerance) are linked. Clusters use
//! the graph to decide which pieces are still attached after an impact; the
//! connectivity conversion mode stores it on its mesh root.

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;

use crate::geometry::Bounds;
use crate::scene::EntityId;

#[derive(Debug, Clone, Default)]
pub struct ConnectivityGraph {
    graph: UnGraph<EntityId, ()>,
    index: HashMap<EntityId, NodeIndex>,
}

impl ConnectivityGraph {
    /// Links every pair of pieces whose bounds intersect within `tolerance`.
    pub fn build(pieces: &[(EntityId, Bounds)], tolerance: f32) -> Self {
        let mut graph = UnGraph::with_capacity(pieces.len(), pieces.len() * 2);
        let mut index = HashMap::with_capacity(pieces.len());
        let nodes: Vec<NodeIndex> = pieces
            .iter()
            .map(|(id, _)| {
                let node = graph.add_node(*id);
                index.insert(*id, node);
                node
            })
            .collect();

        for a in 0..pieces.len() {
            for b in (a + 1)..pieces.len() {
                if pieces[a].1.intersects(&pieces[b].1, tolerance) {
                    graph.add_edge(nodes[a], nodes[b], ());
                }
            }
        }

        Self { graph, index }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn neighbors(&self, id: EntityId) -> Vec<EntityId> {
        let Some(node) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<EntityId> = self.graph.neighbors(*node).map(|n| self.graph[n]).collect();
        out.sort();
        out
    }

    pub fn component_count(&self) -> usize {
        connected_components(&self.graph)
    }

    /// Connected components after removing `removed`, largest first
    /// (ties broken by lowest member id).
    pub fn components_without(&self, removed: &HashSet<EntityId>) -> Vec<Vec<EntityId>> {
        let mut sets = UnionFind::<usize>::new(self.graph.node_count());
        for edge in self.graph.raw_edges() {
            let (a, b) = (edge.source(), edge.target());
            if removed.contains(&self.graph[a]) || removed.contains(&self.graph[b]) {
                continue;
            }
            sets.union(a.index(), b.index());
        }

        let mut groups: BTreeMap<usize, Vec<EntityId>> = BTreeMap::new();
        for node in self.graph.node_indices() {
            let id = self.graph[node];
            if removed.contains(&id) {
                continue;
            }
            groups.entry(sets.find(node.index())).or_default().push(id);
        }

        let mut components: Vec<Vec<EntityId>> = groups
            .into_values()
            .map(|mut group| {
                group.sort();
                group
            })
            .collect();
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::prelude::*;

    fn unit(x: f32) -> Bounds {
        Bounds::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    fn row(count: u64) -> Vec<(EntityId, Bounds)> {
        (0..count).map(|i| (EntityId(i + 1), unit(i as f32))).collect()
    }

    #[test]
    fn test_row_of_touching_boxes_is_chain() {
        let graph = ConnectivityGraph::build(&row(4), 0.01);
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.component_count(), 1);
        assert_eq!(graph.neighbors(EntityId(2)), vec![EntityId(1), EntityId(3)]);
    }

    #[test]
    fn test_gap_splits_components() {
        let mut pieces = row(2);
        pieces.push((EntityId(9), unit(5.0)));
        let graph = ConnectivityGraph::build(&pieces, 0.01);
        assert_eq!(graph.component_count(), 2);
    }

    #[test]
    fn test_components_without_removed_middle() {
        let graph = ConnectivityGraph::build(&row(5), 0.01);
        let removed: HashSet<EntityId> = [EntityId(2)].into_iter().collect();
        let components = graph.components_without(&removed);
        assert_eq!(
            components,
            vec![vec![EntityId(3), EntityId(4), EntityId(5)], vec![EntityId(1)]]
        );
    }

    #[test]
    fn test_unknown_neighbors_empty() {
        let graph = ConnectivityGraph::build(&row(2), 0.01);
        assert!(graph.neighbors(EntityId(42)).is_empty());
        assert!(!graph.contains(EntityId(42)));
    }
}
