//! # Graph Store
//!
//! The storage seam of the engine: one trait, two implementations
//! (in-memory here, redb-backed in [`crate::storage`]).
//!
//! Stores are deliberately dumb: they persist nodes and edges, enforce
//! the edge-key uniqueness constraint, and answer adjacency lookups.
//! Degree counters, weight maintenance, and all other semantics belong
//! to the engine. `BTreeMap` throughout keeps iteration deterministic.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{AtomId, EdgeId, EdgeKey, GraphEdge, GraphNode, LatticeError};

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Storage abstraction over the node and edge tables.
///
/// Missing nodes and edges are never errors: lookups return `Option` or
/// empty collections. The `Result` wrapper exists for the persistent
/// backend's I/O and serialization failures.
pub trait GraphStore {
    /// Insert or replace a node keyed by its atom id.
    fn upsert_node(&mut self, node: GraphNode) -> Result<(), LatticeError>;

    /// Fetch a node by atom id.
    fn get_node(&self, id: &AtomId) -> Result<Option<GraphNode>, LatticeError>;

    /// Whether a node exists for the atom id.
    fn contains_node(&self, id: &AtomId) -> Result<bool, LatticeError>;

    /// Remove a node and cascade-delete every incident edge.
    ///
    /// Returns the removed edges so the caller can repair neighbor
    /// degrees. Removing a missing node is a no-op returning empty.
    fn remove_node(&mut self, id: &AtomId) -> Result<Vec<GraphEdge>, LatticeError>;

    /// Insert an edge, assigning its surrogate id.
    ///
    /// If an edge with the same [`EdgeKey`] already exists, nothing is
    /// inserted and the existing id is returned; callers that need to
    /// distinguish must check [`GraphStore::edge_by_key`] first.
    fn insert_edge(&mut self, edge: GraphEdge) -> Result<EdgeId, LatticeError>;

    /// Replace a stored edge in place, matched by id.
    ///
    /// The endpoints and kind (the dedup key) must be unchanged.
    /// Updating a missing edge is a no-op.
    fn update_edge(&mut self, edge: &GraphEdge) -> Result<(), LatticeError>;

    /// Remove an edge by id, returning it if it existed.
    fn remove_edge(&mut self, id: EdgeId) -> Result<Option<GraphEdge>, LatticeError>;

    /// Fetch an edge by surrogate id.
    fn get_edge(&self, id: EdgeId) -> Result<Option<GraphEdge>, LatticeError>;

    /// Fetch an edge by its dedup key.
    fn edge_by_key(&self, key: &EdgeKey) -> Result<Option<GraphEdge>, LatticeError>;

    /// All edges with the atom at either endpoint, ordered by edge id.
    fn edges_touching(&self, id: &AtomId) -> Result<Vec<GraphEdge>, LatticeError>;

    /// Full node scan, ordered by atom id.
    fn nodes(&self) -> Result<Vec<GraphNode>, LatticeError>;

    /// Full edge scan, ordered by edge id.
    fn edges(&self) -> Result<Vec<GraphEdge>, LatticeError>;

    /// Total node count.
    fn node_count(&self) -> Result<usize, LatticeError>;

    /// Total edge count.
    fn edge_count(&self) -> Result<usize, LatticeError>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// `BTreeMap`-backed store for tests, tooling, and ephemeral graphs.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    nodes: BTreeMap<AtomId, GraphNode>,
    edges: BTreeMap<EdgeId, GraphEdge>,
    edge_keys: BTreeMap<EdgeKey, EdgeId>,
    touching: BTreeMap<AtomId, BTreeSet<EdgeId>>,
    next_edge_id: u64,
}

impl MemoryGraph {
    /// Create an empty in-memory graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn index_edge(&mut self, edge: &GraphEdge) {
        self.edge_keys.insert(edge.key(), edge.id);
        self.touching
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.id);
        self.touching
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.id);
    }

    fn unindex_edge(&mut self, edge: &GraphEdge) {
        self.edge_keys.remove(&edge.key());
        for endpoint in [&edge.source, &edge.target] {
            if let Some(set) = self.touching.get_mut(endpoint) {
                set.remove(&edge.id);
                if set.is_empty() {
                    self.touching.remove(endpoint);
                }
            }
        }
    }
}

impl GraphStore for MemoryGraph {
    fn upsert_node(&mut self, node: GraphNode) -> Result<(), LatticeError> {
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    fn get_node(&self, id: &AtomId) -> Result<Option<GraphNode>, LatticeError> {
        Ok(self.nodes.get(id).cloned())
    }

    fn contains_node(&self, id: &AtomId) -> Result<bool, LatticeError> {
        Ok(self.nodes.contains_key(id))
    }

    fn remove_node(&mut self, id: &AtomId) -> Result<Vec<GraphEdge>, LatticeError> {
        if self.nodes.remove(id).is_none() {
            return Ok(Vec::new());
        }
        let incident: Vec<EdgeId> = self
            .touching
            .get(id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let mut removed = Vec::with_capacity(incident.len());
        for edge_id in incident {
            if let Some(edge) = self.edges.remove(&edge_id) {
                self.unindex_edge(&edge);
                removed.push(edge);
            }
        }
        Ok(removed)
    }

    fn insert_edge(&mut self, mut edge: GraphEdge) -> Result<EdgeId, LatticeError> {
        if let Some(existing) = self.edge_keys.get(&edge.key()) {
            return Ok(*existing);
        }
        self.next_edge_id = self.next_edge_id.saturating_add(1);
        edge.id = EdgeId(self.next_edge_id);
        let id = edge.id;
        self.index_edge(&edge);
        self.edges.insert(id, edge);
        Ok(id)
    }

    fn update_edge(&mut self, edge: &GraphEdge) -> Result<(), LatticeError> {
        if let Some(slot) = self.edges.get_mut(&edge.id) {
            *slot = edge.clone();
        }
        Ok(())
    }

    fn remove_edge(&mut self, id: EdgeId) -> Result<Option<GraphEdge>, LatticeError> {
        let Some(edge) = self.edges.remove(&id) else {
            return Ok(None);
        };
        self.unindex_edge(&edge);
        Ok(Some(edge))
    }

    fn get_edge(&self, id: EdgeId) -> Result<Option<GraphEdge>, LatticeError> {
        Ok(self.edges.get(&id).cloned())
    }

    fn edge_by_key(&self, key: &EdgeKey) -> Result<Option<GraphEdge>, LatticeError> {
        Ok(self
            .edge_keys
            .get(key)
            .and_then(|id| self.edges.get(id))
            .cloned())
    }

    fn edges_touching(&self, id: &AtomId) -> Result<Vec<GraphEdge>, LatticeError> {
        let Some(set) = self.touching.get(id) else {
            return Ok(Vec::new());
        };
        Ok(set
            .iter()
            .filter_map(|edge_id| self.edges.get(edge_id))
            .cloned()
            .collect())
    }

    fn nodes(&self) -> Result<Vec<GraphNode>, LatticeError> {
        Ok(self.nodes.values().cloned().collect())
    }

    fn edges(&self) -> Result<Vec<GraphEdge>, LatticeError> {
        Ok(self.edges.values().cloned().collect())
    }

    fn node_count(&self) -> Result<usize, LatticeError> {
        Ok(self.nodes.len())
    }

    fn edge_count(&self) -> Result<usize, LatticeError> {
        Ok(self.edges.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AtomDescriptor, EdgeKind};
    use chrono::Utc;

    fn node(id: &str) -> GraphNode {
        let atom = AtomDescriptor {
            id: AtomId::new(id),
            kind: "note".to_string(),
            category: None,
            updated_at: Utc::now(),
            links: Vec::new(),
        };
        GraphNode::new(&atom, Utc::now())
    }

    fn store_with(ids: &[&str]) -> MemoryGraph {
        let mut store = MemoryGraph::new();
        for id in ids {
            store.upsert_node(node(id)).expect("upsert");
        }
        store
    }

    #[test]
    fn insert_edge_assigns_sequential_ids() {
        let mut store = store_with(&["a", "b", "c"]);
        let e1 = GraphEdge::explicit(AtomId::new("a"), AtomId::new("b"), None, Utc::now());
        let e2 = GraphEdge::explicit(AtomId::new("b"), AtomId::new("c"), None, Utc::now());
        let id1 = store.insert_edge(e1).expect("insert");
        let id2 = store.insert_edge(e2).expect("insert");
        assert_eq!(id1, EdgeId(1));
        assert_eq!(id2, EdgeId(2));
    }

    #[test]
    fn duplicate_key_returns_existing_id() {
        let mut store = store_with(&["a", "b"]);
        let e1 = GraphEdge::explicit(AtomId::new("a"), AtomId::new("b"), None, Utc::now());
        let e2 = GraphEdge::explicit(AtomId::new("a"), AtomId::new("b"), None, Utc::now());
        let id1 = store.insert_edge(e1).expect("insert");
        let id2 = store.insert_edge(e2).expect("insert");
        assert_eq!(id1, id2);
        assert_eq!(store.edge_count().expect("count"), 1);
    }

    #[test]
    fn undirected_duplicate_detected_in_either_order() {
        let mut store = store_with(&["a", "b"]);
        let e1 = GraphEdge::semantic(AtomId::new("a"), AtomId::new("b"), 0.9, Utc::now());
        let e2 = GraphEdge::semantic(AtomId::new("b"), AtomId::new("a"), 0.9, Utc::now());
        let id1 = store.insert_edge(e1).expect("insert");
        let id2 = store.insert_edge(e2).expect("insert");
        assert_eq!(id1, id2);
    }

    #[test]
    fn remove_node_cascades_and_returns_edges() {
        let mut store = store_with(&["a", "b", "c"]);
        let e1 = GraphEdge::explicit(AtomId::new("a"), AtomId::new("b"), None, Utc::now());
        let e2 = GraphEdge::semantic(AtomId::new("b"), AtomId::new("c"), 0.8, Utc::now());
        store.insert_edge(e1).expect("insert");
        store.insert_edge(e2).expect("insert");

        let removed = store.remove_node(&AtomId::new("b")).expect("remove");
        assert_eq!(removed.len(), 2);
        assert_eq!(store.edge_count().expect("count"), 0);
        assert!(!store.contains_node(&AtomId::new("b")).expect("contains"));
        // The dedup index is clean: the same edge can be re-created.
        store.upsert_node(node("b")).expect("upsert");
        let again = GraphEdge::explicit(AtomId::new("a"), AtomId::new("b"), None, Utc::now());
        store.insert_edge(again).expect("insert");
        assert_eq!(store.edge_count().expect("count"), 1);
    }

    #[test]
    fn remove_missing_node_is_noop() {
        let mut store = store_with(&["a"]);
        let removed = store.remove_node(&AtomId::new("ghost")).expect("remove");
        assert!(removed.is_empty());
        assert_eq!(store.node_count().expect("count"), 1);
    }

    #[test]
    fn edges_touching_covers_both_endpoints() {
        let mut store = store_with(&["a", "b", "c"]);
        let e1 = GraphEdge::explicit(AtomId::new("a"), AtomId::new("b"), None, Utc::now());
        let e2 = GraphEdge::explicit(AtomId::new("c"), AtomId::new("a"), None, Utc::now());
        store.insert_edge(e1).expect("insert");
        store.insert_edge(e2).expect("insert");
        let touching = store.edges_touching(&AtomId::new("a")).expect("touching");
        assert_eq!(touching.len(), 2);
        assert!(touching.iter().all(|e| e.touches(&AtomId::new("a"))));
    }

    #[test]
    fn edge_by_key_distinguishes_kinds() {
        let mut store = store_with(&["a", "b"]);
        store
            .insert_edge(GraphEdge::explicit(
                AtomId::new("a"),
                AtomId::new("b"),
                None,
                Utc::now(),
            ))
            .expect("insert");
        store
            .insert_edge(GraphEdge::semantic(
                AtomId::new("a"),
                AtomId::new("b"),
                0.7,
                Utc::now(),
            ))
            .expect("insert");
        assert_eq!(store.edge_count().expect("count"), 2);
        let key = EdgeKey::undirected(AtomId::new("a"), AtomId::new("b"), EdgeKind::Semantic);
        let found = store.edge_by_key(&key).expect("lookup").expect("present");
        assert_eq!(found.kind, EdgeKind::Semantic);
    }
}
