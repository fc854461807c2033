//! # Graph Engine
//!
//! The single writer. Every mutation of the graph flows through
//! [`GraphEngine`]: atom lifecycle events, similarity results, context
//! groupings, access records, and the periodic decay/rank passes.
//!
//! Each public method is one atomic unit of work. A storage failure
//! aborts only the mutation in progress; previously committed state is
//! untouched. Degree counters on nodes are maintained incrementally
//! here and recomputed from scratch only by [`GraphEngine::repair_degrees`].

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::graph::GraphStore;
use crate::primitives::{
    MIN_NEIGHBOR_WEIGHT, PAGERANK_DAMPING, PAGERANK_ITERATIONS, SEMANTIC_THRESHOLD, USAGE_BOOST,
};
use crate::query::QueryEngine;
use crate::storage::StorageBackend;
use crate::types::{
    AccessKind, AtomDescriptor, AtomEvent, AtomField, AtomId, EdgeId, EdgeKind, GraphEdge,
    GraphNode, LatticeError, SimilarityScore,
};
use crate::weights;

// =============================================================================
// MUTATION REPORT
// =============================================================================

/// Outcome of applying one lifecycle event, consumed by the service
/// layer for notification and cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReport {
    /// The atom the event concerned.
    pub atom: AtomId,
    /// Whether semantic discovery should be (re)scheduled for the atom.
    pub discovery_due: bool,
    /// Whether the graph actually changed.
    pub changed: bool,
}

// =============================================================================
// GRAPH ENGINE
// =============================================================================

/// Owns the storage backend and performs all writes.
#[derive(Debug)]
pub struct GraphEngine {
    backend: StorageBackend,
}

impl GraphEngine {
    /// Create an engine over the given backend.
    #[must_use]
    pub fn new(backend: StorageBackend) -> Self {
        Self { backend }
    }

    /// Create an engine over a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(StorageBackend::in_memory())
    }

    /// Open an engine over a persistent store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LatticeError> {
        Ok(Self::new(StorageBackend::persistent(path)?))
    }

    /// Read-only view of the underlying store.
    #[must_use]
    pub fn store(&self) -> &dyn GraphStore {
        self.backend.as_store()
    }

    /// Query engine over the current committed state.
    #[must_use]
    pub fn query(&self) -> QueryEngine<'_> {
        QueryEngine::new(self.backend.as_store())
    }

    // -------------------------------------------------------------------------
    // Lifecycle events
    // -------------------------------------------------------------------------

    /// Apply one atom lifecycle event.
    ///
    /// Idempotent: re-applying an event leaves the graph in the same
    /// state. A `Created` for a known atom and an `Updated` for an
    /// unknown one degrade into each other.
    pub fn apply_event(&mut self, event: &AtomEvent) -> Result<MutationReport, LatticeError> {
        match event {
            AtomEvent::Created(atom) => self.apply_upsert(atom, true, true),
            AtomEvent::Updated { atom, changed } => {
                let reconcile = changed.contains(&AtomField::Links);
                let discovery = changed.iter().any(|f| f.is_content());
                self.apply_upsert(atom, reconcile, discovery)
            }
            AtomEvent::Deleted(id) => self.apply_deleted(id),
        }
    }

    fn apply_upsert(
        &mut self,
        atom: &AtomDescriptor,
        reconcile: bool,
        discovery_due: bool,
    ) -> Result<MutationReport, LatticeError> {
        let now = Utc::now();
        let store = self.backend.as_store_mut();
        let node = match store.get_node(&atom.id)? {
            Some(mut existing) => {
                existing.kind = atom.kind.clone();
                existing.category = atom.category.clone();
                existing.atom_updated_at = atom.updated_at;
                existing.updated_at = now;
                existing
            }
            None => GraphNode::new(atom, now),
        };
        store.upsert_node(node)?;

        if reconcile {
            self.reconcile_links(atom, now)?;
        }
        // The node row itself was (re)written, so the graph changed.
        Ok(MutationReport {
            atom: atom.id.clone(),
            discovery_due,
            changed: true,
        })
    }

    fn apply_deleted(&mut self, id: &AtomId) -> Result<MutationReport, LatticeError> {
        let store = self.backend.as_store_mut();
        let existed = store.contains_node(id)?;
        let removed = store.remove_node(id)?;
        // Repair the surviving endpoints' degree counters.
        for edge in &removed {
            if &edge.source != id {
                self.adjust_out_degree(&edge.source, -1)?;
            }
            if &edge.target != id {
                self.adjust_in_degree(&edge.target, -1)?;
            }
        }
        Ok(MutationReport {
            atom: id.clone(),
            discovery_due: false,
            changed: existed,
        })
    }

    /// Diff the atom's declared links against its existing explicit
    /// edges: insert additions (skipping missing targets and self
    /// links), delete removals, refresh changed tags.
    fn reconcile_links(
        &mut self,
        atom: &AtomDescriptor,
        now: DateTime<Utc>,
    ) -> Result<bool, LatticeError> {
        let mut desired: BTreeMap<AtomId, Option<String>> = BTreeMap::new();
        for link in &atom.links {
            if link.target == atom.id {
                continue;
            }
            desired.insert(link.target.clone(), link.tag.clone());
        }

        let existing: Vec<GraphEdge> = self
            .backend
            .as_store()
            .edges_touching(&atom.id)?
            .into_iter()
            .filter(|e| e.kind == EdgeKind::Explicit && e.source == atom.id)
            .collect();

        let mut changed = false;
        for mut edge in existing {
            match desired.remove(&edge.target) {
                Some(tag) => {
                    if edge.tag != tag {
                        edge.tag = tag;
                        self.backend.as_store_mut().update_edge(&edge)?;
                        changed = true;
                    }
                }
                None => {
                    changed |= self.remove_edge_checked(edge.id)?;
                }
            }
        }
        for (target, tag) in desired {
            let edge = GraphEdge::explicit(atom.id.clone(), target, tag, now);
            changed |= self.insert_edge_checked(edge)?;
        }
        Ok(changed)
    }

    // -------------------------------------------------------------------------
    // Discovery and host-declared relations
    // -------------------------------------------------------------------------

    /// Apply one similarity result from the embedding collaborator.
    ///
    /// Scores below the semantic threshold are discarded. An existing
    /// semantic edge is refreshed in place; otherwise a new undirected
    /// semantic edge is created. Returns whether the graph changed.
    pub fn apply_similarity(&mut self, score: &SimilarityScore) -> Result<bool, LatticeError> {
        if score.score < SEMANTIC_THRESHOLD || score.source == score.target {
            return Ok(false);
        }
        let now = Utc::now();
        let edge = GraphEdge::semantic(
            score.source.clone(),
            score.target.clone(),
            score.score,
            now,
        );
        if let Some(mut existing) = self.backend.as_store().edge_by_key(&edge.key())? {
            existing.semantic_weight = weights::clamp01(score.score);
            existing.recency_weight = 1.0;
            existing.reinforced_at = now;
            existing.recombine();
            self.backend.as_store_mut().update_edge(&existing)?;
            return Ok(true);
        }
        self.insert_edge_checked(edge)
    }

    /// Record a host-declared reference from one atom to another.
    pub fn link_reference(
        &mut self,
        source: &AtomId,
        target: &AtomId,
        tag: Option<String>,
    ) -> Result<bool, LatticeError> {
        if source == target {
            return Ok(false);
        }
        let edge = GraphEdge::reference(source.clone(), target.clone(), tag, Utc::now());
        self.insert_edge_checked(edge)
    }

    /// Record a host-declared conceptual affinity between two atoms.
    pub fn link_conceptual(
        &mut self,
        a: &AtomId,
        b: &AtomId,
        affinity: f64,
    ) -> Result<bool, LatticeError> {
        if a == b {
            return Ok(false);
        }
        let edge = GraphEdge::conceptual(a.clone(), b.clone(), affinity, Utc::now());
        self.insert_edge_checked(edge)
    }

    /// Connect every pair of atoms sharing a grouping context with a
    /// contextual edge. Returns the number of edges created.
    pub fn connect_context(&mut self, members: &[AtomId]) -> Result<usize, LatticeError> {
        let unique: Vec<AtomId> = members
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let now = Utc::now();
        let mut added = 0;
        for (i, a) in unique.iter().enumerate() {
            for b in unique.iter().skip(i + 1) {
                let edge = GraphEdge::contextual(a.clone(), b.clone(), now);
                if self.insert_edge_checked(edge)? {
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    /// Infer transitive edges across 2-hop paths from an atom.
    ///
    /// For each path a-b-c with no direct a-c edge, where both hops
    /// clear the minimum neighbor weight, a transitive edge is created
    /// at `w(ab)·w(bc)` damped by the transitive factor. Returns the
    /// number of edges created.
    pub fn infer_transitive(&mut self, atom: &AtomId) -> Result<usize, LatticeError> {
        let store = self.backend.as_store();
        if !store.contains_node(atom)? {
            return Ok(0);
        }
        let first_hops: Vec<(AtomId, f64)> = store
            .edges_touching(atom)?
            .into_iter()
            .filter(|e| e.combined_weight >= MIN_NEIGHBOR_WEIGHT)
            .filter_map(|e| e.other_endpoint(atom).cloned().map(|o| (o, e.combined_weight)))
            .collect();
        let mut direct: BTreeSet<AtomId> = store
            .edges_touching(atom)?
            .into_iter()
            .filter_map(|e| e.other_endpoint(atom).cloned())
            .collect();

        let now = Utc::now();
        let mut added = 0;
        for (mid, w_ab) in first_hops {
            let second_hops: Vec<(AtomId, f64)> = self
                .backend
                .as_store()
                .edges_touching(&mid)?
                .into_iter()
                .filter(|e| e.combined_weight >= MIN_NEIGHBOR_WEIGHT)
                .filter_map(|e| e.other_endpoint(&mid).cloned().map(|o| (o, e.combined_weight)))
                .collect();
            for (far, w_bc) in second_hops {
                if &far == atom || direct.contains(&far) {
                    continue;
                }
                let inferred = w_ab * w_bc;
                if inferred < MIN_NEIGHBOR_WEIGHT {
                    continue;
                }
                let edge = GraphEdge::transitive(atom.clone(), far.clone(), inferred, now);
                if self.insert_edge_checked(edge)? {
                    direct.insert(far);
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    // -------------------------------------------------------------------------
    // Access recording
    // -------------------------------------------------------------------------

    /// Record an access to an atom.
    ///
    /// Bumps the node's access counter and timestamp. Edit and
    /// reference accesses additionally boost the usage weight of every
    /// incident edge and refresh its recency basis. Unknown atoms are a
    /// no-op.
    pub fn record_access(&mut self, atom: &AtomId, kind: AccessKind) -> Result<bool, LatticeError> {
        let now = Utc::now();
        let store = self.backend.as_store_mut();
        let Some(mut node) = store.get_node(atom)? else {
            return Ok(false);
        };
        node.record_access(now);
        store.upsert_node(node)?;

        if kind.boosts_usage() {
            for mut edge in store.edges_touching(atom)? {
                edge.usage_weight = (edge.usage_weight + USAGE_BOOST).min(1.0);
                edge.recency_weight = 1.0;
                edge.reinforced_at = now;
                edge.recombine();
                store.update_edge(&edge)?;
            }
        }
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Periodic passes
    // -------------------------------------------------------------------------

    /// Re-derive every edge's recency weight from the time elapsed
    /// since its reinforcement basis. Idempotent for a fixed `now`.
    /// Returns the number of edges updated.
    pub fn decay_pass(&mut self, now: DateTime<Utc>) -> Result<usize, LatticeError> {
        let store = self.backend.as_store_mut();
        let mut updated = 0;
        for mut edge in store.edges()? {
            let fresh = weights::recency_weight(weights::days_between(edge.reinforced_at, now));
            if (fresh - edge.recency_weight).abs() > 1e-9 {
                edge.recency_weight = fresh;
                edge.recombine();
                store.update_edge(&edge)?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// PageRank power iteration over the weighted graph.
    ///
    /// Undirected edges propagate both ways. Ranks are normalized by
    /// the maximum so the top node scores exactly 1.0.
    pub fn rank_pass(&mut self) -> Result<(), LatticeError> {
        let nodes = self.backend.as_store().nodes()?;
        let n = nodes.len();
        if n == 0 {
            return Ok(());
        }
        let index: BTreeMap<AtomId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();

        // Propagation list: directed edges push one way, undirected both.
        let mut propagation: Vec<(usize, usize, f64)> = Vec::new();
        let mut fan_out = vec![0usize; n];
        for edge in self.backend.as_store().edges()? {
            let (Some(&s), Some(&t)) = (index.get(&edge.source), index.get(&edge.target)) else {
                continue;
            };
            propagation.push((s, t, edge.combined_weight));
            fan_out[s] += 1;
            if !edge.directed {
                propagation.push((t, s, edge.combined_weight));
                fan_out[t] += 1;
            }
        }

        let base = (1.0 - PAGERANK_DAMPING) / n as f64;
        let mut ranks = vec![1.0 / n as f64; n];
        for _ in 0..PAGERANK_ITERATIONS {
            let mut next = vec![base; n];
            for &(from, to, weight) in &propagation {
                if fan_out[from] > 0 {
                    next[to] += PAGERANK_DAMPING * ranks[from] * weight / fan_out[from] as f64;
                }
            }
            ranks = next;
        }

        let max = ranks.iter().fold(0.0_f64, |acc, &r| acc.max(r));
        let store = self.backend.as_store_mut();
        for (i, mut node) in nodes.into_iter().enumerate() {
            let rank = if max > 0.0 { ranks[i] / max } else { 0.0 };
            if (node.page_rank - rank).abs() > 1e-12 {
                node.page_rank = rank;
                store.upsert_node(node)?;
            }
        }
        Ok(())
    }

    /// Recount every node's degrees from the edge table. The only
    /// from-scratch degree recompute; everything else maintains the
    /// counters incrementally. Returns the number of nodes repaired.
    pub fn repair_degrees(&mut self) -> Result<usize, LatticeError> {
        let mut counts: BTreeMap<AtomId, (u32, u32)> = BTreeMap::new();
        for edge in self.backend.as_store().edges()? {
            counts.entry(edge.target.clone()).or_insert((0, 0)).0 += 1;
            counts.entry(edge.source.clone()).or_insert((0, 0)).1 += 1;
        }
        let store = self.backend.as_store_mut();
        let mut repaired = 0;
        for mut node in store.nodes()? {
            let (in_degree, out_degree) = counts.get(&node.id).copied().unwrap_or((0, 0));
            if node.in_degree != in_degree || node.out_degree != out_degree {
                node.in_degree = in_degree;
                node.out_degree = out_degree;
                store.upsert_node(node)?;
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    // -------------------------------------------------------------------------
    // Collaborator hints
    // -------------------------------------------------------------------------

    /// Store a layout position hint on a node.
    pub fn set_position(&mut self, id: &AtomId, x: f32, y: f32) -> Result<bool, LatticeError> {
        let store = self.backend.as_store_mut();
        let Some(mut node) = store.get_node(id)? else {
            return Ok(false);
        };
        node.position = Some((x, y));
        node.updated_at = Utc::now();
        store.upsert_node(node)?;
        Ok(true)
    }

    /// Store a cluster tag on a node.
    pub fn set_cluster(
        &mut self,
        id: &AtomId,
        cluster: Option<String>,
    ) -> Result<bool, LatticeError> {
        let store = self.backend.as_store_mut();
        let Some(mut node) = store.get_node(id)? else {
            return Ok(false);
        };
        node.cluster = cluster;
        node.updated_at = Utc::now();
        store.upsert_node(node)?;
        Ok(true)
    }

    /// Mark that an embedding now exists for the atom.
    pub fn mark_embedded(&mut self, id: &AtomId) -> Result<bool, LatticeError> {
        let store = self.backend.as_store_mut();
        let Some(mut node) = store.get_node(id)? else {
            return Ok(false);
        };
        node.mark_embedded(Utc::now());
        store.upsert_node(node)?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Edge write helpers (the only paths that touch degree counters)
    // -------------------------------------------------------------------------

    /// Insert an edge if both endpoints exist and no edge with the same
    /// key does, bumping the endpoints' degree counters.
    fn insert_edge_checked(&mut self, edge: GraphEdge) -> Result<bool, LatticeError> {
        let store = self.backend.as_store_mut();
        if store.edge_by_key(&edge.key())?.is_some()
            || !store.contains_node(&edge.source)?
            || !store.contains_node(&edge.target)?
        {
            return Ok(false);
        }
        let source = edge.source.clone();
        let target = edge.target.clone();
        store.insert_edge(edge)?;
        self.adjust_out_degree(&source, 1)?;
        self.adjust_in_degree(&target, 1)?;
        Ok(true)
    }

    /// Remove an edge by id, decrementing the endpoints' degrees.
    fn remove_edge_checked(&mut self, id: EdgeId) -> Result<bool, LatticeError> {
        let Some(edge) = self.backend.as_store_mut().remove_edge(id)? else {
            return Ok(false);
        };
        self.adjust_out_degree(&edge.source, -1)?;
        self.adjust_in_degree(&edge.target, -1)?;
        Ok(true)
    }

    fn adjust_out_degree(&mut self, id: &AtomId, delta: i32) -> Result<(), LatticeError> {
        let store = self.backend.as_store_mut();
        if let Some(mut node) = store.get_node(id)? {
            node.out_degree = apply_delta(node.out_degree, delta);
            store.upsert_node(node)?;
        }
        Ok(())
    }

    fn adjust_in_degree(&mut self, id: &AtomId, delta: i32) -> Result<(), LatticeError> {
        let store = self.backend.as_store_mut();
        if let Some(mut node) = store.get_node(id)? {
            node.in_degree = apply_delta(node.in_degree, delta);
            store.upsert_node(node)?;
        }
        Ok(())
    }
}

/// Saturating signed adjustment of a degree counter, floored at zero.
fn apply_delta(value: u32, delta: i32) -> u32 {
    if delta >= 0 {
        value.saturating_add(delta as u32)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

// =============================================================================
// TESTS
// =============================================================================
