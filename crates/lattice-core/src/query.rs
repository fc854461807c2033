//! # Query Engine
//!
//! Read-only traversals, rankings, and aggregates over a [`GraphStore`].
//!
//! Every operation here is side-effect free and computationally bounded:
//! traversal depth is hard-capped, listings truncate to their `k`, and a
//! missing node always yields `None` or an empty result, never an error.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::graph::GraphStore;
use crate::primitives::{MAX_NEIGHBORHOOD_DEPTH, MAX_PATH_DEPTH, MIN_NEIGHBOR_WEIGHT};
use crate::types::{AtomId, EdgeKind, GraphEdge, GraphNode, GraphStats, LatticeError};

// =============================================================================
// QUERY TYPES
// =============================================================================

/// Edge direction filter relative to a focus node.
///
/// Undirected edges are traversable both ways, so they match every
/// direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Edges leaving the focus node.
    Outgoing,
    /// Edges arriving at the focus node.
    Incoming,
    /// All incident edges.
    Both,
}

/// A one-hop neighbor: the node together with the connecting edge.
#[derive(Debug, Clone)]
pub struct NeighborEntry {
    /// The neighboring node.
    pub node: GraphNode,
    /// The edge connecting it to the focus.
    pub edge: GraphEdge,
}

/// A level-by-level BFS expansion around a focus node.
#[derive(Debug, Clone)]
pub struct Neighborhood {
    /// The node the expansion started from.
    pub focus: AtomId,
    /// Nodes per hop distance; `levels[0]` is one hop out.
    pub levels: Vec<Vec<GraphNode>>,
    /// Every atom id in the neighborhood, focus included.
    pub ids: BTreeSet<AtomId>,
}

impl Neighborhood {
    /// All neighborhood nodes in level order, nearest first.
    #[must_use]
    pub fn flattened(&self) -> Vec<&GraphNode> {
        self.levels.iter().flatten().collect()
    }

    /// Whether the atom appears anywhere in the neighborhood.
    #[must_use]
    pub fn contains(&self, id: &AtomId) -> bool {
        self.ids.contains(id)
    }
}

/// Filters for ranked node listings.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Keep only nodes of this atom type.
    pub kind: Option<String>,
    /// Keep only nodes in this category.
    pub category: Option<String>,
    /// Drop these atom ids from the result.
    pub exclude: BTreeSet<AtomId>,
}

impl NodeFilter {
    /// Whether the node passes this filter.
    #[must_use]
    pub fn matches(&self, node: &GraphNode) -> bool {
        if let Some(kind) = &self.kind {
            if &node.kind != kind {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if node.category.as_ref() != Some(category) {
                return false;
            }
        }
        !self.exclude.contains(&node.id)
    }
}

// =============================================================================
// ORDERING HELPERS
// =============================================================================

/// Primary listing order: rank desc, then access count desc, then most
/// recent access, then atom id for a stable total order.
fn rank_order(a: &GraphNode, b: &GraphNode) -> Ordering {
    b.page_rank
        .total_cmp(&a.page_rank)
        .then_with(|| b.access_count.cmp(&a.access_count))
        .then_with(|| b.last_accessed_at.cmp(&a.last_accessed_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn weight_order(a: &GraphEdge, b: &GraphEdge) -> Ordering {
    b.combined_weight
        .total_cmp(&a.combined_weight)
        .then_with(|| a.id.cmp(&b.id))
}

fn direction_matches(edge: &GraphEdge, focus: &AtomId, direction: Direction) -> bool {
    if !edge.directed {
        return true;
    }
    match direction {
        Direction::Outgoing => &edge.source == focus,
        Direction::Incoming => &edge.target == focus,
        Direction::Both => true,
    }
}

// =============================================================================
// QUERY ENGINE
// =============================================================================

/// Read-only query facade over a graph store.
pub struct QueryEngine<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> QueryEngine<'a> {
    /// Create a query engine over the given store.
    #[must_use]
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    // -------------------------------------------------------------------------
    // Node lookups
    // -------------------------------------------------------------------------

    /// Fetch a single node.
    pub fn get_node(&self, id: &AtomId) -> Result<Option<GraphNode>, LatticeError> {
        self.store.get_node(id)
    }

    /// Fetch a batch of nodes, rank-ordered. Missing ids are skipped.
    pub fn get_nodes(&self, ids: &[AtomId]) -> Result<Vec<GraphNode>, LatticeError> {
        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.store.get_node(id)? {
                result.push(node);
            }
        }
        result.sort_by(rank_order);
        Ok(result)
    }

    /// All nodes of an atom type, rank-ordered.
    pub fn nodes_by_kind(&self, kind: &str) -> Result<Vec<GraphNode>, LatticeError> {
        let mut result: Vec<GraphNode> = self
            .store
            .nodes()?
            .into_iter()
            .filter(|n| n.kind == kind)
            .collect();
        result.sort_by(rank_order);
        Ok(result)
    }

    /// All nodes in a category, rank-ordered.
    pub fn nodes_by_category(&self, category: &str) -> Result<Vec<GraphNode>, LatticeError> {
        let mut result: Vec<GraphNode> = self
            .store
            .nodes()?
            .into_iter()
            .filter(|n| n.category.as_deref() == Some(category))
            .collect();
        result.sort_by(rank_order);
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Traversal
    // -------------------------------------------------------------------------

    /// One-hop neighbors of a node, strongest first.
    ///
    /// Edges below the minimum combined weight are skipped, as are edges
    /// whose far endpoint has no node (a store inconsistency, not an
    /// error). `kinds` restricts the edge kinds considered.
    pub fn neighbors(
        &self,
        id: &AtomId,
        direction: Direction,
        kinds: Option<&[EdgeKind]>,
        limit: Option<usize>,
    ) -> Result<Vec<NeighborEntry>, LatticeError> {
        let mut edges: Vec<GraphEdge> = self
            .store
            .edges_touching(id)?
            .into_iter()
            .filter(|e| e.combined_weight >= MIN_NEIGHBOR_WEIGHT)
            .filter(|e| direction_matches(e, id, direction))
            .filter(|e| kinds.is_none_or(|ks| ks.contains(&e.kind)))
            .collect();
        edges.sort_by(weight_order);

        let mut result = Vec::new();
        for edge in edges {
            let Some(other) = edge.other_endpoint(id).cloned() else {
                continue;
            };
            if let Some(node) = self.store.get_node(&other)? {
                result.push(NeighborEntry { node, edge });
                if let Some(cap) = limit {
                    if result.len() >= cap {
                        break;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Level-by-level BFS expansion around a focus node.
    ///
    /// Each level is sorted by the strongest connecting weight and
    /// truncated to `max_per_level`; expansion stops early when a level
    /// comes up empty. Depth is hard-capped. Returns `None` when the
    /// focus node does not exist.
    pub fn neighborhood(
        &self,
        focus: &AtomId,
        depth: usize,
        max_per_level: usize,
    ) -> Result<Option<Neighborhood>, LatticeError> {
        if !self.store.contains_node(focus)? {
            return Ok(None);
        }
        let depth = depth.min(MAX_NEIGHBORHOOD_DEPTH);

        let mut visited: BTreeSet<AtomId> = BTreeSet::new();
        visited.insert(focus.clone());
        let mut frontier: Vec<AtomId> = vec![focus.clone()];
        let mut levels: Vec<Vec<GraphNode>> = Vec::new();

        for _ in 0..depth {
            // Best connecting weight per candidate decides the level order.
            let mut candidates: BTreeMap<AtomId, f64> = BTreeMap::new();
            for id in &frontier {
                for edge in self.store.edges_touching(id)? {
                    if edge.combined_weight < MIN_NEIGHBOR_WEIGHT {
                        continue;
                    }
                    let Some(other) = edge.other_endpoint(id) else {
                        continue;
                    };
                    if visited.contains(other) {
                        continue;
                    }
                    let best = candidates.entry(other.clone()).or_insert(0.0);
                    if edge.combined_weight > *best {
                        *best = edge.combined_weight;
                    }
                }
            }
            if candidates.is_empty() {
                break;
            }

            let mut ordered: Vec<(AtomId, f64)> = candidates.into_iter().collect();
            ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            ordered.truncate(max_per_level);

            let mut level = Vec::with_capacity(ordered.len());
            for (id, _) in ordered {
                if let Some(node) = self.store.get_node(&id)? {
                    visited.insert(id);
                    level.push(node);
                }
            }
            if level.is_empty() {
                break;
            }
            frontier = level.iter().map(|n| n.id.clone()).collect();
            levels.push(level);
        }

        Ok(Some(Neighborhood {
            focus: focus.clone(),
            levels,
            ids: visited,
        }))
    }

    /// Unweighted BFS shortest path between two nodes.
    ///
    /// Edges are traversed ignoring direction. Returns the full id
    /// sequence including both endpoints, or `None` when no path exists
    /// within the depth bound (hard-capped).
    pub fn shortest_path(
        &self,
        source: &AtomId,
        target: &AtomId,
        max_depth: usize,
    ) -> Result<Option<Vec<AtomId>>, LatticeError> {
        if !self.store.contains_node(source)? || !self.store.contains_node(target)? {
            return Ok(None);
        }
        if source == target {
            return Ok(Some(vec![source.clone()]));
        }
        let max_depth = max_depth.min(MAX_PATH_DEPTH);

        let mut visited: BTreeSet<AtomId> = BTreeSet::new();
        visited.insert(source.clone());
        let mut queue: VecDeque<Vec<AtomId>> = VecDeque::new();
        queue.push_back(vec![source.clone()]);

        while let Some(path) = queue.pop_front() {
            if path.len() > max_depth {
                continue;
            }
            let Some(last) = path.last().cloned() else {
                continue;
            };
            for edge in self.store.edges_touching(&last)? {
                let Some(next) = edge.other_endpoint(&last) else {
                    continue;
                };
                if next == target {
                    let mut complete = path.clone();
                    complete.push(next.clone());
                    return Ok(Some(complete));
                }
                if visited.insert(next.clone()) {
                    let mut extended = path.clone();
                    extended.push(next.clone());
                    queue.push_back(extended);
                }
            }
        }
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Ranked listings
    // -------------------------------------------------------------------------

    /// Top `k` nodes by (rank, access count, recency) under a filter.
    pub fn top_ranked(&self, k: usize, filter: &NodeFilter) -> Result<Vec<GraphNode>, LatticeError> {
        let mut result: Vec<GraphNode> = self
            .store
            .nodes()?
            .into_iter()
            .filter(|n| filter.matches(n))
            .collect();
        result.sort_by(rank_order);
        result.truncate(k);
        Ok(result)
    }

    /// The `k` most recently accessed nodes.
    pub fn recently_accessed(&self, k: usize) -> Result<Vec<GraphNode>, LatticeError> {
        let mut result: Vec<GraphNode> = self
            .store
            .nodes()?
            .into_iter()
            .filter(|n| n.last_accessed_at.is_some())
            .collect();
        result.sort_by(|a, b| {
            b.last_accessed_at
                .cmp(&a.last_accessed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        result.truncate(k);
        Ok(result)
    }

    /// The `k` highest-rank nodes.
    pub fn hubs(&self, k: usize) -> Result<Vec<GraphNode>, LatticeError> {
        let mut result = self.store.nodes()?;
        result.sort_by(|a, b| b.page_rank.total_cmp(&a.page_rank).then_with(|| a.id.cmp(&b.id)));
        result.truncate(k);
        Ok(result)
    }

    /// The `k` highest-degree nodes.
    pub fn most_connected(&self, k: usize) -> Result<Vec<GraphNode>, LatticeError> {
        let mut result = self.store.nodes()?;
        result.sort_by(|a, b| b.degree().cmp(&a.degree()).then_with(|| a.id.cmp(&b.id)));
        result.truncate(k);
        Ok(result)
    }

    /// Case-insensitive substring search over node identity fields
    /// (atom id, kind, category, cluster), rank-ordered.
    pub fn search(
        &self,
        text: &str,
        filter: &NodeFilter,
        k: usize,
    ) -> Result<Vec<GraphNode>, LatticeError> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let mut result: Vec<GraphNode> = self
            .store
            .nodes()?
            .into_iter()
            .filter(|n| filter.matches(n))
            .filter(|n| {
                n.id.as_str().to_lowercase().contains(&needle)
                    || n.kind.to_lowercase().contains(&needle)
                    || n.category
                        .as_ref()
                        .is_some_and(|c| c.to_lowercase().contains(&needle))
                    || n.cluster
                        .as_ref()
                        .is_some_and(|c| c.to_lowercase().contains(&needle))
            })
            .collect();
        result.sort_by(rank_order);
        result.truncate(k);
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Edge lookups
    // -------------------------------------------------------------------------

    /// All edges between two nodes (any kind, either role), strongest
    /// first.
    pub fn edges_between(&self, a: &AtomId, b: &AtomId) -> Result<Vec<GraphEdge>, LatticeError> {
        let mut result: Vec<GraphEdge> = self
            .store
            .edges_touching(a)?
            .into_iter()
            .filter(|e| e.touches(b))
            .collect();
        result.sort_by(weight_order);
        Ok(result)
    }

    /// Direction-filtered incident edges of a node, strongest first.
    pub fn edges_of(
        &self,
        id: &AtomId,
        direction: Direction,
    ) -> Result<Vec<GraphEdge>, LatticeError> {
        let mut result: Vec<GraphEdge> = self
            .store
            .edges_touching(id)?
            .into_iter()
            .filter(|e| direction_matches(e, id, direction))
            .collect();
        result.sort_by(weight_order);
        Ok(result)
    }

    /// The `k` strongest edges in the whole graph.
    pub fn strongest_edges(&self, k: usize) -> Result<Vec<GraphEdge>, LatticeError> {
        let mut result = self.store.edges()?;
        result.sort_by(weight_order);
        result.truncate(k);
        Ok(result)
    }

    /// Edges with both endpoints inside the given id set, strongest
    /// first.
    pub fn edges_within(&self, ids: &BTreeSet<AtomId>) -> Result<Vec<GraphEdge>, LatticeError> {
        let mut result: Vec<GraphEdge> = self
            .store
            .edges()?
            .into_iter()
            .filter(|e| ids.contains(&e.source) && ids.contains(&e.target))
            .collect();
        result.sort_by(weight_order);
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Aggregates
    // -------------------------------------------------------------------------

    /// Whole-graph statistics.
    pub fn statistics(&self) -> Result<GraphStats, LatticeError> {
        let nodes = self.store.nodes()?;
        let edge_count = self.store.edge_count()?;
        let node_count = nodes.len();

        let mut stats = GraphStats {
            node_count,
            edge_count,
            ..GraphStats::default()
        };
        if node_count == 0 {
            return Ok(stats);
        }

        let mut degree_sum: u64 = 0;
        let mut rank_sum = 0.0;
        let mut embedded = 0usize;
        for node in &nodes {
            let degree = node.degree();
            degree_sum += u64::from(degree);
            stats.max_degree = stats.max_degree.max(degree);
            rank_sum += node.page_rank;
            if node.has_embedding {
                embedded += 1;
            }
            *stats.kinds.entry(node.kind.clone()).or_insert(0) += 1;
        }
        stats.avg_degree = degree_sum as f64 / node_count as f64;
        stats.avg_page_rank = rank_sum / node_count as f64;
        stats.embedding_coverage = embedded as f64 / node_count as f64;
        if node_count > 1 {
            stats.density = edge_count as f64 / (node_count as f64 * (node_count as f64 - 1.0));
        }
        Ok(stats)
    }
}

// =============================================================================
// TESTS
// =============================================================================
