//! # Graph Service
//!
//! Async host for the core engine. One [`GraphService`] owns:
//!
//! - the engine behind an `RwLock` (queries share read guards and see
//!   committed state; every mutation takes the write guard for its
//!   whole unit of work),
//! - the three cache tiers, invalidated after each mutation,
//! - a broadcast channel announcing mutated atom ids,
//! - the debounce map for semantic discovery (one pending task per
//!   atom; a re-trigger aborts and replaces it, never stacks),
//! - live counters the host can poll without locking.
//!
//! Periodic decay/rank maintenance runs from [`GraphService::spawn_maintenance`]
//! and is best-effort: a failed pass is logged and retried next tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lattice_core::cache::CacheStatsSnapshot;
use lattice_core::primitives::{HOT_NEIGHBORHOOD_DEPTH, HOT_NEIGHBORHOOD_PER_LEVEL};
use lattice_core::{
    AccessKind, AtomEvent, AtomId, CachedEmbedding, CachedQuery, Direction, EdgeKind,
    EmbeddingCache, GraphEdge, GraphEngine, GraphNode, GraphStats, LatticeError, MutationReport,
    NeighborEntry, Neighborhood, NeighborhoodCache, NodeFilter, QueryCache, SimilarityScore,
    canonical_query_key,
};

use crate::config::ServiceConfig;

// =============================================================================
// COLLABORATOR SEAM
// =============================================================================

/// Source of similarity scores for an atom.
///
/// Vector search lives outside this process; the service only consumes
/// its results. Implementations must be cheap to call from a blocking
/// context or do their own buffering.
pub trait SimilarityProvider: Send + Sync + 'static {
    /// Similarity scores between the given atom and its candidates.
    fn similar_to(&self, atom: &AtomId) -> Vec<SimilarityScore>;
}

// =============================================================================
// COUNTER SNAPSHOTS
// =============================================================================

/// Lock-free service counters for host polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceCounters {
    /// Current node count.
    pub nodes: u64,
    /// Current edge count.
    pub edges: u64,
    /// Lifecycle events applied.
    pub events_applied: u64,
    /// Discovery runs completed.
    pub discoveries_run: u64,
    /// Whether a maintenance pass is currently running.
    pub is_updating: bool,
}

/// Per-tier cache counter snapshots.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheTierStats {
    /// Hot-neighborhood tier.
    pub neighborhoods: CacheStatsSnapshot,
    /// Query-result tier.
    pub queries: CacheStatsSnapshot,
    /// Embedding tier.
    pub embeddings: CacheStatsSnapshot,
}

// =============================================================================
// GRAPH SERVICE
// =============================================================================

/// The async graph service. Construct with [`GraphService::new`] and
/// share the returned `Arc`.
pub struct GraphService {
    engine: RwLock<GraphEngine>,
    neighborhoods: NeighborhoodCache,
    queries: QueryCache,
    embeddings: EmbeddingCache,
    provider: Arc<dyn SimilarityProvider>,
    updates: broadcast::Sender<AtomId>,
    pending_discovery: Mutex<HashMap<AtomId, JoinHandle<()>>>,
    debounce: Duration,
    node_count: AtomicU64,
    edge_count: AtomicU64,
    events_applied: AtomicU64,
    discoveries_run: AtomicU64,
    is_updating: AtomicBool,
}

fn pending_lock<'a>(
    lock: &'a Mutex<HashMap<AtomId, JoinHandle<()>>>,
) -> MutexGuard<'a, HashMap<AtomId, JoinHandle<()>>> {
    lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl GraphService {
    /// Wrap an engine. Counters start from the store's current counts.
    pub fn new(
        engine: GraphEngine,
        provider: Arc<dyn SimilarityProvider>,
        config: &ServiceConfig,
    ) -> Result<Arc<Self>, LatticeError> {
        let nodes = engine.store().node_count()? as u64;
        let edges = engine.store().edge_count()? as u64;
        let (updates, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Ok(Arc::new(Self {
            engine: RwLock::new(engine),
            neighborhoods: NeighborhoodCache::new(),
            queries: QueryCache::new(),
            embeddings: EmbeddingCache::new(),
            provider,
            updates,
            pending_discovery: Mutex::new(HashMap::new()),
            debounce: Duration::from_millis(config.discovery_quiet_ms),
            node_count: AtomicU64::new(nodes),
            edge_count: AtomicU64::new(edges),
            events_applied: AtomicU64::new(0),
            discoveries_run: AtomicU64::new(0),
            is_updating: AtomicBool::new(false),
        }))
    }

    /// Subscribe to mutated-atom notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AtomId> {
        self.updates.subscribe()
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Apply one atom lifecycle event, then invalidate caches, notify
    /// subscribers, and (re)schedule semantic discovery when due.
    pub async fn handle_event(
        self: &Arc<Self>,
        event: AtomEvent,
    ) -> Result<MutationReport, LatticeError> {
        let report = {
            let mut engine = self.engine.write().await;
            let report = engine.apply_event(&event)?;
            self.refresh_counts(&engine)?;
            report
        };
        self.events_applied.fetch_add(1, Ordering::Relaxed);

        if report.changed {
            self.invalidate_for(&report.atom);
            let _ = self.updates.send(report.atom.clone());
        }
        if report.discovery_due {
            self.schedule_discovery(report.atom.clone());
        }
        debug!(
            atom = %report.atom,
            changed = report.changed,
            discovery_due = report.discovery_due,
            "event applied"
        );
        Ok(report)
    }

    /// Record an atom access.
    ///
    /// Every known access mutates the node (counter and timestamp), so
    /// subscribers are notified and cached query results listing the
    /// atom are dropped: the access counter is a ranking tiebreak.
    /// Usage-boosting accesses additionally rewrite incident edge
    /// weights and drop every derived cache for the atom.
    pub async fn record_access(
        &self,
        atom: &AtomId,
        kind: AccessKind,
    ) -> Result<bool, LatticeError> {
        let known = {
            let mut engine = self.engine.write().await;
            engine.record_access(atom, kind)?
        };
        if known {
            if kind.boosts_usage() {
                self.invalidate_for(atom);
            } else {
                self.queries.invalidate_containing(atom);
            }
            let _ = self.updates.send(atom.clone());
        }
        Ok(known)
    }

    /// Connect atoms sharing a grouping context.
    pub async fn connect_context(&self, members: &[AtomId]) -> Result<usize, LatticeError> {
        let added = {
            let mut engine = self.engine.write().await;
            let added = engine.connect_context(members)?;
            self.refresh_counts(&engine)?;
            added
        };
        if added > 0 {
            for member in members {
                self.invalidate_for(member);
                let _ = self.updates.send(member.clone());
            }
        }
        Ok(added)
    }

    /// Record a host-declared reference edge.
    pub async fn link_reference(
        &self,
        source: &AtomId,
        target: &AtomId,
        tag: Option<String>,
    ) -> Result<bool, LatticeError> {
        let added = {
            let mut engine = self.engine.write().await;
            let added = engine.link_reference(source, target, tag)?;
            self.refresh_counts(&engine)?;
            added
        };
        if added {
            self.invalidate_for(source);
            self.invalidate_for(target);
            let _ = self.updates.send(source.clone());
            let _ = self.updates.send(target.clone());
        }
        Ok(added)
    }

    /// Record a host-declared conceptual edge.
    pub async fn link_conceptual(
        &self,
        a: &AtomId,
        b: &AtomId,
        affinity: f64,
    ) -> Result<bool, LatticeError> {
        let added = {
            let mut engine = self.engine.write().await;
            let added = engine.link_conceptual(a, b, affinity)?;
            self.refresh_counts(&engine)?;
            added
        };
        if added {
            self.invalidate_for(a);
            self.invalidate_for(b);
            let _ = self.updates.send(a.clone());
            let _ = self.updates.send(b.clone());
        }
        Ok(added)
    }

    /// Infer transitive edges around an atom.
    pub async fn infer_transitive(&self, atom: &AtomId) -> Result<usize, LatticeError> {
        let added = {
            let mut engine = self.engine.write().await;
            let added = engine.infer_transitive(atom)?;
            self.refresh_counts(&engine)?;
            added
        };
        if added > 0 {
            self.invalidate_for(atom);
            let _ = self.updates.send(atom.clone());
        }
        Ok(added)
    }

    /// Store an embedding for an atom's text and flag the node.
    pub async fn record_embedding(
        &self,
        text: &str,
        vector: Vec<f32>,
        atom: Option<AtomId>,
    ) -> Result<(), LatticeError> {
        self.embeddings.put(text, vector, atom.clone());
        if let Some(id) = atom {
            let mut engine = self.engine.write().await;
            engine.mark_embedded(&id)?;
        }
        Ok(())
    }

    /// Cached embedding for a text, if present and fresh.
    pub fn cached_embedding(&self, text: &str) -> Option<Arc<CachedEmbedding>> {
        self.embeddings.get(text)
    }

    // -------------------------------------------------------------------------
    // Debounced semantic discovery
    // -------------------------------------------------------------------------

    /// Schedule discovery for an atom after the quiet interval. An
    /// already-pending request for the same atom is aborted and
    /// replaced, so a burst of updates coalesces into one run.
    pub fn schedule_discovery(self: &Arc<Self>, atom: AtomId) {
        let service = Arc::clone(self);
        let id = atom.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(service.debounce).await;
            service.run_discovery(&id).await;
            pending_lock(&service.pending_discovery).remove(&id);
        });
        if let Some(previous) = pending_lock(&self.pending_discovery).insert(atom, handle) {
            previous.abort();
        }
    }

    /// Number of discovery requests currently waiting out their quiet
    /// interval.
    pub fn pending_discoveries(&self) -> usize {
        pending_lock(&self.pending_discovery).len()
    }

    async fn run_discovery(&self, atom: &AtomId) {
        let scores = self.provider.similar_to(atom);
        let mut touched: Vec<AtomId> = Vec::new();
        {
            let mut engine = self.engine.write().await;
            for score in &scores {
                match engine.apply_similarity(score) {
                    Ok(true) => {
                        touched.push(score.source.clone());
                        touched.push(score.target.clone());
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(atom = %atom, error = %e, "similarity application failed");
                    }
                }
            }
            if let Err(e) = self.refresh_counts(&engine) {
                warn!(error = %e, "count refresh failed after discovery");
            }
        }
        for id in &touched {
            self.invalidate_for(id);
        }
        if !touched.is_empty() {
            let _ = self.updates.send(atom.clone());
        }
        self.discoveries_run.fetch_add(1, Ordering::Relaxed);
        debug!(atom = %atom, scores = scores.len(), "discovery run complete");
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Fetch a node.
    pub async fn get_node(&self, id: &AtomId) -> Result<Option<GraphNode>, LatticeError> {
        let engine = self.engine.read().await;
        engine.query().get_node(id)
    }

    /// One-hop neighbors of a node.
    pub async fn neighbors(
        &self,
        id: &AtomId,
        direction: Direction,
        kinds: Option<&[EdgeKind]>,
        limit: Option<usize>,
    ) -> Result<Vec<NeighborEntry>, LatticeError> {
        let engine = self.engine.read().await;
        engine.query().neighbors(id, direction, kinds, limit)
    }

    /// Hot 2-hop neighborhood, cache-fronted.
    pub async fn neighborhood(
        &self,
        focus: &AtomId,
    ) -> Result<Option<Arc<Neighborhood>>, LatticeError> {
        if let Some(hit) = self.neighborhoods.get(focus) {
            return Ok(Some(hit));
        }
        let computed = {
            let engine = self.engine.read().await;
            engine
                .query()
                .neighborhood(focus, HOT_NEIGHBORHOOD_DEPTH, HOT_NEIGHBORHOOD_PER_LEVEL)?
        };
        Ok(computed.map(|hood| {
            self.neighborhoods.put(hood.clone());
            Arc::new(hood)
        }))
    }

    /// Ranked text search, cache-fronted. `kinds` restricts atom types
    /// and participates in the cache key.
    pub async fn search(
        &self,
        text: &str,
        context: Option<&str>,
        focus: Option<&AtomId>,
        kinds: &[String],
        k: usize,
    ) -> Result<Arc<CachedQuery>, LatticeError> {
        let key = canonical_query_key(text, context, focus, kinds);
        if let Some(hit) = self.queries.get(&key) {
            return Ok(hit);
        }
        let nodes = {
            let engine = self.engine.read().await;
            let query = engine.query();
            let mut exclude = std::collections::BTreeSet::new();
            if let Some(focus_id) = focus {
                exclude.insert(focus_id.clone());
            }
            if kinds.is_empty() {
                query.search(text, &NodeFilter { exclude, ..NodeFilter::default() }, k)?
            } else {
                let mut merged = Vec::new();
                for kind in kinds {
                    let filter = NodeFilter {
                        kind: Some(kind.clone()),
                        exclude: exclude.clone(),
                        ..NodeFilter::default()
                    };
                    merged.extend(query.search(text, &filter, k)?);
                }
                merged.sort_by(|a, b| {
                    b.page_rank
                        .total_cmp(&a.page_rank)
                        .then_with(|| a.id.cmp(&b.id))
                });
                merged.truncate(k);
                merged
            }
        };
        let result = Arc::new(CachedQuery::new(nodes));
        self.queries.put(key, CachedQuery::clone(&result));
        Ok(result)
    }

    /// Top-ranked nodes under a filter.
    pub async fn top_ranked(
        &self,
        k: usize,
        filter: &NodeFilter,
    ) -> Result<Vec<GraphNode>, LatticeError> {
        let engine = self.engine.read().await;
        engine.query().top_ranked(k, filter)
    }

    /// BFS shortest path between two atoms.
    pub async fn shortest_path(
        &self,
        source: &AtomId,
        target: &AtomId,
        max_depth: usize,
    ) -> Result<Option<Vec<AtomId>>, LatticeError> {
        let engine = self.engine.read().await;
        engine.query().shortest_path(source, target, max_depth)
    }

    /// All edges between two atoms.
    pub async fn edges_between(
        &self,
        a: &AtomId,
        b: &AtomId,
    ) -> Result<Vec<GraphEdge>, LatticeError> {
        let engine = self.engine.read().await;
        engine.query().edges_between(a, b)
    }

    /// Whole-graph statistics.
    pub async fn statistics(&self) -> Result<GraphStats, LatticeError> {
        let engine = self.engine.read().await;
        engine.query().statistics()
    }

    // -------------------------------------------------------------------------
    // Counters and maintenance
    // -------------------------------------------------------------------------

    /// Current counter snapshot.
    pub fn counters(&self) -> ServiceCounters {
        ServiceCounters {
            nodes: self.node_count.load(Ordering::Relaxed),
            edges: self.edge_count.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            discoveries_run: self.discoveries_run.load(Ordering::Relaxed),
            is_updating: self.is_updating.load(Ordering::Relaxed),
        }
    }

    /// Per-tier cache counter snapshots.
    pub fn cache_stats(&self) -> CacheTierStats {
        CacheTierStats {
            neighborhoods: self.neighborhoods.stats(),
            queries: self.queries.stats(),
            embeddings: self.embeddings.stats(),
        }
    }

    /// Spawn the periodic decay/rank maintenance task.
    pub fn spawn_maintenance(self: &Arc<Self>, config: &ServiceConfig) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let decay_every = Duration::from_secs(config.decay_interval_secs.max(1));
        let rank_every = Duration::from_secs(config.rank_interval_secs.max(1));
        tokio::spawn(async move {
            let mut decay_tick = tokio::time::interval(decay_every);
            let mut rank_tick = tokio::time::interval(rank_every);
            // Skip the immediate first tick of each interval.
            decay_tick.tick().await;
            rank_tick.tick().await;
            loop {
                tokio::select! {
                    _ = decay_tick.tick() => service.run_decay().await,
                    _ = rank_tick.tick() => service.run_rank().await,
                }
            }
        })
    }

    /// One recency decay pass. Best-effort.
    pub async fn run_decay(&self) {
        self.is_updating.store(true, Ordering::Relaxed);
        let outcome = {
            let mut engine = self.engine.write().await;
            engine.decay_pass(Utc::now())
        };
        match outcome {
            Ok(updated) if updated > 0 => {
                // Weights moved graph-wide; drop derived caches wholesale.
                self.neighborhoods.clear();
                self.queries.clear();
                info!(edges = updated, "decay pass complete");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "decay pass failed"),
        }
        self.is_updating.store(false, Ordering::Relaxed);
    }

    /// One rank pass. Best-effort.
    pub async fn run_rank(&self) {
        self.is_updating.store(true, Ordering::Relaxed);
        let outcome = {
            let mut engine = self.engine.write().await;
            engine.rank_pass()
        };
        match outcome {
            Ok(()) => {
                self.queries.clear();
                debug!("rank pass complete");
            }
            Err(e) => warn!(error = %e, "rank pass failed"),
        }
        self.is_updating.store(false, Ordering::Relaxed);
    }

    /// Prune expired cache entries across all tiers.
    pub fn prune_caches(&self) -> usize {
        self.neighborhoods.prune() + self.queries.prune() + self.embeddings.prune()
    }

    /// Abort all pending discovery tasks.
    pub fn shutdown(&self) {
        let mut pending = pending_lock(&self.pending_discovery);
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn refresh_counts(&self, engine: &GraphEngine) -> Result<(), LatticeError> {
        self.node_count
            .store(engine.store().node_count()? as u64, Ordering::Relaxed);
        self.edge_count
            .store(engine.store().edge_count()? as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Cache invalidation after a mutation touching `atom`: hot
    /// neighborhoods containing it anywhere, query results listing it,
    /// and embeddings cross-referencing it.
    fn invalidate_for(&self, atom: &AtomId) {
        self.neighborhoods.invalidate_containing(atom);
        self.queries.invalidate_containing(atom);
        self.embeddings.invalidate_atom(atom);
    }
}

impl Drop for GraphService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
