//! # Engine Constants
//!
//! Hardcoded tuning constants for the Lattice core.
//!
//! These are compiled into the binary and immutable at runtime. The
//! service layer may expose its own configuration for runtime concerns
//! (intervals, paths); the graph semantics below are fixed.

/// Minimum similarity score that produces a semantic edge.
///
/// Scores below this are discarded without touching the graph.
pub const SEMANTIC_THRESHOLD: f64 = 0.6;

/// Minimum combined weight for an edge to count as a neighbor link
/// in traversals, and for a transitive inference to be materialized.
pub const MIN_NEIGHBOR_WEIGHT: f64 = 0.1;

/// Usage-weight increment applied to every incident edge when an atom
/// is accessed via an edit or reference. Capped at 1.0.
pub const USAGE_BOOST: f64 = 0.05;

/// Damping factor applied to the inferred weight of a transitive edge.
pub const TRANSITIVE_DAMPING: f64 = 0.4;

/// Structural weight of a contextual (shared-grouping) edge.
pub const CONTEXTUAL_STRUCTURAL: f64 = 0.7;

/// Half-life of the recency weight, in days.
pub const RECENCY_HALF_LIFE_DAYS: f64 = 7.0;

/// Floor below which the recency weight never decays.
pub const RECENCY_FLOOR: f64 = 0.1;

/// PageRank damping factor.
pub const PAGERANK_DAMPING: f64 = 0.85;

/// Number of PageRank power iterations per rank pass.
pub const PAGERANK_ITERATIONS: usize = 20;

/// Hard cap on neighborhood expansion depth.
///
/// All traversals must be computationally bounded; this prevents
/// runaway expansion in dense graphs.
pub const MAX_NEIGHBORHOOD_DEPTH: usize = 4;

/// Hard cap on BFS shortest-path depth (edges in the path).
pub const MAX_PATH_DEPTH: usize = 16;

/// Depth of the precomputed hot neighborhood.
pub const HOT_NEIGHBORHOOD_DEPTH: usize = 2;

/// Per-level truncation for the hot neighborhood.
pub const HOT_NEIGHBORHOOD_PER_LEVEL: usize = 25;

// =============================================================================
// CACHE TIER SIZING
// =============================================================================

/// Hot-neighborhood tier: time-to-live in seconds.
pub const NEIGHBORHOOD_CACHE_TTL_SECS: u64 = 60;

/// Hot-neighborhood tier: maximum entries.
pub const NEIGHBORHOOD_CACHE_CAPACITY: usize = 50;

/// Query-result tier: time-to-live in seconds.
pub const QUERY_CACHE_TTL_SECS: u64 = 300;

/// Query-result tier: maximum entries.
pub const QUERY_CACHE_CAPACITY: usize = 100;

/// Embedding tier: time-to-live in seconds.
pub const EMBEDDING_CACHE_TTL_SECS: u64 = 3600;

/// Embedding tier: maximum entries.
pub const EMBEDDING_CACHE_CAPACITY: usize = 1000;

/// Number of leading characters hashed into the embedding cache key
/// prefix component.
pub const EMBEDDING_KEY_PREFIX_CHARS: usize = 64;

/// Quiet interval for debounced semantic discovery, in milliseconds.
///
/// A burst of updates to one atom coalesces into a single discovery
/// request issued this long after the last update.
pub const DISCOVERY_QUIET_MS: u64 = 2000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_shares_and_bounds_are_sane() {
        assert!(SEMANTIC_THRESHOLD > MIN_NEIGHBOR_WEIGHT);
        assert!(RECENCY_FLOOR > 0.0 && RECENCY_FLOOR < 1.0);
        assert!(PAGERANK_DAMPING > 0.0 && PAGERANK_DAMPING < 1.0);
    }

    #[test]
    fn cache_tiers_are_ordered_by_volatility() {
        // Neighborhoods churn fastest, embeddings slowest.
        assert!(NEIGHBORHOOD_CACHE_TTL_SECS < QUERY_CACHE_TTL_SECS);
        assert!(QUERY_CACHE_TTL_SECS < EMBEDDING_CACHE_TTL_SECS);
    }
}
