//! # lattice-core
//!
//! The local knowledge-graph engine for Lattice - THE LOGIC.
//!
//! This crate maintains a weighted relationship graph over external
//! content units ("atoms"): it consumes atom lifecycle events, keeps
//! explicit edges reconciled with declared links, materializes semantic,
//! contextual, and transitive edges, blends four weight components per
//! edge, and answers bounded traversal and ranking queries behind
//! TTL + LRU cache tiers.
//!
//! ## Architectural Constraints
//!
//! - The CORE is the only place graph state exists (stateful).
//! - Exactly one writer: every mutation flows through [`GraphEngine`].
//! - Queries are read-only and computationally bounded.
//! - Content stays external; the graph stores ids, denormalized
//!   attributes, and weights, never atom bodies.
//! - NO async, NO network dependencies (pure Rust); the app layer owns
//!   the runtime.

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod engine;
pub mod graph;
pub mod primitives;
pub mod query;
pub mod storage;
pub mod types;
pub mod weights;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AccessKind, AtomDescriptor, AtomEvent, AtomField, AtomId, AtomLink, EdgeId, EdgeKey, EdgeKind,
    GraphEdge, GraphNode, GraphStats, LatticeError, SimilarityScore,
};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use engine::{GraphEngine, MutationReport};
pub use graph::{GraphStore, MemoryGraph};
pub use query::{Direction, NeighborEntry, Neighborhood, NodeFilter, QueryEngine};
pub use storage::{RedbStore, StorageBackend};

// =============================================================================
// RE-EXPORTS: Cache Tiers
// =============================================================================

pub use cache::{
    CacheStatsSnapshot, CachedEmbedding, CachedQuery, EmbeddingCache, NeighborhoodCache,
    QueryCache, canonical_query_key,
};
