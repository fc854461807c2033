//! # Core Type Definitions
//!
//! Value types for the Lattice knowledge graph:
//! - Identifiers (`AtomId`, `EdgeId`)
//! - Persisted graph values (`GraphNode`, `GraphEdge`, `EdgeKey`)
//! - Inbound lifecycle events (`AtomEvent`, `AtomDescriptor`, `AtomLink`)
//! - Access and similarity signals (`AccessKind`, `SimilarityScore`)
//! - Aggregate output (`GraphStats`)
//! - Error types (`LatticeError`)
//!
//! All graph state types implement `Ord` where they serve as map keys so
//! the stores can keep deterministic `BTreeMap` ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::weights;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier of an atom, the external content unit a node wraps.
///
/// Atom ids are opaque strings minted by the content store; the graph
/// never parses or interprets them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AtomId(pub String);

impl AtomId {
    /// Create an atom id from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AtomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Surrogate key for an edge, assigned by the store on insert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EdgeId(pub u64);

impl EdgeId {
    /// Placeholder id carried by freshly constructed edges before the
    /// store assigns a real one.
    pub const UNASSIGNED: Self = Self(0);
}

// =============================================================================
// EDGE KIND
// =============================================================================

/// The relation class of an edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EdgeKind {
    /// Mirrors a structural link declared by the atom itself.
    Explicit,
    /// A content reference recorded by the host (e.g. a citation).
    Reference,
    /// Computed from a similarity score above the threshold.
    Semantic,
    /// A host-declared conceptual affinity between atoms.
    Conceptual,
    /// Atoms sharing a grouping context.
    Contextual,
    /// Inferred across a 2-hop path at reduced weight.
    Transitive,
}

impl EdgeKind {
    /// Stable lowercase name, used in canonical cache keys and CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Reference => "reference",
            Self::Semantic => "semantic",
            Self::Conceptual => "conceptual",
            Self::Contextual => "contextual",
            Self::Transitive => "transitive",
        }
    }
}

// =============================================================================
// GRAPH NODE
// =============================================================================

/// A node in the graph, wrapping exactly one atom.
///
/// `kind` and `category` are denormalized copies of atom attributes for
/// fast filtering. `in_degree`/`out_degree` are maintained incrementally
/// by the engine and always equal the live count of edges referencing the
/// node as target/source; they are only ever recomputed from scratch by
/// the explicit repair pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// The atom this node wraps (unique key).
    pub id: AtomId,
    /// Denormalized atom type.
    pub kind: String,
    /// Denormalized atom category.
    pub category: Option<String>,
    /// 2D position hint set by the layout collaborator; opaque to the core.
    pub position: Option<(f32, f32)>,
    /// Cluster tag set by the layout/clustering collaborator.
    pub cluster: Option<String>,
    /// PageRank score in [0, 1], normalized so the top node reaches 1.0.
    pub page_rank: f64,
    /// Count of edges referencing this node as target.
    pub in_degree: u32,
    /// Count of edges referencing this node as source.
    pub out_degree: u32,
    /// Number of recorded accesses.
    pub access_count: u64,
    /// Timestamp of the most recent access, if any.
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Whether an embedding has been recorded for the atom.
    pub has_embedding: bool,
    /// When the embedding was recorded.
    pub embedded_at: Option<DateTime<Utc>>,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// When the node was last mutated.
    pub updated_at: DateTime<Utc>,
    /// The source atom's own update timestamp (staleness marker).
    pub atom_updated_at: DateTime<Utc>,
}

impl GraphNode {
    /// Create a fresh node for an atom descriptor.
    #[must_use]
    pub fn new(atom: &AtomDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            id: atom.id.clone(),
            kind: atom.kind.clone(),
            category: atom.category.clone(),
            position: None,
            cluster: None,
            page_rank: 0.0,
            in_degree: 0,
            out_degree: 0,
            access_count: 0,
            last_accessed_at: None,
            has_embedding: false,
            embedded_at: None,
            created_at: now,
            updated_at: now,
            atom_updated_at: atom.updated_at,
        }
    }

    /// Total degree (in + out).
    #[must_use]
    pub const fn degree(&self) -> u32 {
        self.in_degree.saturating_add(self.out_degree)
    }

    /// Record an access: bump the counter and refresh the timestamp.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = Some(now);
    }

    /// Mark that an embedding exists for this atom.
    pub fn mark_embedded(&mut self, now: DateTime<Utc>) {
        self.has_embedding = true;
        self.embedded_at = Some(now);
        self.updated_at = now;
    }
}

// =============================================================================
// GRAPH EDGE
// =============================================================================

/// An edge between two nodes with four independent weight components and
/// their blended `combined_weight`.
///
/// The combination formula lives in [`weights::combine`] and nowhere
/// else; call [`GraphEdge::recombine`] after changing any component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Surrogate key assigned by the store.
    pub id: EdgeId,
    /// Source endpoint (canonically smaller endpoint for undirected edges).
    pub source: AtomId,
    /// Target endpoint.
    pub target: AtomId,
    /// Relation class.
    pub kind: EdgeKind,
    /// Optional link-type tag carried over from the atom's relation.
    pub tag: Option<String>,
    /// Whether the edge is directed source -> target.
    pub directed: bool,
    /// Structural weight in [0, 1].
    pub structural_weight: f64,
    /// Semantic weight in [0, 1].
    pub semantic_weight: f64,
    /// Recency weight in [0, 1]; decays with time since `reinforced_at`.
    pub recency_weight: f64,
    /// Usage weight in [0, 1]; boosted by edit/reference accesses.
    pub usage_weight: f64,
    /// The blended scalar used for ranking, filtering, and pruning.
    pub combined_weight: f64,
    /// When the edge was created.
    pub created_at: DateTime<Utc>,
    /// Basis timestamp for recency decay; reset on creation and on usage
    /// boosts.
    pub reinforced_at: DateTime<Utc>,
}

impl GraphEdge {
    fn base(
        source: AtomId,
        target: AtomId,
        kind: EdgeKind,
        directed: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let (source, target) = if directed || source <= target {
            (source, target)
        } else {
            (target, source)
        };
        let mut edge = Self {
            id: EdgeId::UNASSIGNED,
            source,
            target,
            kind,
            tag: None,
            directed,
            structural_weight: 0.0,
            semantic_weight: 0.0,
            recency_weight: 1.0,
            usage_weight: 0.0,
            combined_weight: 0.0,
            created_at: now,
            reinforced_at: now,
        };
        edge.recombine();
        edge
    }

    /// Explicit edge mirroring a structural link: directed, structural 1.0.
    #[must_use]
    pub fn explicit(
        source: AtomId,
        target: AtomId,
        tag: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut edge = Self::base(source, target, EdgeKind::Explicit, true, now);
        edge.tag = tag;
        edge.structural_weight = 1.0;
        edge.recombine();
        edge
    }

    /// Reference edge recorded by the host: directed, structural 1.0.
    #[must_use]
    pub fn reference(
        source: AtomId,
        target: AtomId,
        tag: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut edge = Self::base(source, target, EdgeKind::Reference, true, now);
        edge.tag = tag;
        edge.structural_weight = 1.0;
        edge.recombine();
        edge
    }

    /// Semantic edge from a similarity score: undirected,
    /// semantic weight = similarity.
    #[must_use]
    pub fn semantic(a: AtomId, b: AtomId, similarity: f64, now: DateTime<Utc>) -> Self {
        let mut edge = Self::base(a, b, EdgeKind::Semantic, false, now);
        edge.semantic_weight = weights::clamp01(similarity);
        edge.recombine();
        edge
    }

    /// Conceptual edge declared by the host: undirected,
    /// semantic weight = affinity.
    #[must_use]
    pub fn conceptual(a: AtomId, b: AtomId, affinity: f64, now: DateTime<Utc>) -> Self {
        let mut edge = Self::base(a, b, EdgeKind::Conceptual, false, now);
        edge.semantic_weight = weights::clamp01(affinity);
        edge.recombine();
        edge
    }

    /// Contextual edge for atoms sharing a grouping: undirected,
    /// structural 0.7.
    #[must_use]
    pub fn contextual(a: AtomId, b: AtomId, now: DateTime<Utc>) -> Self {
        let mut edge = Self::base(a, b, EdgeKind::Contextual, false, now);
        edge.structural_weight = crate::primitives::CONTEXTUAL_STRUCTURAL;
        edge.recombine();
        edge
    }

    /// Transitive edge inferred across a 2-hop path: undirected,
    /// structural = inferred weight x 0.4.
    #[must_use]
    pub fn transitive(a: AtomId, b: AtomId, inferred: f64, now: DateTime<Utc>) -> Self {
        let mut edge = Self::base(a, b, EdgeKind::Transitive, false, now);
        edge.structural_weight =
            weights::clamp01(inferred) * crate::primitives::TRANSITIVE_DAMPING;
        edge.recombine();
        edge
    }

    /// The deduplication key for this edge.
    #[must_use]
    pub fn key(&self) -> EdgeKey {
        if self.directed {
            EdgeKey::directed(self.source.clone(), self.target.clone(), self.kind)
        } else {
            EdgeKey::undirected(self.source.clone(), self.target.clone(), self.kind)
        }
    }

    /// Whether the edge touches the given atom at either endpoint.
    #[must_use]
    pub fn touches(&self, id: &AtomId) -> bool {
        &self.source == id || &self.target == id
    }

    /// The endpoint opposite to `id`, or `None` if `id` is not an endpoint.
    #[must_use]
    pub fn other_endpoint(&self, id: &AtomId) -> Option<&AtomId> {
        if &self.source == id {
            Some(&self.target)
        } else if &self.target == id {
            Some(&self.source)
        } else {
            None
        }
    }

    /// Recompute `combined_weight` from the current components.
    pub fn recombine(&mut self) {
        self.combined_weight = weights::combine(
            self.structural_weight,
            self.semantic_weight,
            self.recency_weight,
            self.usage_weight,
        );
    }
}

// =============================================================================
// EDGE KEY (deduplication)
// =============================================================================

/// Deduplication key: at most one edge may exist per key.
///
/// Directed edges key on (source, target, kind); undirected edges key on
/// (sorted endpoints, kind). This is a structured key — relation tags and
/// ids are never joined into a delimited string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    /// First endpoint (source for directed edges).
    pub a: AtomId,
    /// Second endpoint (target for directed edges).
    pub b: AtomId,
    /// Relation class.
    pub kind: EdgeKind,
}

impl EdgeKey {
    /// Key for a directed edge.
    #[must_use]
    pub const fn directed(source: AtomId, target: AtomId, kind: EdgeKind) -> Self {
        Self {
            a: source,
            b: target,
            kind,
        }
    }

    /// Key for an undirected edge; endpoints are sorted so (x, y) and
    /// (y, x) produce the same key.
    #[must_use]
    pub fn undirected(x: AtomId, y: AtomId, kind: EdgeKind) -> Self {
        if x <= y {
            Self { a: x, b: y, kind }
        } else {
            Self { a: y, b: x, kind }
        }
    }
}

// =============================================================================
// ATOM LIFECYCLE EVENTS
// =============================================================================

/// A structural relation declared by an atom: target id plus an optional
/// relation tag, as a structured pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomLink {
    /// The atom the relation points at.
    pub target: AtomId,
    /// Optional relation tag (may contain any characters).
    pub tag: Option<String>,
}

impl AtomLink {
    /// Create a link with no tag.
    #[must_use]
    pub fn to(target: AtomId) -> Self {
        Self { target, tag: None }
    }

    /// Create a tagged link.
    #[must_use]
    pub fn tagged(target: AtomId, tag: impl Into<String>) -> Self {
        Self {
            target,
            tag: Some(tag.into()),
        }
    }
}

/// The slice of atom state the graph consumes: identity, denormalized
/// attributes, update timestamp, and the structural relation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomDescriptor {
    /// Atom id.
    pub id: AtomId,
    /// Atom type.
    pub kind: String,
    /// Atom category.
    pub category: Option<String>,
    /// When the atom itself was last updated.
    pub updated_at: DateTime<Utc>,
    /// The atom's current structural links.
    pub links: Vec<AtomLink>,
}

/// Which atom fields changed in an update event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtomField {
    /// Atom type changed.
    Kind,
    /// Atom category changed.
    Category,
    /// Title text changed.
    Title,
    /// Body text changed.
    Body,
    /// Structured payload changed.
    Payload,
    /// The structural relation list changed.
    Links,
}

impl AtomField {
    /// Content fields trigger semantic re-discovery.
    #[must_use]
    pub const fn is_content(self) -> bool {
        matches!(self, Self::Title | Self::Body | Self::Payload)
    }
}

/// An atom lifecycle event delivered by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtomEvent {
    /// The atom was created.
    Created(AtomDescriptor),
    /// The atom was updated; `changed` lists the affected fields.
    Updated {
        /// Current atom state.
        atom: AtomDescriptor,
        /// Fields the update touched.
        changed: Vec<AtomField>,
    },
    /// The atom was deleted.
    Deleted(AtomId),
}

// =============================================================================
// ACCESS & SIMILARITY SIGNALS
// =============================================================================

/// How an atom was accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKind {
    /// The atom was viewed.
    View,
    /// The atom was edited.
    Edit,
    /// The atom surfaced in a search.
    Search,
    /// The atom was referenced from another atom.
    Reference,
}

impl AccessKind {
    /// Edit and reference accesses boost the usage weight of incident
    /// edges; view and search do not.
    #[must_use]
    pub const fn boosts_usage(self) -> bool {
        matches!(self, Self::Edit | Self::Reference)
    }
}

/// A similarity result handed over by the external embedding collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    /// First atom.
    pub source: AtomId,
    /// Second atom.
    pub target: AtomId,
    /// Similarity in [0, 1].
    pub score: f64,
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Aggregate graph statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GraphStats {
    /// Total node count.
    pub node_count: usize,
    /// Total edge count.
    pub edge_count: usize,
    /// Mean total degree across nodes.
    pub avg_degree: f64,
    /// Maximum total degree.
    pub max_degree: u32,
    /// Mean PageRank across nodes.
    pub avg_page_rank: f64,
    /// Fraction of nodes with a recorded embedding.
    pub embedding_coverage: f64,
    /// Node count per atom type.
    pub kinds: BTreeMap<String, usize>,
    /// Directed density: edges / (n * (n - 1)).
    pub density: f64,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors surfaced by the graph engine and stores.
///
/// Missing nodes or edges are never errors — queries return empty or
/// absent results instead. These variants cover storage and
/// serialization failures only.
#[derive(Debug, Error)]
pub enum LatticeError {
    /// An I/O error occurred in the persistent store.
    #[error("I/O error: {0}")]
    Io(String),

    /// A value failed to serialize.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored value failed to deserialize.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The persistent store rejected an operation (transaction, table, or
    /// commit failure).
    #[error("Storage error: {0}")]
    Storage(String),
}

// =============================================================================
// TESTS
// =============================================================================
