//! # Cache Tiers
//!
//! Three independent read caches in front of the query engine, all
//! built on one TTL + LRU map:
//!
//! - [`NeighborhoodCache`]: precomputed 2-hop neighborhoods, 60 s / 50.
//! - [`QueryCache`]: ranked query results keyed by a canonical query
//!   string, 300 s / 100, bulk-invalidatable by contained atom id.
//! - [`EmbeddingCache`]: embedding vectors keyed by content hashes,
//!   3600 s / 1000, hash-verified on read.
//!
//! Values are `Arc` snapshots: a stale read is data-safe, merely old.
//! No tier ever calls another. Time is passed in explicitly at the
//! `TtlLru` level so expiry is testable without sleeping.

use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::primitives::{
    EMBEDDING_CACHE_CAPACITY, EMBEDDING_CACHE_TTL_SECS, EMBEDDING_KEY_PREFIX_CHARS,
    NEIGHBORHOOD_CACHE_CAPACITY, NEIGHBORHOOD_CACHE_TTL_SECS, QUERY_CACHE_CAPACITY,
    QUERY_CACHE_TTL_SECS,
};
use crate::query::Neighborhood;
use crate::types::{AtomId, GraphNode};

// =============================================================================
// STATISTICS
// =============================================================================

/// Live hit/miss counters for one cache tier.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a tier's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Values stored.
    pub insertions: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
    /// Current entry count.
    pub len: usize,
}

impl CacheStatsSnapshot {
    /// Hit ratio in [0, 1]; zero when the tier is untouched.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// TTL + LRU MAP
// =============================================================================

#[derive(Debug)]
struct Entry<V> {
    value: Arc<V>,
    inserted_at: Instant,
}

/// Bounded map with per-entry TTL and least-recently-used eviction.
///
/// `order` runs oldest-used at the front. Reads promote to the back;
/// inserts evict from the front while at capacity. All time-sensitive
/// operations take `now` explicitly.
#[derive(Debug)]
pub struct TtlLru<K, V> {
    entries: BTreeMap<K, Entry<V>>,
    order: VecDeque<K>,
    capacity: usize,
    ttl: Duration,
    stats: Arc<CacheStats>,
}

impl<K: Ord + Clone, V> TtlLru<K, V> {
    /// Create a map with the given TTL and capacity.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl,
            stats: Arc::new(CacheStats::default()),
        }
    }

    fn promote(&mut self, key: &K) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.clone());
    }

    fn drop_entry(&mut self, key: &K) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Look up a key, counting a hit only when `verify` accepts the
    /// stored value; a rejected value is dropped and counted as a miss.
    /// Expired entries are purged on contact.
    pub fn get_verified(
        &mut self,
        key: &K,
        now: Instant,
        verify: impl FnOnce(&V) -> bool,
    ) -> Option<Arc<V>> {
        let Some(entry) = self.entries.get(key) else {
            self.stats.record_miss();
            return None;
        };
        let expired = now.duration_since(entry.inserted_at) >= self.ttl;
        let value = Arc::clone(&entry.value);
        if expired {
            self.drop_entry(key);
            self.stats.record_expiration();
            self.stats.record_miss();
            return None;
        }
        if !verify(&value) {
            self.drop_entry(key);
            self.stats.record_miss();
            return None;
        }
        self.promote(key);
        self.stats.record_hit();
        Some(value)
    }

    /// Look up a key.
    pub fn get(&mut self, key: &K, now: Instant) -> Option<Arc<V>> {
        self.get_verified(key, now, |_| true)
    }

    /// Store a value, evicting least-recently-used entries while at
    /// capacity. Overwriting an existing key refreshes its TTL.
    pub fn set(&mut self, key: K, value: V, now: Instant) {
        if self.entries.contains_key(&key) {
            self.entries.insert(
                key.clone(),
                Entry {
                    value: Arc::new(value),
                    inserted_at: now,
                },
            );
            self.promote(&key);
            self.stats.record_insertion();
            return;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            self.stats.record_eviction();
        }
        self.entries.insert(
            key.clone(),
            Entry {
                value: Arc::new(value),
                inserted_at: now,
            },
        );
        self.order.push_back(key);
        self.stats.record_insertion();
    }

    /// Remove one key.
    pub fn invalidate(&mut self, key: &K) -> bool {
        self.drop_entry(key)
    }

    /// Remove every entry the predicate matches, returning the count.
    pub fn invalidate_matching(&mut self, mut matches: impl FnMut(&K, &V) -> bool) -> usize {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(k, e)| matches(k, &e.value))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.drop_entry(key);
        }
        doomed.len()
    }

    /// Drop every expired entry, returning the count.
    pub fn prune(&mut self, now: Instant) -> usize {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.inserted_at) >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.drop_entry(key);
            self.stats.record_expiration();
        }
        doomed.len()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            insertions: self.stats.insertions.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            len: self.entries.len(),
        }
    }
}

fn recover<'a, K, V>(lock: &'a Mutex<TtlLru<K, V>>) -> MutexGuard<'a, TtlLru<K, V>> {
    // A poisoned cache holds only discardable snapshots.
    lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// =============================================================================
// NEIGHBORHOOD TIER
// =============================================================================

/// Hot-neighborhood tier: precomputed 2-hop expansions keyed by focus
/// atom.
#[derive(Debug)]
pub struct NeighborhoodCache {
    inner: Mutex<TtlLru<AtomId, Neighborhood>>,
}

impl Default for NeighborhoodCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborhoodCache {
    /// Create the tier at its fixed sizing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TtlLru::new(
                Duration::from_secs(NEIGHBORHOOD_CACHE_TTL_SECS),
                NEIGHBORHOOD_CACHE_CAPACITY,
            )),
        }
    }

    /// Cached neighborhood for a focus atom, if fresh.
    pub fn get(&self, focus: &AtomId) -> Option<Arc<Neighborhood>> {
        recover(&self.inner).get(focus, Instant::now())
    }

    /// Store a freshly computed neighborhood.
    pub fn put(&self, hood: Neighborhood) {
        let focus = hood.focus.clone();
        recover(&self.inner).set(focus, hood, Instant::now());
    }

    /// Drop every entry whose id set contains the atom. A mutation
    /// anywhere in a cached neighborhood makes it stale, not just a
    /// mutation of the focus.
    pub fn invalidate_containing(&self, id: &AtomId) -> usize {
        recover(&self.inner).invalidate_matching(|_, hood| hood.contains(id))
    }

    /// Drop expired entries.
    pub fn prune(&self) -> usize {
        recover(&self.inner).prune(Instant::now())
    }

    /// Drop everything.
    pub fn clear(&self) {
        recover(&self.inner).clear();
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStatsSnapshot {
        recover(&self.inner).snapshot()
    }
}

// =============================================================================
// QUERY TIER
// =============================================================================

/// A cached ranked-query result together with the atom ids it covers.
#[derive(Debug, Clone)]
pub struct CachedQuery {
    /// The result rows, in rank order.
    pub nodes: Vec<GraphNode>,
    /// Every atom id appearing in the result.
    pub ids: BTreeSet<AtomId>,
}

impl CachedQuery {
    /// Wrap a result, deriving its id set.
    #[must_use]
    pub fn new(nodes: Vec<GraphNode>) -> Self {
        let ids = nodes.iter().map(|n| n.id.clone()).collect();
        Self { nodes, ids }
    }
}

/// Canonical cache key for a ranked query: lowercased and
/// whitespace-collapsed text, optional context tag, optional focus
/// atom, and the sorted type filter.
#[must_use]
pub fn canonical_query_key(
    text: &str,
    context: Option<&str>,
    focus: Option<&AtomId>,
    kinds: &[String],
) -> String {
    let normalized = text
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let mut sorted_kinds = kinds.to_vec();
    sorted_kinds.sort();
    format!(
        "q={normalized}\u{1f}ctx={}\u{1f}focus={}\u{1f}kinds={}",
        context.unwrap_or(""),
        focus.map(AtomId::as_str).unwrap_or(""),
        sorted_kinds.join(",")
    )
}

/// Query-result tier keyed by the canonical query string.
#[derive(Debug)]
pub struct QueryCache {
    inner: Mutex<TtlLru<String, CachedQuery>>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    /// Create the tier at its fixed sizing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TtlLru::new(
                Duration::from_secs(QUERY_CACHE_TTL_SECS),
                QUERY_CACHE_CAPACITY,
            )),
        }
    }

    /// Cached result for a canonical key, if fresh.
    pub fn get(&self, key: &str) -> Option<Arc<CachedQuery>> {
        recover(&self.inner).get(&key.to_string(), Instant::now())
    }

    /// Store a result under its canonical key.
    pub fn put(&self, key: String, result: CachedQuery) {
        recover(&self.inner).set(key, result, Instant::now());
    }

    /// Drop every cached result containing the atom.
    pub fn invalidate_containing(&self, id: &AtomId) -> usize {
        recover(&self.inner).invalidate_matching(|_, result| result.ids.contains(id))
    }

    /// Drop every cached result whose normalized query text starts
    /// with the prefix.
    pub fn invalidate_text_prefix(&self, prefix: &str) -> usize {
        let needle = format!(
            "q={}",
            prefix
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join(" ")
        );
        recover(&self.inner).invalidate_matching(|key, _| key.starts_with(&needle))
    }

    /// Drop expired entries.
    pub fn prune(&self) -> usize {
        recover(&self.inner).prune(Instant::now())
    }

    /// Drop everything.
    pub fn clear(&self) {
        recover(&self.inner).clear();
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStatsSnapshot {
        recover(&self.inner).snapshot()
    }
}

// =============================================================================
// EMBEDDING TIER
// =============================================================================

/// Content-hash key: the hash of the first characters plus the hash of
/// the full text. Storing both keeps the key cheap to compare while
/// making prefix collisions between different texts detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EmbeddingKey {
    prefix_hash: u64,
    full_hash: u64,
}

impl EmbeddingKey {
    /// Derive the key for a text.
    #[must_use]
    pub fn for_text(text: &str) -> Self {
        let prefix: String = text.chars().take(EMBEDDING_KEY_PREFIX_CHARS).collect();
        Self {
            prefix_hash: hash_str(&prefix),
            full_hash: hash_str(text),
        }
    }
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// A cached embedding vector with its verification hash and optional
/// atom cross-reference.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEmbedding {
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// The atom this text belongs to, when known.
    pub atom: Option<AtomId>,
    /// Hash of the full source text, re-checked on every read.
    pub full_hash: u64,
}

/// Embedding tier keyed by content hashes.
#[derive(Debug)]
pub struct EmbeddingCache {
    inner: Mutex<TtlLru<EmbeddingKey, CachedEmbedding>>,
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingCache {
    /// Create the tier at its fixed sizing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TtlLru::new(
                Duration::from_secs(EMBEDDING_CACHE_TTL_SECS),
                EMBEDDING_CACHE_CAPACITY,
            )),
        }
    }

    /// Cached embedding for a text, if fresh.
    ///
    /// The stored full-text hash is verified against the requested
    /// text; a mismatch (hash collision) is treated as a miss and the
    /// bad entry is dropped, so wrong data is never returned.
    pub fn get(&self, text: &str) -> Option<Arc<CachedEmbedding>> {
        let key = EmbeddingKey::for_text(text);
        recover(&self.inner).get_verified(&key, Instant::now(), |entry| {
            entry.full_hash == key.full_hash
        })
    }

    /// Store an embedding for a text.
    pub fn put(&self, text: &str, vector: Vec<f32>, atom: Option<AtomId>) {
        let key = EmbeddingKey::for_text(text);
        let entry = CachedEmbedding {
            vector,
            atom,
            full_hash: key.full_hash,
        };
        recover(&self.inner).set(key, entry, Instant::now());
    }

    /// Drop every embedding cross-referencing the atom.
    pub fn invalidate_atom(&self, id: &AtomId) -> usize {
        recover(&self.inner).invalidate_matching(|_, entry| entry.atom.as_ref() == Some(id))
    }

    /// Drop expired entries.
    pub fn prune(&self) -> usize {
        recover(&self.inner).prune(Instant::now())
    }

    /// Drop everything.
    pub fn clear(&self) {
        recover(&self.inner).clear();
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStatsSnapshot {
        recover(&self.inner).snapshot()
    }
}

// =============================================================================
// TESTS
// =============================================================================
