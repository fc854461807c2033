//! # Service Integration Tests
//!
//! Concurrency-facing behavior of the graph service: debounce
//! coalescing, cache invalidation after mutations, notifications, and
//! counter tracking. Time-sensitive tests run on tokio's paused clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use lattice::{GraphService, ServiceConfig, SimilarityProvider};
use lattice_core::{
    AccessKind, AtomDescriptor, AtomEvent, AtomField, AtomId, AtomLink, GraphEngine,
    SimilarityScore,
};

// =============================================================================
// SCRIPTED SIMILARITY PROVIDER
// =============================================================================

struct ScriptedProvider {
    scores: Vec<SimilarityScore>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedProvider {
    fn new(scores: Vec<SimilarityScore>) -> Arc<Self> {
        Arc::new(Self {
            scores,
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn calls_for(&self, atom: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(atom)
            .copied()
            .unwrap_or(0)
    }
}

impl SimilarityProvider for ScriptedProvider {
    fn similar_to(&self, atom: &AtomId) -> Vec<SimilarityScore> {
        *self
            .calls
            .lock()
            .expect("calls lock")
            .entry(atom.as_str().to_string())
            .or_insert(0) += 1;
        self.scores
            .iter()
            .filter(|s| &s.source == atom || &s.target == atom)
            .cloned()
            .collect()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn config(quiet_ms: u64) -> ServiceConfig {
    ServiceConfig {
        discovery_quiet_ms: quiet_ms,
        ..ServiceConfig::default()
    }
}

fn descriptor(id: &str, links: Vec<AtomLink>) -> AtomDescriptor {
    AtomDescriptor {
        id: AtomId::new(id),
        kind: "note".to_string(),
        category: None,
        updated_at: Utc::now(),
        links,
    }
}

fn created(id: &str) -> AtomEvent {
    AtomEvent::Created(descriptor(id, Vec::new()))
}

fn body_update(id: &str) -> AtomEvent {
    AtomEvent::Updated {
        atom: descriptor(id, Vec::new()),
        changed: vec![AtomField::Body],
    }
}

async fn drain_discovery(service: &Arc<GraphService>) {
    for _ in 0..200 {
        if service.pending_discoveries() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(service.pending_discoveries(), 0, "discovery tasks never drained");
}

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn burst_of_updates_coalesces_into_one_discovery() {
    let provider = ScriptedProvider::new(Vec::new());
    let service = GraphService::new(
        GraphEngine::in_memory(),
        Arc::clone(&provider) as Arc<dyn SimilarityProvider>,
        &config(2000),
    )
    .expect("service");

    service.handle_event(created("a")).await.expect("create");
    // Three rapid content edits, each re-triggering discovery.
    for _ in 0..3 {
        service.handle_event(body_update("a")).await.expect("update");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(service.pending_discoveries(), 1);

    drain_discovery(&service).await;
    // Four triggers (create + three edits), one provider call.
    assert_eq!(provider.calls_for("a"), 1);
    assert_eq!(service.counters().discoveries_run, 1);
}

#[tokio::test(start_paused = true)]
async fn discovery_materializes_semantic_edges_and_notifies() {
    let provider = ScriptedProvider::new(vec![SimilarityScore {
        source: AtomId::new("a"),
        target: AtomId::new("b"),
        score: 0.9,
    }]);
    let service = GraphService::new(
        GraphEngine::in_memory(),
        Arc::clone(&provider) as Arc<dyn SimilarityProvider>,
        &config(100),
    )
    .expect("service");

    service.handle_event(created("b")).await.expect("create");
    drain_discovery(&service).await;
    let mut updates = service.subscribe();
    service.handle_event(created("a")).await.expect("create");
    drain_discovery(&service).await;

    let edges = service
        .edges_between(&AtomId::new("a"), &AtomId::new("b"))
        .await
        .expect("edges");
    assert_eq!(edges.len(), 1);
    assert!((edges[0].semantic_weight - 0.9).abs() < f64::EPSILON);

    // Both the creation and the discovery outcome were announced.
    let first = updates.try_recv().expect("creation notice");
    assert_eq!(first, AtomId::new("a"));
    let second = updates.try_recv().expect("discovery notice");
    assert_eq!(second, AtomId::new("a"));
}

#[tokio::test(start_paused = true)]
async fn query_cache_serves_hits_until_a_mutation_lands() {
    let provider = ScriptedProvider::new(Vec::new());
    let service = GraphService::new(
        GraphEngine::in_memory(),
        provider as Arc<dyn SimilarityProvider>,
        &config(10),
    )
    .expect("service");
    for id in ["alpha-1", "beta-1"] {
        service.handle_event(created(id)).await.expect("create");
    }
    drain_discovery(&service).await;

    let first = service
        .search("alpha", None, None, &[], 10)
        .await
        .expect("search");
    assert_eq!(first.nodes.len(), 1);
    service
        .search("alpha", None, None, &[], 10)
        .await
        .expect("search again");
    let stats = service.cache_stats().queries;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    // A mutation of a listed atom drops the cached result.
    service
        .handle_event(body_update("alpha-1"))
        .await
        .expect("update");
    service
        .search("alpha", None, None, &[], 10)
        .await
        .expect("search after update");
    let stats = service.cache_stats().queries;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    drain_discovery(&service).await;
}

#[tokio::test(start_paused = true)]
async fn neighborhood_cache_invalidated_by_contained_atom() {
    let provider = ScriptedProvider::new(Vec::new());
    let service = GraphService::new(
        GraphEngine::in_memory(),
        provider as Arc<dyn SimilarityProvider>,
        &config(10),
    )
    .expect("service");
    for id in ["a", "b"] {
        service.handle_event(created(id)).await.expect("create");
    }
    service
        .handle_event(AtomEvent::Updated {
            atom: descriptor("a", vec![AtomLink::to(AtomId::new("b"))]),
            changed: vec![AtomField::Links],
        })
        .await
        .expect("link");
    drain_discovery(&service).await;

    let hood = service
        .neighborhood(&AtomId::new("a"))
        .await
        .expect("hood")
        .expect("present");
    assert!(hood.contains(&AtomId::new("b")));
    service
        .neighborhood(&AtomId::new("a"))
        .await
        .expect("hood")
        .expect("present");
    assert_eq!(service.cache_stats().neighborhoods.hits, 1);

    // b is not the focus, but it is inside the cached id set.
    service.handle_event(body_update("b")).await.expect("update");
    service
        .neighborhood(&AtomId::new("a"))
        .await
        .expect("hood")
        .expect("present");
    let stats = service.cache_stats().neighborhoods;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    drain_discovery(&service).await;
}

#[tokio::test(start_paused = true)]
async fn usage_boosting_access_notifies_subscribers() {
    let provider = ScriptedProvider::new(Vec::new());
    let service = GraphService::new(
        GraphEngine::in_memory(),
        provider as Arc<dyn SimilarityProvider>,
        &config(10),
    )
    .expect("service");
    for id in ["a", "b"] {
        service.handle_event(created(id)).await.expect("create");
    }
    service
        .handle_event(AtomEvent::Updated {
            atom: descriptor("a", vec![AtomLink::to(AtomId::new("b"))]),
            changed: vec![AtomField::Links],
        })
        .await
        .expect("link");
    drain_discovery(&service).await;

    let mut updates = service.subscribe();
    assert!(service
        .record_access(&AtomId::new("a"), AccessKind::Edit)
        .await
        .expect("access"));
    assert_eq!(updates.try_recv().expect("edit notice"), AtomId::new("a"));

    // A plain view moved the access counter, so it is announced too.
    assert!(service
        .record_access(&AtomId::new("a"), AccessKind::View)
        .await
        .expect("access"));
    assert_eq!(updates.try_recv().expect("view notice"), AtomId::new("a"));

    // Unknown atoms mutate nothing and stay silent.
    assert!(!service
        .record_access(&AtomId::new("ghost"), AccessKind::Edit)
        .await
        .expect("access"));
    assert!(updates.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn relation_helpers_notify_subscribers() {
    let provider = ScriptedProvider::new(Vec::new());
    let service = GraphService::new(
        GraphEngine::in_memory(),
        provider as Arc<dyn SimilarityProvider>,
        &config(10),
    )
    .expect("service");
    for id in ["a", "b", "c"] {
        service.handle_event(created(id)).await.expect("create");
    }
    drain_discovery(&service).await;

    let mut updates = service.subscribe();
    assert!(service
        .link_reference(&AtomId::new("a"), &AtomId::new("b"), None)
        .await
        .expect("link"));
    assert_eq!(updates.try_recv().expect("source notice"), AtomId::new("a"));
    assert_eq!(updates.try_recv().expect("target notice"), AtomId::new("b"));

    assert!(service
        .link_conceptual(&AtomId::new("a"), &AtomId::new("c"), 0.8)
        .await
        .expect("link"));
    assert_eq!(updates.try_recv().expect("notice"), AtomId::new("a"));
    assert_eq!(updates.try_recv().expect("notice"), AtomId::new("c"));

    // b-a-c composes above the weight floor, so b gains a transitive
    // edge to c and the inference is announced.
    let inferred = service
        .infer_transitive(&AtomId::new("b"))
        .await
        .expect("infer");
    assert_eq!(inferred, 1);
    assert_eq!(updates.try_recv().expect("notice"), AtomId::new("b"));

    let added = service
        .connect_context(&[AtomId::new("b"), AtomId::new("c")])
        .await
        .expect("context");
    assert_eq!(added, 1);
    assert_eq!(updates.try_recv().expect("notice"), AtomId::new("b"));
    assert_eq!(updates.try_recv().expect("notice"), AtomId::new("c"));

    // A duplicate relation changes nothing and stays silent.
    assert!(!service
        .link_reference(&AtomId::new("a"), &AtomId::new("b"), None)
        .await
        .expect("relink"));
    assert!(updates.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn view_access_drops_cached_listings() {
    let provider = ScriptedProvider::new(Vec::new());
    let service = GraphService::new(
        GraphEngine::in_memory(),
        provider as Arc<dyn SimilarityProvider>,
        &config(10),
    )
    .expect("service");
    service.handle_event(created("alpha-1")).await.expect("create");
    drain_discovery(&service).await;

    service
        .search("alpha", None, None, &[], 10)
        .await
        .expect("search");

    // The counter is a ranking tiebreak; the cached result is stale.
    assert!(service
        .record_access(&AtomId::new("alpha-1"), AccessKind::View)
        .await
        .expect("access"));
    service
        .search("alpha", None, None, &[], 10)
        .await
        .expect("search again");
    let stats = service.cache_stats().queries;
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 2);
}

#[tokio::test(start_paused = true)]
async fn counters_track_graph_and_events() {
    let provider = ScriptedProvider::new(Vec::new());
    let service = GraphService::new(
        GraphEngine::in_memory(),
        provider as Arc<dyn SimilarityProvider>,
        &config(10),
    )
    .expect("service");
    for id in ["a", "b", "c"] {
        service.handle_event(created(id)).await.expect("create");
    }
    service
        .connect_context(&[AtomId::new("a"), AtomId::new("b"), AtomId::new("c")])
        .await
        .expect("context");
    drain_discovery(&service).await;

    let counters = service.counters();
    assert_eq!(counters.nodes, 3);
    assert_eq!(counters.edges, 3);
    assert_eq!(counters.events_applied, 3);
    assert!(!counters.is_updating);
}

#[tokio::test(start_paused = true)]
async fn embedding_roundtrip_flags_node() {
    let provider = ScriptedProvider::new(Vec::new());
    let service = GraphService::new(
        GraphEngine::in_memory(),
        provider as Arc<dyn SimilarityProvider>,
        &config(10),
    )
    .expect("service");
    service.handle_event(created("a")).await.expect("create");
    drain_discovery(&service).await;

    service
        .record_embedding("atom a body text", vec![0.5, 0.5], Some(AtomId::new("a")))
        .await
        .expect("embed");
    let hit = service.cached_embedding("atom a body text").expect("hit");
    assert_eq!(hit.vector, vec![0.5, 0.5]);
    let node = service
        .get_node(&AtomId::new("a"))
        .await
        .expect("get")
        .expect("present");
    assert!(node.has_embedding);

    // Mutating the atom drops its cached embedding.
    service.handle_event(body_update("a")).await.expect("update");
    assert!(service.cached_embedding("atom a body text").is_none());
    drain_discovery(&service).await;
}
