//! # Lifecycle Integration Tests
//!
//! End-to-end runs of the engine over both backends: lifecycle events
//! through weights, ranking, traversal, and persistence.

use chrono::{Duration, Utc};
use lattice_core::{
    AccessKind, AtomDescriptor, AtomEvent, AtomField, AtomId, AtomLink, Direction, GraphEngine,
    NodeFilter, SimilarityScore,
};

fn descriptor(id: &str, links: Vec<AtomLink>) -> AtomDescriptor {
    AtomDescriptor {
        id: AtomId::new(id),
        kind: "note".to_string(),
        category: None,
        updated_at: Utc::now(),
        links,
    }
}

fn create(engine: &mut GraphEngine, id: &str, links: Vec<AtomLink>) {
    engine
        .apply_event(&AtomEvent::Created(descriptor(id, links)))
        .expect("create");
}

#[test]
fn fresh_explicit_edge_scores_a_third_of_weight() {
    let mut engine = GraphEngine::in_memory();
    create(&mut engine, "b", Vec::new());
    create(&mut engine, "a", vec![AtomLink::to(AtomId::new("b"))]);

    let edges = engine
        .store()
        .edges_touching(&AtomId::new("a"))
        .expect("touching");
    assert_eq!(edges.len(), 1);
    // Structural share 0.25 plus fresh recency share 0.10.
    assert!((edges[0].combined_weight - 0.35).abs() < 1e-9);
}

#[test]
fn chain_path_and_neighbors_end_to_end() {
    let mut engine = GraphEngine::in_memory();
    for id in ["a", "b", "c"] {
        create(&mut engine, id, Vec::new());
    }
    engine
        .apply_event(&AtomEvent::Updated {
            atom: descriptor("a", vec![AtomLink::to(AtomId::new("b"))]),
            changed: vec![AtomField::Links],
        })
        .expect("link a-b");
    engine
        .apply_similarity(&SimilarityScore {
            source: AtomId::new("b"),
            target: AtomId::new("c"),
            score: 0.8,
        })
        .expect("similarity");

    let query = engine.query();
    let path = query
        .shortest_path(&AtomId::new("a"), &AtomId::new("c"), 8)
        .expect("query")
        .expect("path");
    assert_eq!(
        path,
        vec![AtomId::new("a"), AtomId::new("b"), AtomId::new("c")]
    );

    let neighbors = query
        .neighbors(&AtomId::new("b"), Direction::Both, None, None)
        .expect("neighbors");
    assert_eq!(neighbors.len(), 2);
    // Semantic 0.8: 0.55*0.8 + 0.10 = 0.54 beats the explicit 0.35.
    assert_eq!(neighbors[0].node.id, AtomId::new("c"));
}

#[test]
fn two_node_rank_ordering_with_normalization() {
    let mut engine = GraphEngine::in_memory();
    create(&mut engine, "a", Vec::new());
    create(&mut engine, "b", Vec::new());
    engine
        .apply_event(&AtomEvent::Updated {
            atom: descriptor("a", vec![AtomLink::to(AtomId::new("b"))]),
            changed: vec![AtomField::Links],
        })
        .expect("link");
    engine.rank_pass().expect("rank");

    let query = engine.query();
    let hubs = query.hubs(2).expect("hubs");
    assert_eq!(hubs[0].id, AtomId::new("b"));
    assert!((hubs[0].page_rank - 1.0).abs() < f64::EPSILON);
    assert!(hubs[1].page_rank < 1.0);

    let top = query.top_ranked(1, &NodeFilter::default()).expect("top");
    assert_eq!(top[0].id, AtomId::new("b"));
}

#[test]
fn decay_then_usage_boost_restores_freshness() {
    let mut engine = GraphEngine::in_memory();
    create(&mut engine, "b", Vec::new());
    create(&mut engine, "a", vec![AtomLink::to(AtomId::new("b"))]);

    let later = Utc::now() + Duration::days(14);
    engine.decay_pass(later).expect("decay");
    let edges = engine
        .store()
        .edges_touching(&AtomId::new("a"))
        .expect("touching");
    assert!((edges[0].recency_weight - 0.25).abs() < 1e-6);

    // An edit resets the reinforcement basis.
    engine
        .record_access(&AtomId::new("a"), AccessKind::Edit)
        .expect("access");
    let edges = engine
        .store()
        .edges_touching(&AtomId::new("a"))
        .expect("touching");
    assert!((edges[0].recency_weight - 1.0).abs() < f64::EPSILON);
    assert!((edges[0].usage_weight - 0.05).abs() < f64::EPSILON);
    assert!(edges[0].reinforced_at > edges[0].created_at);
}

#[test]
fn delete_then_recreate_is_clean() {
    let mut engine = GraphEngine::in_memory();
    create(&mut engine, "b", Vec::new());
    create(&mut engine, "a", vec![AtomLink::to(AtomId::new("b"))]);

    engine
        .apply_event(&AtomEvent::Deleted(AtomId::new("a")))
        .expect("delete");
    assert_eq!(engine.store().edge_count().expect("count"), 0);
    let b = engine
        .store()
        .get_node(&AtomId::new("b"))
        .expect("get")
        .expect("b");
    assert_eq!(b.in_degree, 0);

    // Recreating with the same links builds a fresh edge.
    create(&mut engine, "a", vec![AtomLink::to(AtomId::new("b"))]);
    assert_eq!(engine.store().edge_count().expect("count"), 1);
    let b = engine
        .store()
        .get_node(&AtomId::new("b"))
        .expect("get")
        .expect("b");
    assert_eq!(b.in_degree, 1);
}

#[test]
fn persistent_engine_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("lattice.redb");

    {
        let mut engine = GraphEngine::open(&path).expect("open");
        create(&mut engine, "b", Vec::new());
        create(&mut engine, "a", vec![AtomLink::tagged(AtomId::new("b"), "refines")]);
        engine
            .apply_similarity(&SimilarityScore {
                source: AtomId::new("a"),
                target: AtomId::new("b"),
                score: 0.9,
            })
            .expect("similarity");
        engine.rank_pass().expect("rank");
    }

    let engine = GraphEngine::open(&path).expect("reopen");
    let query = engine.query();
    let stats = query.statistics().expect("stats");
    assert_eq!(stats.node_count, 2);
    assert_eq!(stats.edge_count, 2);

    let edges = query
        .edges_between(&AtomId::new("a"), &AtomId::new("b"))
        .expect("between");
    assert_eq!(edges.len(), 2);
    // Ranks were persisted along with the nodes.
    let hubs = query.hubs(1).expect("hubs");
    assert!((hubs[0].page_rank - 1.0).abs() < f64::EPSILON);
}

#[test]
fn context_and_transitive_edges_compose() {
    let mut engine = GraphEngine::in_memory();
    for id in ["a", "b", "c"] {
        create(&mut engine, id, Vec::new());
    }
    // a and b share a context; b and c are strongly similar.
    engine
        .connect_context(&[AtomId::new("a"), AtomId::new("b")])
        .expect("context");
    engine
        .apply_similarity(&SimilarityScore {
            source: AtomId::new("b"),
            target: AtomId::new("c"),
            score: 0.95,
        })
        .expect("similarity");

    let added = engine.infer_transitive(&AtomId::new("a")).expect("infer");
    assert_eq!(added, 1);

    let edges = engine
        .query()
        .edges_between(&AtomId::new("a"), &AtomId::new("c"))
        .expect("between");
    assert_eq!(edges.len(), 1);
    // Contextual combined: 0.25*0.7 + 0.10 = 0.275.
    // Semantic combined: 0.55*0.95 + 0.10 = 0.6225.
    // Transitive structural: 0.275 * 0.6225 * 0.4.
    let expected_structural = 0.275 * 0.6225 * 0.4;
    assert!((edges[0].structural_weight - expected_structural).abs() < 1e-9);
}
