//! # redb-backed Graph Storage
//!
//! Disk persistence for the graph using the redb embedded database:
//! ACID transactions, crash safety via copy-on-write B-trees, MVCC.
//!
//! Layout:
//! - `nodes`: atom id -> postcard [`GraphNode`]
//! - `edges`: surrogate edge id -> postcard [`GraphEdge`]
//! - `edge_keys`: postcard [`EdgeKey`] -> edge id (the durable
//!   uniqueness constraint)
//! - `meta`: counters (`next_edge_id`)
//!
//! An in-memory index (key index, adjacency sets, id sets) is rebuilt
//! at open and updated only after a successful commit, so a failed
//! transaction leaves both disk and index untouched.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::graph::GraphStore;
use crate::types::{AtomId, EdgeId, EdgeKey, GraphEdge, GraphNode, LatticeError};

/// Table for nodes: atom id -> serialized GraphNode bytes.
const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Table for edges: edge id -> serialized GraphEdge bytes.
const EDGES: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");

/// Table for the edge dedup index: serialized EdgeKey -> edge id.
const EDGE_KEYS: TableDefinition<&[u8], u64> = TableDefinition::new("edge_keys");

/// Table for metadata: key string -> value u64.
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

fn io_err(e: impl std::fmt::Display) -> LatticeError {
    LatticeError::Io(e.to_string())
}

fn storage_err(e: impl std::fmt::Display) -> LatticeError {
    LatticeError::Storage(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, LatticeError> {
    postcard::to_allocvec(value).map_err(|e| LatticeError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, LatticeError> {
    postcard::from_bytes(bytes).map_err(|e| LatticeError::Deserialization(e.to_string()))
}

/// A disk-backed graph store using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
    /// In-memory dedup index, mirror of the `edge_keys` table.
    key_index: BTreeMap<EdgeKey, EdgeId>,
    /// Adjacency: atom id -> incident edge ids.
    touching: BTreeMap<AtomId, BTreeSet<EdgeId>>,
    /// Known atom ids, for cheap existence checks and counts.
    node_ids: BTreeSet<AtomId>,
    /// Known edge ids.
    edge_ids: BTreeSet<EdgeId>,
    /// Next available edge id.
    next_edge_id: u64,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("node_count", &self.node_ids.len())
            .field("edge_count", &self.edge_ids.len())
            .field("next_edge_id", &self.next_edge_id)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a graph database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LatticeError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables so later read transactions find them.
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let _ = write_txn.open_table(NODES).map_err(storage_err)?;
            let _ = write_txn.open_table(EDGES).map_err(storage_err)?;
            let _ = write_txn.open_table(EDGE_KEYS).map_err(storage_err)?;
            let _ = write_txn.open_table(META).map_err(storage_err)?;
            write_txn.commit().map_err(storage_err)?;
        }

        let read_txn = db.begin_read().map_err(storage_err)?;

        let next_edge_id = {
            let table = read_txn.open_table(META).map_err(storage_err)?;
            table
                .get("next_edge_id")
                .map_err(storage_err)?
                .map(|v| v.value())
                .unwrap_or(0)
        };

        let mut node_ids = BTreeSet::new();
        {
            let table = read_txn.open_table(NODES).map_err(storage_err)?;
            for entry in table.iter().map_err(storage_err)? {
                let (key, _) = entry.map_err(storage_err)?;
                node_ids.insert(AtomId::new(key.value()));
            }
        }

        let mut key_index = BTreeMap::new();
        let mut touching: BTreeMap<AtomId, BTreeSet<EdgeId>> = BTreeMap::new();
        let mut edge_ids = BTreeSet::new();
        {
            let table = read_txn.open_table(EDGES).map_err(storage_err)?;
            for entry in table.iter().map_err(storage_err)? {
                let (key, value) = entry.map_err(storage_err)?;
                let edge: GraphEdge = decode(value.value())?;
                let id = EdgeId(key.value());
                key_index.insert(edge.key(), id);
                touching.entry(edge.source.clone()).or_default().insert(id);
                touching.entry(edge.target.clone()).or_default().insert(id);
                edge_ids.insert(id);
            }
        }

        Ok(Self {
            db,
            key_index,
            touching,
            node_ids,
            edge_ids,
            next_edge_id,
        })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), LatticeError> {
        self.db.compact().map_err(io_err)?;
        Ok(())
    }

    fn read_edge(&self, id: EdgeId) -> Result<Option<GraphEdge>, LatticeError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(EDGES).map_err(storage_err)?;
        match table.get(id.0).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(bytes.value())?)),
            None => Ok(None),
        }
    }
}

impl GraphStore for RedbStore {
    fn upsert_node(&mut self, node: GraphNode) -> Result<(), LatticeError> {
        let bytes = encode(&node)?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(NODES).map_err(storage_err)?;
            table
                .insert(node.id.as_str(), bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        self.node_ids.insert(node.id);
        Ok(())
    }

    fn get_node(&self, id: &AtomId) -> Result<Option<GraphNode>, LatticeError> {
        if !self.node_ids.contains(id) {
            return Ok(None);
        }
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(NODES).map_err(storage_err)?;
        match table.get(id.as_str()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn contains_node(&self, id: &AtomId) -> Result<bool, LatticeError> {
        Ok(self.node_ids.contains(id))
    }

    fn remove_node(&mut self, id: &AtomId) -> Result<Vec<GraphEdge>, LatticeError> {
        if !self.node_ids.contains(id) {
            return Ok(Vec::new());
        }
        let incident: Vec<EdgeId> = self
            .touching
            .get(id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut removed = Vec::with_capacity(incident.len());
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut nodes = write_txn.open_table(NODES).map_err(storage_err)?;
            let mut edges = write_txn.open_table(EDGES).map_err(storage_err)?;
            let mut keys = write_txn.open_table(EDGE_KEYS).map_err(storage_err)?;

            nodes.remove(id.as_str()).map_err(storage_err)?;
            for edge_id in &incident {
                if let Some(bytes) = edges.remove(edge_id.0).map_err(storage_err)? {
                    let edge: GraphEdge = decode(bytes.value())?;
                    let key_bytes = encode(&edge.key())?;
                    keys.remove(key_bytes.as_slice()).map_err(storage_err)?;
                    removed.push(edge);
                }
            }
        }
        write_txn.commit().map_err(storage_err)?;

        // Commit succeeded, now update the in-memory index.
        self.node_ids.remove(id);
        for edge in &removed {
            self.key_index.remove(&edge.key());
            self.edge_ids.remove(&edge.id);
            for endpoint in [&edge.source, &edge.target] {
                if let Some(set) = self.touching.get_mut(endpoint) {
                    set.remove(&edge.id);
                    if set.is_empty() {
                        self.touching.remove(endpoint);
                    }
                }
            }
        }
        Ok(removed)
    }

    fn insert_edge(&mut self, mut edge: GraphEdge) -> Result<EdgeId, LatticeError> {
        if let Some(existing) = self.key_index.get(&edge.key()) {
            return Ok(*existing);
        }
        let next_id = self.next_edge_id.saturating_add(1);
        edge.id = EdgeId(next_id);
        let edge_bytes = encode(&edge)?;
        let key = edge.key();
        let key_bytes = encode(&key)?;

        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut edges = write_txn.open_table(EDGES).map_err(storage_err)?;
            let mut keys = write_txn.open_table(EDGE_KEYS).map_err(storage_err)?;
            let mut meta = write_txn.open_table(META).map_err(storage_err)?;
            edges
                .insert(next_id, edge_bytes.as_slice())
                .map_err(storage_err)?;
            keys.insert(key_bytes.as_slice(), next_id)
                .map_err(storage_err)?;
            meta.insert("next_edge_id", next_id).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        self.next_edge_id = next_id;
        self.key_index.insert(key, edge.id);
        self.edge_ids.insert(edge.id);
        self.touching
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.id);
        self.touching
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.id);
        Ok(edge.id)
    }

    fn update_edge(&mut self, edge: &GraphEdge) -> Result<(), LatticeError> {
        if !self.edge_ids.contains(&edge.id) {
            return Ok(());
        }
        let bytes = encode(edge)?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(EDGES).map_err(storage_err)?;
            table
                .insert(edge.id.0, bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn remove_edge(&mut self, id: EdgeId) -> Result<Option<GraphEdge>, LatticeError> {
        if !self.edge_ids.contains(&id) {
            return Ok(None);
        }
        let mut removed: Option<GraphEdge> = None;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut edges = write_txn.open_table(EDGES).map_err(storage_err)?;
            let mut keys = write_txn.open_table(EDGE_KEYS).map_err(storage_err)?;
            if let Some(bytes) = edges.remove(id.0).map_err(storage_err)? {
                let edge: GraphEdge = decode(bytes.value())?;
                let key_bytes = encode(&edge.key())?;
                keys.remove(key_bytes.as_slice()).map_err(storage_err)?;
                removed = Some(edge);
            }
        }
        write_txn.commit().map_err(storage_err)?;

        if let Some(edge) = &removed {
            self.key_index.remove(&edge.key());
            self.edge_ids.remove(&id);
            for endpoint in [&edge.source, &edge.target] {
                if let Some(set) = self.touching.get_mut(endpoint) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.touching.remove(endpoint);
                    }
                }
            }
        }
        Ok(removed)
    }

    fn get_edge(&self, id: EdgeId) -> Result<Option<GraphEdge>, LatticeError> {
        if !self.edge_ids.contains(&id) {
            return Ok(None);
        }
        self.read_edge(id)
    }

    fn edge_by_key(&self, key: &EdgeKey) -> Result<Option<GraphEdge>, LatticeError> {
        match self.key_index.get(key) {
            Some(id) => self.read_edge(*id),
            None => Ok(None),
        }
    }

    fn edges_touching(&self, id: &AtomId) -> Result<Vec<GraphEdge>, LatticeError> {
        let Some(set) = self.touching.get(id) else {
            return Ok(Vec::new());
        };
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(EDGES).map_err(storage_err)?;
        let mut result = Vec::with_capacity(set.len());
        for edge_id in set {
            if let Some(bytes) = table.get(edge_id.0).map_err(storage_err)? {
                result.push(decode(bytes.value())?);
            }
        }
        Ok(result)
    }

    fn nodes(&self) -> Result<Vec<GraphNode>, LatticeError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(NODES).map_err(storage_err)?;
        let mut result = Vec::with_capacity(self.node_ids.len());
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            result.push(decode(value.value())?);
        }
        Ok(result)
    }

    fn edges(&self) -> Result<Vec<GraphEdge>, LatticeError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(EDGES).map_err(storage_err)?;
        let mut result = Vec::with_capacity(self.edge_ids.len());
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            result.push(decode(value.value())?);
        }
        Ok(result)
    }

    fn node_count(&self) -> Result<usize, LatticeError> {
        Ok(self.node_ids.len())
    }

    fn edge_count(&self) -> Result<usize, LatticeError> {
        Ok(self.edge_ids.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AtomDescriptor;
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

    fn temp_db() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("graph.redb");
        (dir, path)
    }

    #[test]
    fn roundtrip_node_and_edge() {
        let (_dir, path) = temp_db();
        let mut store = RedbStore::open(&path).expect("open");
        store.upsert_node(node("a")).expect("upsert");
        store.upsert_node(node("b")).expect("upsert");
        let id = store
            .insert_edge(GraphEdge::explicit(
                AtomId::new("a"),
                AtomId::new("b"),
                Some("refines".to_string()),
                Utc::now(),
            ))
            .expect("insert");

        let edge = store.get_edge(id).expect("get").expect("present");
        assert_eq!(edge.source, AtomId::new("a"));
        assert_eq!(edge.tag.as_deref(), Some("refines"));
        let fetched = store
            .get_node(&AtomId::new("a"))
            .expect("get")
            .expect("present");
        assert_eq!(fetched.kind, "note");
    }

    #[test]
    fn state_survives_reopen() {
        let (_dir, path) = temp_db();
        {
            let mut store = RedbStore::open(&path).expect("open");
            store.upsert_node(node("a")).expect("upsert");
            store.upsert_node(node("b")).expect("upsert");
            store
                .insert_edge(GraphEdge::semantic(
                    AtomId::new("a"),
                    AtomId::new("b"),
                    0.8,
                    Utc::now(),
                ))
                .expect("insert");
        }
        let mut store = RedbStore::open(&path).expect("reopen");
        assert_eq!(store.node_count().expect("count"), 2);
        assert_eq!(store.edge_count().expect("count"), 1);
        // Dedup index was rebuilt: re-inserting the same pair is a no-op.
        let id = store
            .insert_edge(GraphEdge::semantic(
                AtomId::new("b"),
                AtomId::new("a"),
                0.8,
                Utc::now(),
            ))
            .expect("insert");
        assert_eq!(id, EdgeId(1));
        assert_eq!(store.edge_count().expect("count"), 1);
    }

    #[test]
    fn edge_ids_keep_advancing_after_reopen() {
        let (_dir, path) = temp_db();
        {
            let mut store = RedbStore::open(&path).expect("open");
            for id in ["a", "b", "c"] {
                store.upsert_node(node(id)).expect("upsert");
            }
            store
                .insert_edge(GraphEdge::explicit(
                    AtomId::new("a"),
                    AtomId::new("b"),
                    None,
                    Utc::now(),
                ))
                .expect("insert");
        }
        let mut store = RedbStore::open(&path).expect("reopen");
        let id = store
            .insert_edge(GraphEdge::explicit(
                AtomId::new("b"),
                AtomId::new("c"),
                None,
                Utc::now(),
            ))
            .expect("insert");
        assert_eq!(id, EdgeId(2));
    }

    #[test]
    fn remove_node_cascades_on_disk() {
        let (_dir, path) = temp_db();
        let mut store = RedbStore::open(&path).expect("open");
        for id in ["a", "b", "c"] {
            store.upsert_node(node(id)).expect("upsert");
        }
        store
            .insert_edge(GraphEdge::explicit(
                AtomId::new("a"),
                AtomId::new("b"),
                None,
                Utc::now(),
            ))
            .expect("insert");
        store
            .insert_edge(GraphEdge::contextual(
                AtomId::new("b"),
                AtomId::new("c"),
                Utc::now(),
            ))
            .expect("insert");

        let removed = store.remove_node(&AtomId::new("b")).expect("remove");
        assert_eq!(removed.len(), 2);
        assert_eq!(store.edge_count().expect("count"), 0);
        assert!(store
            .edges_touching(&AtomId::new("a"))
            .expect("touching")
            .is_empty());

        // Reopen and confirm the cascade was durable.
        drop(store);
        let store = RedbStore::open(&path).expect("reopen");
        assert_eq!(store.node_count().expect("count"), 2);
        assert_eq!(store.edge_count().expect("count"), 0);
    }

    #[test]
    fn update_edge_persists_weights() {
        let (_dir, path) = temp_db();
        let mut store = RedbStore::open(&path).expect("open");
        store.upsert_node(node("a")).expect("upsert");
        store.upsert_node(node("b")).expect("upsert");
        let id = store
            .insert_edge(GraphEdge::semantic(
                AtomId::new("a"),
                AtomId::new("b"),
                0.7,
                Utc::now(),
            ))
            .expect("insert");

        let mut edge = store.get_edge(id).expect("get").expect("present");
        edge.usage_weight = 0.25;
        edge.recombine();
        store.update_edge(&edge).expect("update");

        let reread = store.get_edge(id).expect("get").expect("present");
        assert!((reread.usage_weight - 0.25).abs() < f64::EPSILON);
        assert!((reread.combined_weight - edge.combined_weight).abs() < f64::EPSILON);
    }
}
