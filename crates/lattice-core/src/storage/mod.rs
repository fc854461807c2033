//! # Storage Backends
//!
//! The engine runs over one of two [`GraphStore`] implementations: the
//! in-memory `BTreeMap` store or the redb-backed persistent store. The
//! [`StorageBackend`] enum selects between them at construction time
//! without generics leaking into the engine API.

pub mod redb_store;

pub use redb_store::RedbStore;

use std::path::Path;

use crate::graph::{GraphStore, MemoryGraph};
use crate::types::LatticeError;

/// Selected storage backend for a graph engine.
#[derive(Debug)]
pub enum StorageBackend {
    /// Ephemeral in-memory store.
    InMemory(MemoryGraph),
    /// Disk-backed redb store.
    Persistent(RedbStore),
}

impl StorageBackend {
    /// Create an empty in-memory backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::InMemory(MemoryGraph::new())
    }

    /// Open or create a persistent backend at the given path.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, LatticeError> {
        Ok(Self::Persistent(RedbStore::open(path)?))
    }

    /// Borrow the backend as a read-only store.
    #[must_use]
    pub fn as_store(&self) -> &dyn GraphStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }

    /// Borrow the backend as a mutable store.
    pub fn as_store_mut(&mut self) -> &mut dyn GraphStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_backend_starts_empty() {
        let backend = StorageBackend::in_memory();
        assert_eq!(backend.as_store().node_count().expect("count"), 0);
        assert_eq!(backend.as_store().edge_count().expect("count"), 0);
    }
}
