//! # Service Configuration
//!
//! Runtime knobs for the graph service: storage location, debounce
//! quiet interval, and maintenance cadences. Graph semantics (weights,
//! thresholds, cache sizing) are fixed in `lattice_core::primitives`
//! and deliberately not configurable here.

use lattice_core::LatticeError;
use lattice_core::primitives::DISCOVERY_QUIET_MS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Service configuration, loadable from a TOML file. Every field has a
/// default, so a partial (or absent) file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Path of the redb graph database. `None` runs in-memory.
    pub db_path: Option<PathBuf>,

    /// Quiet interval for debounced semantic discovery, in
    /// milliseconds.
    pub discovery_quiet_ms: u64,

    /// Seconds between recency decay passes.
    pub decay_interval_secs: u64,

    /// Seconds between rank passes.
    pub rank_interval_secs: u64,

    /// Capacity of the update broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            discovery_quiet_ms: DISCOVERY_QUIET_MS,
            decay_interval_secs: 3600,
            rank_interval_secs: 900,
            broadcast_capacity: 256,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LatticeError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| LatticeError::Io(e.to_string()))?;
        toml::from_str(&text).map_err(|e| LatticeError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: ServiceConfig =
            toml::from_str("decay_interval_secs = 120").expect("parse");
        assert_eq!(config.decay_interval_secs, 120);
        assert_eq!(config.discovery_quiet_ms, DISCOVERY_QUIET_MS);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn load_reads_a_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lattice.toml");
        std::fs::write(&path, "db_path = \"graph.redb\"\nrank_interval_secs = 60\n")
            .expect("write");
        let config = ServiceConfig::load(&path).expect("load");
        assert_eq!(config.db_path.as_deref(), Some(Path::new("graph.redb")));
        assert_eq!(config.rank_interval_secs, 60);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = ServiceConfig::load("/nonexistent/lattice.toml").expect_err("must fail");
        assert!(matches!(err, LatticeError::Io(_)));
    }
}
