//! # lattice
//!
//! The Lattice application library: the async graph service hosting
//! `lattice-core` behind a single-writer lock, with cache tiers,
//! debounced semantic discovery, update notifications, and periodic
//! maintenance jobs. The binary in `main.rs` adds the CLI on top.

pub mod config;
pub mod service;

pub use config::ServiceConfig;
pub use service::{GraphService, ServiceCounters, SimilarityProvider};
