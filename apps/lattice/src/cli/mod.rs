//! # Lattice CLI Module
//!
//! Command-line inspection of a graph database file.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new (empty) graph database
//! - `stats` - Show whole-graph statistics
//! - `node` - Show one node
//! - `neighbors` - List a node's strongest neighbors
//! - `path` - BFS shortest path between two atoms
//! - `top` - Top-ranked nodes

mod commands;

use clap::{Parser, Subcommand};
use lattice_core::LatticeError;
use std::path::PathBuf;

pub use commands::execute_command;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Lattice - Knowledge Graph Service
///
/// A local, incremental knowledge graph over external content units:
/// lifecycle-driven edges, blended weights, and bounded ranked queries.
#[derive(Parser, Debug)]
#[command(name = "lattice")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the graph database
    #[arg(short = 'D', long, global = true, default_value = "lattice.redb")]
    pub database: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new graph database
    Init,

    /// Show whole-graph statistics
    Stats,

    /// Show one node by atom id
    Node {
        /// Atom id
        id: String,
    },

    /// List a node's strongest neighbors
    Neighbors {
        /// Atom id
        id: String,

        /// Maximum neighbors to list
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,
    },

    /// BFS shortest path between two atoms
    Path {
        /// Source atom id
        from: String,

        /// Target atom id
        to: String,

        /// Maximum path depth in edges
        #[arg(short, long, default_value = "8")]
        depth: usize,
    },

    /// Show the top-ranked nodes
    Top {
        /// Number of nodes to list
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,

        /// Restrict to one atom type
        #[arg(short = 't', long)]
        kind: Option<String>,
    },
}

/// Execute the parsed CLI.
pub async fn execute(cli: Cli) -> Result<(), LatticeError> {
    let command = cli.command.unwrap_or(Commands::Stats);
    execute_command(&cli.database, command, cli.json_mode)
}
