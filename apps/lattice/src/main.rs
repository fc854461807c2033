//! # Lattice - Knowledge Graph Service
//!
//! The main binary for the Lattice knowledge-graph engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                apps/lattice (THE BINARY)              │
//! │                                                       │
//! │   ┌──────────────┐        ┌────────────────────────┐  │
//! │   │  CLI (clap)  │        │  GraphService (tokio)  │  │
//! │   └──────┬───────┘        └───────────┬────────────┘  │
//! │          │                            │               │
//! │          └──────────────┬─────────────┘               │
//! │                         ▼                             │
//! │                ┌─────────────────┐                    │
//! │                │  lattice-core   │                    │
//! │                │  (THE LOGIC)    │                    │
//! │                └─────────────────┘                    │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Inspect a graph database
//! lattice stats
//! lattice node note-42
//! lattice neighbors note-42 -k 10
//! lattice path note-42 note-99
//! lattice top -k 20
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing — LATTICE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("LATTICE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lattice=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Lattice startup banner.
fn print_banner() {
    println!(
        r#"
  ██╗      █████╗ ████████╗████████╗██╗ ██████╗███████╗
  ██║     ██╔══██╗╚══██╔══╝╚══██╔══╝██║██╔════╝██╔════╝
  ██║     ███████║   ██║      ██║   ██║██║     █████╗
  ██║     ██╔══██║   ██║      ██║   ██║██║     ██╔══╝
  ███████╗██║  ██║   ██║      ██║   ██║╚██████╗███████╗
  ╚══════╝╚═╝  ╚═╝   ╚═╝      ╚═╝   ╚═╝ ╚═════╝╚══════╝

  Knowledge Graph Service v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
