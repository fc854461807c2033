//! # CLI Command Implementations
//!
//! Read-side commands over a redb graph file. Output is plain text by
//! default; `--json-mode` switches to one JSON document on stdout.

use lattice_core::{AtomId, Direction, GraphEngine, GraphNode, LatticeError, NodeFilter};
use serde_json::json;
use std::path::Path;

use super::Commands;

/// Open the database and dispatch one command.
pub fn execute_command(
    database: &Path,
    command: Commands,
    json_mode: bool,
) -> Result<(), LatticeError> {
    let engine = GraphEngine::open(database)?;
    match command {
        Commands::Init => cmd_init(database, &engine, json_mode),
        Commands::Stats => cmd_stats(&engine, json_mode),
        Commands::Node { id } => cmd_node(&engine, &id, json_mode),
        Commands::Neighbors { id, limit } => cmd_neighbors(&engine, &id, limit, json_mode),
        Commands::Path { from, to, depth } => cmd_path(&engine, &from, &to, depth, json_mode),
        Commands::Top { limit, kind } => cmd_top(&engine, limit, kind, json_mode),
    }
}

fn print_json(value: &serde_json::Value) -> Result<(), LatticeError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| LatticeError::Serialization(e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn cmd_init(database: &Path, engine: &GraphEngine, json_mode: bool) -> Result<(), LatticeError> {
    let nodes = engine.store().node_count()?;
    if json_mode {
        return print_json(&json!({
            "database": database.display().to_string(),
            "nodes": nodes,
        }));
    }
    println!("Initialized graph database: {}", database.display());
    println!("  Existing nodes: {nodes}");
    Ok(())
}

fn cmd_stats(engine: &GraphEngine, json_mode: bool) -> Result<(), LatticeError> {
    let stats = engine.query().statistics()?;
    if json_mode {
        let value =
            serde_json::to_value(&stats).map_err(|e| LatticeError::Serialization(e.to_string()))?;
        return print_json(&value);
    }
    println!("Graph Statistics");
    println!("  Nodes:              {}", stats.node_count);
    println!("  Edges:              {}", stats.edge_count);
    println!("  Avg degree:         {:.2}", stats.avg_degree);
    println!("  Max degree:         {}", stats.max_degree);
    println!("  Avg rank:           {:.4}", stats.avg_page_rank);
    println!("  Embedding coverage: {:.1}%", stats.embedding_coverage * 100.0);
    println!("  Density:            {:.4}", stats.density);
    if !stats.kinds.is_empty() {
        println!("  Types:");
        for (kind, count) in &stats.kinds {
            println!("    {kind}: {count}");
        }
    }
    Ok(())
}

fn node_summary(node: &GraphNode) -> serde_json::Value {
    json!({
        "id": node.id.as_str(),
        "kind": node.kind,
        "category": node.category,
        "cluster": node.cluster,
        "page_rank": node.page_rank,
        "in_degree": node.in_degree,
        "out_degree": node.out_degree,
        "access_count": node.access_count,
        "has_embedding": node.has_embedding,
        "updated_at": node.updated_at.to_rfc3339(),
    })
}

fn cmd_node(engine: &GraphEngine, id: &str, json_mode: bool) -> Result<(), LatticeError> {
    let atom = AtomId::new(id);
    let Some(node) = engine.query().get_node(&atom)? else {
        if json_mode {
            return print_json(&json!({ "id": id, "found": false }));
        }
        println!("Node not found: {id}");
        return Ok(());
    };
    if json_mode {
        return print_json(&node_summary(&node));
    }
    println!("Node {id}");
    println!("  Kind:       {}", node.kind);
    println!("  Category:   {}", node.category.as_deref().unwrap_or("-"));
    println!("  Cluster:    {}", node.cluster.as_deref().unwrap_or("-"));
    println!("  Rank:       {:.4}", node.page_rank);
    println!("  Degree:     {} in / {} out", node.in_degree, node.out_degree);
    println!("  Accesses:   {}", node.access_count);
    println!("  Embedding:  {}", if node.has_embedding { "yes" } else { "no" });
    Ok(())
}

fn cmd_neighbors(
    engine: &GraphEngine,
    id: &str,
    limit: usize,
    json_mode: bool,
) -> Result<(), LatticeError> {
    let atom = AtomId::new(id);
    let neighbors = engine
        .query()
        .neighbors(&atom, Direction::Both, None, Some(limit))?;
    if json_mode {
        let entries: Vec<serde_json::Value> = neighbors
            .iter()
            .map(|entry| {
                json!({
                    "id": entry.node.id.as_str(),
                    "kind": entry.edge.kind.as_str(),
                    "tag": entry.edge.tag,
                    "weight": entry.edge.combined_weight,
                })
            })
            .collect();
        return print_json(&json!({ "focus": id, "neighbors": entries }));
    }
    if neighbors.is_empty() {
        println!("No neighbors for {id}");
        return Ok(());
    }
    println!("Neighbors of {id}");
    for entry in &neighbors {
        println!(
            "  {:<24} {:<11} {:.3}",
            entry.node.id.as_str(),
            entry.edge.kind.as_str(),
            entry.edge.combined_weight
        );
    }
    Ok(())
}

fn cmd_path(
    engine: &GraphEngine,
    from: &str,
    to: &str,
    depth: usize,
    json_mode: bool,
) -> Result<(), LatticeError> {
    let path = engine
        .query()
        .shortest_path(&AtomId::new(from), &AtomId::new(to), depth)?;
    if json_mode {
        let hops: Option<Vec<&str>> =
            path.as_ref().map(|p| p.iter().map(AtomId::as_str).collect());
        return print_json(&json!({ "from": from, "to": to, "path": hops }));
    }
    match path {
        Some(path) => {
            let hops: Vec<&str> = path.iter().map(AtomId::as_str).collect();
            println!("Path ({} hops): {}", hops.len() - 1, hops.join(" -> "));
        }
        None => println!("No path from {from} to {to} within {depth} hops"),
    }
    Ok(())
}

fn cmd_top(
    engine: &GraphEngine,
    limit: usize,
    kind: Option<String>,
    json_mode: bool,
) -> Result<(), LatticeError> {
    let filter = NodeFilter {
        kind,
        ..NodeFilter::default()
    };
    let nodes = engine.query().top_ranked(limit, &filter)?;
    if json_mode {
        let entries: Vec<serde_json::Value> = nodes.iter().map(node_summary).collect();
        return print_json(&json!({ "nodes": entries }));
    }
    if nodes.is_empty() {
        println!("Graph is empty");
        return Ok(());
    }
    println!("{:<24} {:<10} {:>8} {:>8}", "ID", "KIND", "RANK", "DEGREE");
    for node in &nodes {
        println!(
            "{:<24} {:<10} {:>8.4} {:>8}",
            node.id.as_str(),
            node.kind,
            node.page_rank,
            node.degree()
        );
    }
    Ok(())
}
