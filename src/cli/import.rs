//! CLI `import` command — restore nodes and edges from a JSON file in the
//! `export` format.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::db::Db;
use crate::model::{Edge, Node};

/// Import format — matches `export`'s output.
#[derive(Debug, Deserialize)]
struct ImportData {
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

/// Imports nodes and edges from a JSON file, preserving their original ids.
/// Nodes whose id already exists are skipped; edges are only recreated once
/// both endpoints are present, so a partial import never leaves a dangling
/// reference.
pub fn import(db: &Db, file: &Path) -> Result<()> {
    let json =
        std::fs::read_to_string(file).with_context(|| format!("failed to read import file: {}", file.display()))?;
    let data: ImportData = serde_json::from_str(&json).context("failed to parse import JSON")?;

    println!("Importing {} nodes and {} edges...", data.nodes.len(), data.edges.len());

    let mut nodes_imported = 0u64;
    let mut nodes_skipped = 0u64;
    for node in data.nodes {
        if db.get_node(&node.id).is_ok() {
            nodes_skipped += 1;
            continue;
        }
        db.import_node(node)?;
        nodes_imported += 1;
    }

    let mut edges_imported = 0u64;
    let mut edges_skipped = 0u64;
    for edge in data.edges {
        if db.get_edge(&edge.id).is_ok() {
            edges_skipped += 1;
            continue;
        }
        if db.get_node(&edge.start).is_err() || db.get_node(&edge.end).is_err() {
            eprintln!("Warning: skipping edge {} (endpoint missing)", edge.id);
            edges_skipped += 1;
            continue;
        }
        db.import_edge(edge)?;
        edges_imported += 1;
    }

    println!("Import complete:");
    println!("  Nodes imported: {nodes_imported}");
    println!("  Nodes skipped:  {nodes_skipped} (already exist)");
    println!("  Edges imported: {edges_imported}");
    println!("  Edges skipped:  {edges_skipped}");

    Ok(())
}
