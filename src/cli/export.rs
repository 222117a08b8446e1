//! CLI `export` command — dump all nodes and edges as JSON.

use anyhow::Result;
use serde::Serialize;

use crate::db::Db;
use crate::model::{Edge, Node};

/// Export format — wraps every node and edge in the graph.
#[derive(Debug, Serialize)]
struct ExportData {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

/// Export every node and edge as JSON to stdout.
pub fn export(db: &Db) -> Result<()> {
    let nodes = db.all_nodes()?;
    let edges = db.all_edges()?;

    let data = ExportData {
        nodes,
        edges,
    };

    let json = serde_json::to_string_pretty(&data)?;
    println!("{json}");

    eprintln!("Exported {} nodes and {} edges.", data.nodes.len(), data.edges.len());

    Ok(())
}
