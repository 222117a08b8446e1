//! CLI `inspect` command — display full details for a single node.

use anyhow::Result;

use crate::db::Db;

/// Inspect a single node by ID and display its properties and edges.
pub fn inspect(db: &Db, id: &str) -> Result<()> {
    let node = db.get_node(id)?;

    println!("Node: {}", node.id);
    println!("{}", "=".repeat(50));
    println!("  Labels:         {}", node.labels.join(", "));
    println!("  Created:        {}", node.created_at);
    println!("  Updated:        {}", node.updated_at);
    println!("  Last accessed:  {}", node.last_accessed);
    println!("  Access count:   {}", node.access_count);
    println!("  Decay score:    {:.4}", node.decay_score);
    println!("  Has embedding:  {}", node.has_embedding());
    println!();

    println!("Properties:");
    for (key, value) in &node.properties {
        println!("  {key}: {value:?}");
    }

    let outgoing = db.outgoing_edges(id)?;
    if !outgoing.is_empty() {
        println!();
        println!("Outgoing edges:");
        for edge in &outgoing {
            println!(
                "  --[{}]--> {} (confidence: {:.2}{})",
                edge.edge_type,
                edge.end,
                edge.confidence,
                if edge.auto_generated { ", inferred" } else { "" }
            );
        }
    }

    let incoming = db.incoming_edges(id)?;
    if !incoming.is_empty() {
        println!();
        println!("Incoming edges:");
        for edge in &incoming {
            println!(
                "  <--[{}]-- {} (confidence: {:.2}{})",
                edge.edge_type,
                edge.start,
                edge.confidence,
                if edge.auto_generated { ", inferred" } else { "" }
            );
        }
    }

    Ok(())
}
