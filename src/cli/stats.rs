//! CLI `stats` command — display graph statistics in the terminal.

use anyhow::Result;

use crate::db::Db;

/// Display graph statistics. With `group`, breaks node counts down by that
/// label instead of printing the summary view.
pub fn stats(db: &Db, group: Option<&str>) -> Result<()> {
    if let Some(label) = group {
        let nodes = db.nodes_with_label(label)?;
        println!("Nodes labelled '{label}': {}", nodes.len());
        return Ok(());
    }

    let stats = db.stats()?;

    println!("engramdb Statistics");
    println!("{}", "=".repeat(40));
    println!("  Nodes:              {}", stats.node_count);
    println!("  Edges:              {}", stats.edge_count);
    println!();

    println!("Labels:");
    for label in &stats.labels {
        println!("  {label}");
    }
    println!();

    println!("Relationship types:");
    for rel_type in &stats.relationship_types {
        println!("  {rel_type}");
    }
    println!();

    println!("Embedding worker:");
    println!("  Running:            {}", stats.embedding.running);
    println!("  Processed:          {}", stats.embedding.processed);
    println!("  Failed:             {}", stats.embedding.failed);
    println!();

    println!("WAL replay warnings:  {}", stats.replay_warnings);

    Ok(())
}
