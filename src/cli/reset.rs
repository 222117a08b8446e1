//! CLI `reset` command — delete all nodes and edges after confirmation.

use anyhow::{bail, Result};
use std::io::Write;

use crate::db::Db;

/// Deletes every node (and, by cascade, every edge) after an interactive
/// confirmation prompt.
pub fn reset(db: &Db) -> Result<()> {
    let stats = db.stats()?;
    println!("WARNING: this will permanently delete all {} node(s) and {} edge(s).", stats.node_count, stats.edge_count);
    print!("\nType YES to confirm: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    if input.trim() != "YES" {
        bail!("reset cancelled");
    }

    let mut deleted = 0u64;
    for node in db.all_nodes()? {
        db.delete_node(&node.id)?;
        deleted += 1;
    }

    println!("All data deleted ({deleted} node(s) removed). Database reset complete.");
    Ok(())
}
