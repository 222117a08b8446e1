//! CLI `doctor` command — run database diagnostics and print a health report.

use anyhow::Result;

use crate::db::Db;

/// Run database diagnostics and print a health report: node/edge counts,
/// embedding worker status, WAL replay warnings, and a dangling-edge
/// integrity scan.
pub fn doctor(db: &Db) -> Result<()> {
    let stats = db.stats()?;
    let report = db.check_integrity()?;

    println!("engramdb Health Report");
    println!("======================");
    println!();
    println!("Row counts:");
    println!("  Nodes:              {}", stats.node_count);
    println!("  Edges:              {}", stats.edge_count);
    println!("  Labels:             {}", stats.labels.len());
    println!("  Relationship types: {}", stats.relationship_types.len());
    println!();
    println!("Embedding worker:");
    println!("  Running:            {}", stats.embedding.running);
    println!("  Processed:          {}", stats.embedding.processed);
    println!("  Failed:             {}", stats.embedding.failed);
    println!();
    println!("WAL replay warnings:  {}", stats.replay_warnings);
    println!();

    if report.is_healthy() {
        println!("Integrity check:    PASSED");
    } else {
        println!("Integrity check:    FAILED ({} dangling edge(s))", report.dangling_edges.len());
        println!();
        println!("Dangling edges:");
        for id in &report.dangling_edges {
            println!("  {id}");
        }
        println!();
        println!("Recovery steps:");
        println!("  1. Export the current state: engramdb export > backup.json");
        println!("  2. Inspect the dangling edges above and decide whether to delete them manually");
        println!("  3. Or reset and reimport from a known-good export:");
        println!("     engramdb reset && engramdb import backup.json");
    }

    Ok(())
}
