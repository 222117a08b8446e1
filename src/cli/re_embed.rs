//! CLI `re-embed` command — clear every node's embedding and recompute it.
//!
//! The clearing itself happens at `Db::open` (the dimension-change open
//! question, spec.md §9): `main` detects this subcommand and passes
//! `clear_embeddings = true` into `Db::open`, which strips every stored
//! vector before this function ever runs. This function only has to drive
//! the resulting backlog to completion before the process exits.

use anyhow::Result;

use crate::db::Db;

pub async fn re_embed(db: &Db) -> Result<()> {
    println!("Embeddings cleared; recomputing for every node...");
    db.run_embedding_pass().await?;

    let stats = db.stats()?;
    println!("Re-embed complete:");
    println!("  Processed: {}", stats.embedding.processed);
    println!("  Failed:    {}", stats.embedding.failed);

    Ok(())
}
