//! CLI `search` command — hybrid BM25 + vector search from the terminal.

use anyhow::Result;

use crate::db::Db;

/// Run a hybrid search and print results to stdout.
pub fn search(db: &Db, query: &str, labels: &[String], limit: usize) -> Result<()> {
    let labels = if labels.is_empty() { None } else { Some(labels) };
    let hits = db.hybrid_search(query, labels, limit)?;

    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", hits.len());

    for (i, hit) in hits.iter().enumerate() {
        let content = hit
            .node
            .properties
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let preview = if content.len() > 120 {
            let cut = (0..=120).rev().find(|&i| content.is_char_boundary(i)).unwrap_or(0);
            format!("{}...", &content[..cut])
        } else {
            content.to_string()
        };

        println!(
            "  {}. [{}] {} (score: {:.4}, bm25_rank: {:?}, vector_rank: {:?})",
            i + 1,
            hit.node.labels.join(","),
            hit.node.id,
            hit.score,
            hit.bm25_rank,
            hit.vector_rank,
        );
        if !preview.is_empty() {
            println!("     {preview}");
        }
        println!();
    }

    Ok(())
}
