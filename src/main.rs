mod cli;
mod config;
mod db;
mod embedding;
mod error;
mod inference;
mod model;
mod search;
mod storage;
mod value;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use embedding::DeterministicEmbedder;

#[derive(Parser)]
#[command(name = "engramdb", version, about = "Embedded graph database with hybrid search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hybrid (BM25 + vector) search over stored memories
    Search {
        /// Natural language query
        query: String,
        /// Restrict to nodes carrying this label; may be repeated
        #[arg(long = "label")]
        labels: Vec<String>,
        /// Maximum number of results
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Display graph statistics
    Stats {
        /// Break node counts down by this label instead of the summary view
        #[arg(long)]
        group: Option<String>,
    },
    /// Inspect a single node by ID
    Inspect {
        /// Node ID to inspect
        id: String,
    },
    /// Export all nodes and edges as JSON
    Export,
    /// Import nodes and edges from a JSON file
    Import {
        /// Path to a JSON file in the `export` format
        file: PathBuf,
    },
    /// Delete all data (requires confirmation)
    Reset,
    /// Run database diagnostics and print a health report
    Doctor,
    /// Force a decay-sweep pass immediately
    Compact,
    /// Clear every node's embedding and re-enqueue it for embedding
    ReEmbed,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let clear_embeddings = matches!(cli.command, Command::ReEmbed);
    let db = db::Db::open(config.clone(), clear_embeddings)?;
    let dimensions = config.embedding.dimensions;
    db.set_embedder(Arc::new(DeterministicEmbedder::new(dimensions)));

    match cli.command {
        Command::Search { query, labels, limit } => {
            cli::search::search(&db, &query, &labels, limit)?;
        }
        Command::Stats { group } => {
            cli::stats::stats(&db, group.as_deref())?;
        }
        Command::Inspect { id } => {
            cli::inspect::inspect(&db, &id)?;
        }
        Command::Export => {
            cli::export::export(&db)?;
        }
        Command::Import { file } => {
            cli::import::import(&db, &file)?;
        }
        Command::Reset => {
            cli::reset::reset(&db)?;
        }
        Command::Doctor => {
            cli::doctor::doctor(&db)?;
        }
        Command::Compact => {
            cli::compact::compact(&db)?;
        }
        Command::ReEmbed => {
            cli::re_embed::re_embed(&db).await?;
        }
    }

    db.close().await?;
    Ok(())
}
