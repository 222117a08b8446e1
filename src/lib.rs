//! engramdb — an embedded graph database for agent memory.
//!
//! A labelled-property graph with durable on-disk storage, a pull-based
//! embedding worker, hybrid lexical/vector search, and write-time
//! similarity inference, all behind a single [`db::Db`] handle.
//!
//! # Architecture
//!
//! - **Storage**: an in-memory index ([`storage::BaseEngine`]) wrapped by a
//!   segmented write-ahead log ([`storage::WalEngine`]) and an optional
//!   async write-back overlay ([`storage::AsyncEngine`])
//! - **Embeddings**: a pluggable [`embedding::Embedder`] capability, driven
//!   by a background [`embedding::worker::EmbeddingWorker`] that discovers
//!   and embeds content-bearing nodes
//! - **Search**: BM25 keyword search and cosine-similarity vector search,
//!   merged via Reciprocal Rank Fusion ([`search::SearchService`])
//! - **Inference**: write-time and recall-time proposal of `SIMILAR_TO` and
//!   `CO_ACCESSED_WITH` edges ([`inference::InferenceEngine`])
//!
//! # Modules
//!
//! - [`error`] — the library's `Result`/`Error` types
//! - [`value`] — the dynamically-typed property value used by nodes and edges
//! - [`model`] — core graph entities: nodes, edges, and the memory-view projection
//! - [`config`] — configuration loading from TOML files and environment variables
//! - [`storage`] — the layered storage engine stack (base, WAL, async overlay)
//! - [`search`] — the hybrid BM25/vector search service
//! - [`embedding`] — the embedder capability and its background worker
//! - [`inference`] — write-time and recall-time edge inference
//! - [`db`] — the façade that composes every layer into one handle

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod inference;
pub mod model;
pub mod search;
pub mod storage;
pub mod value;

pub use db::Db;
pub use error::{Error, Result};
