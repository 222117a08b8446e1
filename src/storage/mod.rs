//! The storage engine stack: in-memory base storage, a durable
//! write-ahead log, and an optional async write-back overlay, composed in
//! layers as described by the system overview.

mod async_engine;
mod base;
mod wal;
mod wal_engine;

pub use async_engine::AsyncEngine;
pub use base::BaseEngine;
pub use wal::{Wal, WalMode, WalRecord};
pub use wal_engine::WalEngine;

use crate::error::Result;
use crate::model::{Edge, Node};

/// A stop signal visitor returns to halt `stream_nodes` early.
pub enum Visit {
    Continue,
    Stop,
}

/// The uniform operation surface every storage layer implements: base
/// storage directly, and each wrapper by delegating to the layer beneath
/// it while adding its own durability or caching behaviour.
pub trait StorageEngine: Send + Sync {
    fn create_node(&self, node: Node) -> Result<()>;
    fn get_node(&self, id: &str) -> Result<Node>;
    fn update_node(&self, node: Node) -> Result<()>;
    /// Same as `update_node`, but its WAL record is recoverable-skippable:
    /// if the node no longer exists at replay time, the record is dropped
    /// instead of erroring.
    fn update_node_embedding(&self, node: Node) -> Result<()>;
    fn delete_node(&self, id: &str) -> Result<()>;

    fn create_edge(&self, edge: Edge) -> Result<()>;
    fn get_edge(&self, id: &str) -> Result<Edge>;
    fn update_edge(&self, edge: Edge) -> Result<()>;
    fn delete_edge(&self, id: &str) -> Result<()>;

    fn outgoing_edges(&self, node_id: &str) -> Result<Vec<Edge>>;
    fn incoming_edges(&self, node_id: &str) -> Result<Vec<Edge>>;

    fn all_nodes(&self) -> Result<Vec<Node>>;
    fn all_edges(&self) -> Result<Vec<Edge>>;

    /// Calls `visitor` once per node in `batch_size`-sized groups; stops
    /// early if `visitor` returns `Visit::Stop`.
    fn stream_nodes(&self, batch_size: usize, visitor: &mut dyn FnMut(&Node) -> Visit) -> Result<()>;

    /// Fast-path discovery for the embedding worker: a non-internal node
    /// lacking an embedding and not yet marked settled. `None` if no such
    /// node exists.
    fn find_node_needing_embedding(&self) -> Result<Option<Node>>;

    fn node_count(&self) -> Result<usize>;
    fn edge_count(&self) -> Result<usize>;

    /// Distinct labels currently indexed across all nodes.
    fn labels(&self) -> Result<Vec<String>>;
    /// Distinct edge types currently indexed across all edges.
    fn relationship_types(&self) -> Result<Vec<String>>;

    fn close(&self) -> Result<()>;
}
