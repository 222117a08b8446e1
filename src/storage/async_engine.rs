use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::AsyncWritesConfig;
use crate::error::{Error, Result};
use crate::model::{Edge, Node};

use super::{StorageEngine, Visit};

#[derive(Clone)]
enum PendingNode {
    Upsert(Node, NodeWriteKind),
    Delete,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NodeWriteKind {
    Update,
    UpdateEmbedding,
}

#[derive(Clone)]
enum PendingEdge {
    Upsert(Edge),
    Delete,
}

#[derive(Default)]
struct Overlay {
    nodes: HashMap<String, PendingNode>,
    edges: HashMap<String, PendingEdge>,
}

/// An in-memory write-back cache in front of an underlying storage engine.
/// Writes land in the overlay and return immediately; a background task
/// periodically drains it into the underlying engine. Reads consult the
/// overlay first so pending writes are visible right away.
pub struct AsyncEngine {
    inner: Arc<dyn StorageEngine>,
    overlay: Arc<RwLock<Overlay>>,
    enabled: bool,
    flush_interval: Duration,
    stop: Arc<Notify>,
    closed: Arc<AtomicBool>,
    flusher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AsyncEngine {
    pub fn new(inner: Arc<dyn StorageEngine>, config: &AsyncWritesConfig) -> Self {
        AsyncEngine {
            inner,
            overlay: Arc::new(RwLock::new(Overlay::default())),
            enabled: config.enabled,
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
            stop: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
            flusher: std::sync::Mutex::new(None),
        }
    }

    /// Spawns the background flusher task. A no-op if async writes are
    /// disabled, in which case every write applies to the inner engine
    /// synchronously and there is nothing to drain.
    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        let inner = self.inner.clone();
        let overlay = self.overlay.clone();
        let stop = self.stop.clone();
        let interval = self.flush_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        flush_overlay(&inner, &overlay);
                    }
                }
            }
        });

        *self.flusher.lock().expect("flusher lock poisoned") = Some(handle);
    }

    fn write_through(&self, node_id: &str, kind: NodeWriteKind, node: Node) -> Result<()> {
        if !self.enabled {
            return match kind {
                NodeWriteKind::Update => self.inner.update_node(node),
                NodeWriteKind::UpdateEmbedding => self.inner.update_node_embedding(node),
            };
        }
        let mut overlay = self.overlay.write().expect("overlay lock poisoned");
        overlay.nodes.insert(node_id.to_string(), PendingNode::Upsert(node, kind));
        Ok(())
    }
}

impl Drop for AsyncEngine {
    fn drop(&mut self) {
        self.stop.notify_one();
    }
}

/// Applies a node write, trying `update` first and falling back to
/// `create` if the node doesn't exist in the underlying engine yet — the
/// overlay coalesces create+update histories into a single latest value,
/// so the underlying call must be an upsert regardless of which one fired
/// originally.
fn upsert_node(inner: &Arc<dyn StorageEngine>, node: Node, kind: NodeWriteKind) -> Result<()> {
    let attempt = match kind {
        NodeWriteKind::Update => inner.update_node(node.clone()),
        NodeWriteKind::UpdateEmbedding => inner.update_node_embedding(node.clone()),
    };
    match attempt {
        Err(Error::NotFound { .. }) => inner.create_node(node),
        other => other,
    }
}

fn upsert_edge(inner: &Arc<dyn StorageEngine>, edge: Edge) -> Result<()> {
    match inner.update_edge(edge.clone()) {
        Err(Error::NotFound { .. }) => inner.create_edge(edge),
        other => other,
    }
}

fn flush_overlay(inner: &Arc<dyn StorageEngine>, overlay: &Arc<RwLock<Overlay>>) {
    let (nodes, edges) = {
        let mut guard = overlay.write().expect("overlay lock poisoned");
        (std::mem::take(&mut guard.nodes), std::mem::take(&mut guard.edges))
    };
    if nodes.is_empty() && edges.is_empty() {
        return;
    }

    for (id, pending) in nodes {
        let result = match pending {
            PendingNode::Upsert(node, kind) => upsert_node(inner, node, kind),
            PendingNode::Delete => inner.delete_node(&id).or_else(|e| match e {
                Error::NotFound { .. } => Ok(()),
                other => Err(other),
            }),
        };
        if let Err(err) = result {
            error!("async flush failed for node {id}: {err}");
        }
    }

    for (id, pending) in edges {
        let result = match pending {
            PendingEdge::Upsert(edge) => upsert_edge(inner, edge),
            PendingEdge::Delete => inner.delete_edge(&id).or_else(|e| match e {
                Error::NotFound { .. } => Ok(()),
                other => Err(other),
            }),
        };
        if let Err(err) = result {
            error!("async flush failed for edge {id}: {err}");
        }
    }
    debug!("async flush cycle complete");
}

impl StorageEngine for AsyncEngine {
    fn create_node(&self, node: Node) -> Result<()> {
        if !self.enabled {
            return self.inner.create_node(node);
        }
        let mut overlay = self.overlay.write().expect("overlay lock poisoned");
        overlay
            .nodes
            .insert(node.id.clone(), PendingNode::Upsert(node, NodeWriteKind::Update));
        Ok(())
    }

    fn get_node(&self, id: &str) -> Result<Node> {
        if self.enabled {
            let overlay = self.overlay.read().expect("overlay lock poisoned");
            match overlay.nodes.get(id) {
                Some(PendingNode::Upsert(node, _)) => return Ok(node.clone()),
                Some(PendingNode::Delete) => return Err(Error::not_found("node", id)),
                None => {}
            }
        }
        self.inner.get_node(id)
    }

    fn update_node(&self, node: Node) -> Result<()> {
        self.write_through(&node.id.clone(), NodeWriteKind::Update, node)
    }

    fn update_node_embedding(&self, node: Node) -> Result<()> {
        self.write_through(&node.id.clone(), NodeWriteKind::UpdateEmbedding, node)
    }

    fn delete_node(&self, id: &str) -> Result<()> {
        if !self.enabled {
            return self.inner.delete_node(id);
        }
        let mut overlay = self.overlay.write().expect("overlay lock poisoned");
        overlay.nodes.insert(id.to_string(), PendingNode::Delete);
        Ok(())
    }

    fn create_edge(&self, edge: Edge) -> Result<()> {
        if !self.enabled {
            return self.inner.create_edge(edge);
        }
        // Endpoints must exist; check the combined overlay+inner view so a
        // just-created-but-not-yet-flushed node still satisfies the check.
        if self.get_node(&edge.start).is_err() {
            return Err(Error::invalid(format!("edge endpoint not found: {}", edge.start)));
        }
        if self.get_node(&edge.end).is_err() {
            return Err(Error::invalid(format!("edge endpoint not found: {}", edge.end)));
        }
        let mut overlay = self.overlay.write().expect("overlay lock poisoned");
        overlay.edges.insert(edge.id.clone(), PendingEdge::Upsert(edge));
        Ok(())
    }

    fn get_edge(&self, id: &str) -> Result<Edge> {
        if self.enabled {
            let overlay = self.overlay.read().expect("overlay lock poisoned");
            match overlay.edges.get(id) {
                Some(PendingEdge::Upsert(edge)) => return Ok(edge.clone()),
                Some(PendingEdge::Delete) => return Err(Error::not_found("edge", id)),
                None => {}
            }
        }
        self.inner.get_edge(id)
    }

    fn update_edge(&self, edge: Edge) -> Result<()> {
        if !self.enabled {
            return self.inner.update_edge(edge);
        }
        let mut overlay = self.overlay.write().expect("overlay lock poisoned");
        overlay.edges.insert(edge.id.clone(), PendingEdge::Upsert(edge));
        Ok(())
    }

    fn delete_edge(&self, id: &str) -> Result<()> {
        if !self.enabled {
            return self.inner.delete_edge(id);
        }
        let mut overlay = self.overlay.write().expect("overlay lock poisoned");
        overlay.edges.insert(id.to_string(), PendingEdge::Delete);
        Ok(())
    }

    fn outgoing_edges(&self, node_id: &str) -> Result<Vec<Edge>> {
        let mut edges = self.inner.outgoing_edges(node_id)?;
        if self.enabled {
            let overlay = self.overlay.read().expect("overlay lock poisoned");
            let mut seen: HashSet<String> = edges.iter().map(|e| e.id.clone()).collect();
            edges.retain(|e| !matches!(overlay.edges.get(&e.id), Some(PendingEdge::Delete)));
            for (id, pending) in &overlay.edges {
                if let PendingEdge::Upsert(edge) = pending {
                    if edge.start == node_id && seen.insert(id.clone()) {
                        edges.push(edge.clone());
                    }
                }
            }
        }
        Ok(edges)
    }

    fn incoming_edges(&self, node_id: &str) -> Result<Vec<Edge>> {
        let mut edges = self.inner.incoming_edges(node_id)?;
        if self.enabled {
            let overlay = self.overlay.read().expect("overlay lock poisoned");
            let mut seen: HashSet<String> = edges.iter().map(|e| e.id.clone()).collect();
            edges.retain(|e| !matches!(overlay.edges.get(&e.id), Some(PendingEdge::Delete)));
            for (id, pending) in &overlay.edges {
                if let PendingEdge::Upsert(edge) = pending {
                    if edge.end == node_id && seen.insert(id.clone()) {
                        edges.push(edge.clone());
                    }
                }
            }
        }
        Ok(edges)
    }

    fn all_nodes(&self) -> Result<Vec<Node>> {
        let mut nodes = self.inner.all_nodes()?;
        if self.enabled {
            let overlay = self.overlay.read().expect("overlay lock poisoned");
            nodes.retain(|n| !matches!(overlay.nodes.get(&n.id), Some(PendingNode::Delete)));
            let present: HashSet<&String> = nodes.iter().map(|n| &n.id).collect();
            for (id, pending) in &overlay.nodes {
                if let PendingNode::Upsert(node, _) = pending {
                    if !present.contains(id) {
                        nodes.push(node.clone());
                    }
                }
            }
        }
        Ok(nodes)
    }

    fn all_edges(&self) -> Result<Vec<Edge>> {
        let mut edges = self.inner.all_edges()?;
        if self.enabled {
            let overlay = self.overlay.read().expect("overlay lock poisoned");
            edges.retain(|e| !matches!(overlay.edges.get(&e.id), Some(PendingEdge::Delete)));
            let present: HashSet<&String> = edges.iter().map(|e| &e.id).collect();
            for (id, pending) in &overlay.edges {
                if let PendingEdge::Upsert(edge) = pending {
                    if !present.contains(id) {
                        edges.push(edge.clone());
                    }
                }
            }
        }
        Ok(edges)
    }

    fn stream_nodes(&self, batch_size: usize, visitor: &mut dyn FnMut(&Node) -> Visit) -> Result<()> {
        let nodes = self.all_nodes()?;
        for batch in nodes.chunks(batch_size.max(1)) {
            for node in batch {
                if matches!(visitor(node), Visit::Stop) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn find_node_needing_embedding(&self) -> Result<Option<Node>> {
        if !self.enabled {
            return self.inner.find_node_needing_embedding();
        }
        // The overlay may hold the only up-to-date copy of a node, so fall
        // back to a scan over the merged view rather than trusting the
        // inner engine's fast path alone.
        Ok(self.all_nodes()?.into_iter().find(|n| {
            !n.is_internal()
                && !n.has_embedding()
                && !n.properties.contains_key("embedding_skipped")
                && !matches!(n.properties.get("has_embedding"), Some(crate::value::Value::Bool(true)))
        }))
    }

    fn node_count(&self) -> Result<usize> {
        Ok(self.all_nodes()?.len())
    }

    fn edge_count(&self) -> Result<usize> {
        Ok(self.all_edges()?.len())
    }

    fn labels(&self) -> Result<Vec<String>> {
        let mut labels: HashSet<String> = self.inner.labels()?.into_iter().collect();
        if self.enabled {
            let overlay = self.overlay.read().expect("overlay lock poisoned");
            for pending in overlay.nodes.values() {
                if let PendingNode::Upsert(node, _) = pending {
                    labels.extend(node.labels.iter().cloned());
                }
            }
        }
        Ok(labels.into_iter().collect())
    }

    fn relationship_types(&self) -> Result<Vec<String>> {
        let mut types: HashSet<String> = self.inner.relationship_types()?.into_iter().collect();
        if self.enabled {
            let overlay = self.overlay.read().expect("overlay lock poisoned");
            for pending in overlay.edges.values() {
                if let PendingEdge::Upsert(edge) = pending {
                    types.insert(edge.edge_type.clone());
                }
            }
        }
        Ok(types.into_iter().collect())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop.notify_one();
        if let Some(handle) = self.flusher.lock().expect("flusher lock poisoned").take() {
            handle.abort();
        }
        flush_overlay(&self.inner, &self.overlay);
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BaseEngine;
    use crate::value::Properties;

    fn engine(enabled: bool, flush_ms: u64) -> AsyncEngine {
        let inner: Arc<dyn StorageEngine> = Arc::new(BaseEngine::new());
        AsyncEngine::new(
            inner,
            &AsyncWritesConfig {
                enabled,
                flush_interval_ms: flush_ms,
            },
        )
    }

    fn node(id: &str) -> Node {
        Node::new(id, vec!["Memory".into()], Properties::new())
    }

    #[test]
    fn write_then_read_visible_before_flush() {
        let engine = self::engine(true, 1000);
        engine.create_node(node("a")).unwrap();
        let got = engine.get_node("a").unwrap();
        assert_eq!(got.id, "a");
    }

    #[test]
    fn delete_is_visible_immediately() {
        let engine = self::engine(true, 1000);
        engine.create_node(node("a")).unwrap();
        engine.delete_node("a").unwrap();
        assert!(engine.get_node("a").is_err());
    }

    #[tokio::test]
    async fn close_drains_overlay_into_inner() {
        let engine = self::engine(true, 1000);
        engine.create_node(node("a")).unwrap();
        engine.close().unwrap();
        assert_eq!(engine.node_count().unwrap(), 1);
    }
}
