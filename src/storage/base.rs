use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::{Edge, Node};
use crate::value::Value;

use super::{StorageEngine, Visit};

/// Per-node adjacency: edge ids leaving and entering this node.
#[derive(Default)]
struct Adjacency {
    out: HashSet<String>,
    inn: HashSet<String>,
}

#[derive(Default)]
struct Indexes {
    by_label: HashMap<String, HashSet<String>>,
    by_type: HashMap<String, HashSet<String>>,
    adjacency: HashMap<String, Adjacency>,
}

#[derive(Default)]
struct Tables {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    indexes: Indexes,
}

/// The in-memory index of nodes and edges with secondary indexes by
/// label, by edge type, and by endpoint adjacency. All mutations take a
/// single writer lock; reads take a reader lock and may overlap.
pub struct BaseEngine {
    tables: RwLock<Tables>,
}

impl Default for BaseEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseEngine {
    pub fn new() -> Self {
        BaseEngine {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Constructs an engine pre-populated from a WAL replay, bypassing the
    /// public mutation API (and its own index maintenance would otherwise
    /// re-enqueue WAL records).
    pub fn from_state(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let engine = BaseEngine::new();
        {
            let mut tables = engine.tables.write().expect("lock poisoned");
            for node in nodes {
                index_node(&mut tables.indexes, &node);
                tables.nodes.insert(node.id.clone(), node);
            }
            for edge in edges {
                index_edge(&mut tables.indexes, &edge);
                tables.edges.insert(edge.id.clone(), edge);
            }
        }
        engine
    }
}

fn index_node(indexes: &mut Indexes, node: &Node) {
    for label in &node.labels {
        indexes.by_label.entry(label.clone()).or_default().insert(node.id.clone());
    }
    indexes.adjacency.entry(node.id.clone()).or_default();
}

fn unindex_node(indexes: &mut Indexes, node: &Node) {
    for label in &node.labels {
        if let Some(set) = indexes.by_label.get_mut(label) {
            set.remove(&node.id);
        }
    }
}

fn index_edge(indexes: &mut Indexes, edge: &Edge) {
    indexes
        .by_type
        .entry(edge.edge_type.clone())
        .or_default()
        .insert(edge.id.clone());
    indexes.adjacency.entry(edge.start.clone()).or_default().out.insert(edge.id.clone());
    indexes.adjacency.entry(edge.end.clone()).or_default().inn.insert(edge.id.clone());
}

fn unindex_edge(indexes: &mut Indexes, edge: &Edge) {
    if let Some(set) = indexes.by_type.get_mut(&edge.edge_type) {
        set.remove(&edge.id);
    }
    if let Some(adj) = indexes.adjacency.get_mut(&edge.start) {
        adj.out.remove(&edge.id);
    }
    if let Some(adj) = indexes.adjacency.get_mut(&edge.end) {
        adj.inn.remove(&edge.id);
    }
}

/// A node is a candidate for embedding discovery per spec's ordered
/// predicate: skip internal nodes, nodes already carrying an embedding,
/// and nodes explicitly settled by a prior worker pass.
fn needs_embedding(node: &Node) -> bool {
    if node.is_internal() {
        return false;
    }
    if node.has_embedding() {
        return false;
    }
    if matches!(node.properties.get("embedding_skipped"), Some(_)) {
        return false;
    }
    if matches!(node.properties.get("has_embedding"), Some(Value::Bool(true))) {
        return false;
    }
    true
}

impl StorageEngine for BaseEngine {
    fn create_node(&self, node: Node) -> Result<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        if tables.nodes.contains_key(&node.id) {
            return Err(Error::duplicate("node", node.id.clone()));
        }
        index_node(&mut tables.indexes, &node);
        tables.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    fn get_node(&self, id: &str) -> Result<Node> {
        let tables = self.tables.read().expect("lock poisoned");
        tables
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("node", id))
    }

    fn update_node(&self, node: Node) -> Result<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        let existing = tables
            .nodes
            .get(&node.id)
            .cloned()
            .ok_or_else(|| Error::not_found("node", node.id.clone()))?;
        unindex_node(&mut tables.indexes, &existing);
        index_node(&mut tables.indexes, &node);
        tables.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    fn update_node_embedding(&self, node: Node) -> Result<()> {
        self.update_node(node)
    }

    fn delete_node(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        let node = tables
            .nodes
            .remove(id)
            .ok_or_else(|| Error::not_found("node", id))?;
        unindex_node(&mut tables.indexes, &node);

        let adjacency = tables.indexes.adjacency.remove(id).unwrap_or_default();
        let incident: HashSet<String> = adjacency.out.into_iter().chain(adjacency.inn).collect();
        for edge_id in incident {
            if let Some(edge) = tables.edges.remove(&edge_id) {
                unindex_edge(&mut tables.indexes, &edge);
            }
        }
        Ok(())
    }

    fn create_edge(&self, edge: Edge) -> Result<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        if !tables.nodes.contains_key(&edge.start) {
            return Err(Error::invalid(format!("edge endpoint not found: {}", edge.start)));
        }
        if !tables.nodes.contains_key(&edge.end) {
            return Err(Error::invalid(format!("edge endpoint not found: {}", edge.end)));
        }
        if tables.edges.contains_key(&edge.id) {
            return Err(Error::duplicate("edge", edge.id.clone()));
        }
        index_edge(&mut tables.indexes, &edge);
        tables.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    fn get_edge(&self, id: &str) -> Result<Edge> {
        let tables = self.tables.read().expect("lock poisoned");
        tables
            .edges
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("edge", id))
    }

    fn update_edge(&self, edge: Edge) -> Result<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        let existing = tables
            .edges
            .get(&edge.id)
            .cloned()
            .ok_or_else(|| Error::not_found("edge", edge.id.clone()))?;
        unindex_edge(&mut tables.indexes, &existing);
        index_edge(&mut tables.indexes, &edge);
        tables.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    fn delete_edge(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        let edge = tables.edges.remove(id).ok_or_else(|| Error::not_found("edge", id))?;
        unindex_edge(&mut tables.indexes, &edge);
        Ok(())
    }

    fn outgoing_edges(&self, node_id: &str) -> Result<Vec<Edge>> {
        let tables = self.tables.read().expect("lock poisoned");
        let ids = tables
            .indexes
            .adjacency
            .get(node_id)
            .map(|a| a.out.clone())
            .unwrap_or_default();
        Ok(ids.into_iter().filter_map(|id| tables.edges.get(&id).cloned()).collect())
    }

    fn incoming_edges(&self, node_id: &str) -> Result<Vec<Edge>> {
        let tables = self.tables.read().expect("lock poisoned");
        let ids = tables
            .indexes
            .adjacency
            .get(node_id)
            .map(|a| a.inn.clone())
            .unwrap_or_default();
        Ok(ids.into_iter().filter_map(|id| tables.edges.get(&id).cloned()).collect())
    }

    fn all_nodes(&self) -> Result<Vec<Node>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.nodes.values().cloned().collect())
    }

    fn all_edges(&self) -> Result<Vec<Edge>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.edges.values().cloned().collect())
    }

    fn stream_nodes(&self, batch_size: usize, visitor: &mut dyn FnMut(&Node) -> Visit) -> Result<()> {
        let batch_size = batch_size.max(1);
        let snapshot: Vec<Node> = {
            let tables = self.tables.read().expect("lock poisoned");
            tables.nodes.values().cloned().collect()
        };
        for batch in snapshot.chunks(batch_size) {
            for node in batch {
                if matches!(visitor(node), Visit::Stop) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn find_node_needing_embedding(&self) -> Result<Option<Node>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.nodes.values().find(|n| needs_embedding(n)).cloned())
    }

    fn node_count(&self) -> Result<usize> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.nodes.len())
    }

    fn edge_count(&self) -> Result<usize> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.edges.len())
    }

    fn labels(&self) -> Result<Vec<String>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.indexes.by_label.keys().cloned().collect())
    }

    fn relationship_types(&self) -> Result<Vec<String>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.indexes.by_type.keys().cloned().collect())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Properties;

    fn node(id: &str, labels: &[&str]) -> Node {
        Node::new(id, labels.iter().map(|s| s.to_string()).collect(), Properties::new())
    }

    #[test]
    fn create_node_rejects_duplicate_id() {
        let engine = BaseEngine::new();
        engine.create_node(node("n1", &["Memory"])).unwrap();
        let err = engine.create_node(node("n1", &["Memory"])).unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
    }

    #[test]
    fn delete_node_cascades_incident_edges() {
        let engine = BaseEngine::new();
        engine.create_node(node("a", &["Memory"])).unwrap();
        engine.create_node(node("b", &["Memory"])).unwrap();
        engine
            .create_edge(Edge::new("e1", "a", "b", "LINKS_TO", Properties::new(), 1.0))
            .unwrap();

        engine.delete_node("a").unwrap();
        assert!(engine.get_edge("e1").is_err());
        assert_eq!(engine.outgoing_edges("a").unwrap().len(), 0);
    }

    #[test]
    fn create_edge_requires_both_endpoints() {
        let engine = BaseEngine::new();
        engine.create_node(node("a", &["Memory"])).unwrap();
        let err = engine
            .create_edge(Edge::new("e1", "a", "missing", "LINKS_TO", Properties::new(), 1.0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn find_node_needing_embedding_respects_markers() {
        let engine = BaseEngine::new();
        engine.create_node(node("internal", &["_System"])).unwrap();
        let mut settled = node("done", &["Memory"]);
        settled.embedding = Some(vec![1.0]);
        engine.create_node(settled).unwrap();
        engine.create_node(node("todo", &["Memory"])).unwrap();

        let found = engine.find_node_needing_embedding().unwrap().unwrap();
        assert_eq!(found.id, "todo");
    }

    #[test]
    fn stream_nodes_stops_early() {
        let engine = BaseEngine::new();
        for i in 0..5 {
            engine.create_node(node(&format!("n{i}"), &["Memory"])).unwrap();
        }
        let mut seen = 0;
        engine
            .stream_nodes(2, &mut |_n| {
                seen += 1;
                if seen == 2 {
                    Visit::Stop
                } else {
                    Visit::Continue
                }
            })
            .unwrap();
        assert_eq!(seen, 2);
    }
}
