//! The DB façade — the single object external collaborators hold.
//!
//! Opens every layer in order (base → WAL → async → search → inference →
//! embedding worker), owns the background tasks, and exposes memory and
//! node/edge CRUD, search, schema introspection, and stats. Construction
//! is atomic — `open` either returns a fully-initialised, `Ready` façade
//! or an `Err`, never a partially-opened instance — and from there
//! enforces a `Ready → Closing → Closed` lifecycle: operations outside
//! `Ready` fail with [`Error::Closed`].

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{Config, DecayConfig};
use crate::embedding::worker::{EmbeddedCallback, EmbeddingWorker, WorkerStats};
use crate::embedding::{EmbedResult, Embedder};
use crate::error::{Error, Result};
use crate::inference::InferenceEngine;
use crate::model::{Edge, Memory, Node};
use crate::search::SearchService;
use crate::storage::{AsyncEngine, BaseEngine, StorageEngine, WalEngine, WalMode};
use crate::value::Properties;

const DIMENSIONS_MARKER: &str = "dimensions.meta";
const SIMILARITY_K: usize = 10;

/// Lifecycle states a façade instance moves through exactly once.
///
/// There is no `Opening` state: every fallible setup step (dimension
/// check, WAL replay, search index build) runs before `Db::open` hands
/// back an `Arc<Db>`, so construction is atomic relative to callers — a
/// failure partway through never produces an observable `Db` at all, it
/// just returns `Err`. A `Db` therefore always starts life `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Ready,
    Closing,
    Closed,
}

/// One hybrid-search hit resolved back to its node.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub node: Node,
    pub score: f32,
    pub bm25_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

/// Result of `Db::check_integrity` — the CLI `doctor` subcommand's report.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub dangling_edges: Vec<String>,
    pub replay_warnings: usize,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.dangling_edges.is_empty()
    }
}

/// Observable façade-wide statistics.
#[derive(Debug, Clone)]
pub struct DbStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub labels: Vec<String>,
    pub relationship_types: Vec<String>,
    pub embedding: WorkerStats,
    pub replay_warnings: usize,
}

/// A small ring buffer of recently-recalled node ids, used to propose
/// `CO_ACCESSED_WITH` edges between memories recalled within the same
/// window — the co-access tracker spec.md §3 mentions without detailing.
struct CoAccessTracker {
    window: Duration,
    recent: VecDeque<(String, Instant)>,
}

impl CoAccessTracker {
    fn new(window: Duration) -> Self {
        CoAccessTracker {
            window,
            recent: VecDeque::new(),
        }
    }

    /// Prunes stale entries, returns the ids still within the window, then
    /// records `id` for future lookups.
    fn record(&mut self, id: &str) -> Vec<String> {
        let now = Instant::now();
        while let Some((_, ts)) = self.recent.front() {
            if now.duration_since(*ts) >= self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        let co_accessed: Vec<String> = self
            .recent
            .iter()
            .map(|(other, _)| other.clone())
            .filter(|other| other != id)
            .collect();
        self.recent.push_back((id.to_string(), now));
        co_accessed
    }
}

/// The graph database engine: coordinates storage, search, inference, and
/// the embedding worker behind one lifecycle-guarded handle.
pub struct Db {
    state: RwLock<Lifecycle>,
    storage: Arc<dyn StorageEngine>,
    wal_layer: Option<Arc<WalEngine>>,
    search: Arc<SearchService>,
    inference: Arc<InferenceEngine>,
    embedder: RwLock<Option<Arc<dyn Embedder>>>,
    worker: Arc<EmbeddingWorker>,
    config: Config,
    co_access: Mutex<CoAccessTracker>,
    decay_stop: Arc<Notify>,
    decay_handle: Mutex<Option<JoinHandle<()>>>,
    decay_sweeps: AtomicUsize,
}

impl Db {
    /// Opens (or creates) the database described by `config`. `clear_embeddings`
    /// resolves the dimension-change open question (spec.md §9): when the
    /// configured dimensionality differs from the one recorded by a prior
    /// run, opening fails unless this is `true`, in which case every stored
    /// embedding is cleared and its node re-enqueued.
    pub fn open(config: Config, clear_embeddings: bool) -> Result<Arc<Db>> {
        let data_dir = config.resolved_data_dir();

        let (storage, wal_layer): (Arc<dyn StorageEngine>, Option<Arc<WalEngine>>) = match &data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| Error::Corrupt(format!("cannot create data dir: {e}")))?;
                check_dimensions(dir, config.embedding.dimensions, clear_embeddings)?;

                let mode = WalMode::parse(&config.wal.mode);
                let wal_engine = Arc::new(WalEngine::open(dir, mode, config.wal.segment_size)?);
                if clear_embeddings {
                    clear_all_embeddings(wal_engine.as_ref())?;
                }
                (wal_engine.clone() as Arc<dyn StorageEngine>, Some(wal_engine))
            }
            None => {
                let base: Arc<dyn StorageEngine> = Arc::new(BaseEngine::new());
                (base, None)
            }
        };

        let storage: Arc<dyn StorageEngine> = if config.async_writes.enabled {
            let async_engine = Arc::new(AsyncEngine::new(storage, &config.async_writes));
            async_engine.start();
            async_engine
        } else {
            storage
        };

        let search = Arc::new(SearchService::new());
        search.rebuild(&storage.all_nodes()?);

        let inference = Arc::new(InferenceEngine::new(config.auto_links.similarity_threshold, SIMILARITY_K));

        let worker = Arc::new(EmbeddingWorker::new(
            storage.clone(),
            config.embedding.clone(),
            Some(make_embedded_callback(storage.clone(), search.clone(), inference.clone(), &config)),
        ));

        let decay_stop = Arc::new(Notify::new());
        let decay_handle = if config.decay.enabled {
            Some(spawn_decay_sweep(storage.clone(), search.clone(), config.decay.clone(), decay_stop.clone()))
        } else {
            None
        };

        let db = Arc::new(Db {
            state: RwLock::new(Lifecycle::Ready),
            storage,
            wal_layer,
            search,
            inference,
            embedder: RwLock::new(None),
            worker,
            co_access: Mutex::new(CoAccessTracker::new(Duration::from_secs(
                config.auto_links.co_access_window_secs.max(1),
            ))),
            decay_stop,
            decay_handle: Mutex::new(decay_handle),
            decay_sweeps: AtomicUsize::new(0),
            config,
        });

        info!("engramdb opened");
        Ok(db)
    }

    /// Attaches the embedder capability and starts the background worker.
    /// Also available for query-time embedding (search, inference).
    pub fn set_embedder(&self, embedder: Arc<dyn Embedder>) {
        *self.embedder.write().expect("embedder lock poisoned") = Some(embedder.clone());
        self.worker.set_embedder(embedder);
    }

    fn ensure_ready(&self) -> Result<()> {
        if *self.state.read().expect("state lock poisoned") == Lifecycle::Ready {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// Rejects an externally-supplied embedding whose length doesn't match
    /// the configured dimensionality — mixing dimensions within one database
    /// is forbidden (spec §3, §6).
    fn check_embedding_dimensions(&self, embedding: &[f32]) -> Result<()> {
        let expected = self.config.embedding.dimensions;
        if embedding.len() != expected {
            return Err(Error::invalid(format!(
                "embedding has {} dimensions, expected {expected}",
                embedding.len()
            )));
        }
        Ok(())
    }

    fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        self.embedder
            .read()
            .expect("embedder lock poisoned")
            .clone()
            .ok_or_else(|| Error::invalid("no embedder attached"))
    }

    /// Embeds `text` through the attached embedder — used for query-time
    /// embedding by `hybrid_search`/`remember` callers and by the CLI's
    /// synchronous import path.
    pub fn embed_text(&self, text: &str) -> EmbedResult<Vec<f32>> {
        match self.embedder() {
            Ok(embedder) => embedder.embed_one(text),
            Err(_) => Err(crate::embedding::EmbedError::Permanent("no embedder attached".into())),
        }
    }

    // ---- node / edge CRUD -------------------------------------------------

    pub fn create_node(&self, labels: Vec<String>, properties: Properties) -> Result<Node> {
        self.ensure_ready()?;
        for label in &labels {
            if label.is_empty() {
                return Err(Error::invalid("labels must be non-empty"));
            }
        }
        let id = uuid::Uuid::now_v7().to_string();
        let node = Node::new(id, labels, properties);
        self.storage.create_node(node.clone())?;
        self.search.index_node(&node);
        if self.config.auto_embed.enabled && !node.is_internal() {
            self.worker.trigger();
        }
        Ok(node)
    }

    pub fn get_node(&self, id: &str) -> Result<Node> {
        self.ensure_ready()?;
        self.storage.get_node(id)
    }

    /// Merges `patch` into the node's properties (reserved keys stripped).
    pub fn update_node(&self, id: &str, patch: Properties) -> Result<Node> {
        self.ensure_ready()?;
        let mut node = self.storage.get_node(id)?;
        node.apply_patch(patch);
        self.storage.update_node(node.clone())?;
        self.search.index_node(&node);
        Ok(node)
    }

    pub fn delete_node(&self, id: &str) -> Result<()> {
        self.ensure_ready()?;
        self.storage.delete_node(id)?;
        self.search.remove_node(id);
        Ok(())
    }

    pub fn create_edge(
        &self,
        start: &str,
        end: &str,
        edge_type: &str,
        properties: Properties,
        confidence: f32,
    ) -> Result<Edge> {
        self.ensure_ready()?;
        if edge_type.is_empty() {
            return Err(Error::invalid("edge type must be non-empty"));
        }
        let id = uuid::Uuid::now_v7().to_string();
        let edge = Edge::new(id, start, end, edge_type, properties, confidence);
        self.storage.create_edge(edge.clone())?;
        Ok(edge)
    }

    pub fn get_edge(&self, id: &str) -> Result<Edge> {
        self.ensure_ready()?;
        self.storage.get_edge(id)
    }

    pub fn update_edge(&self, edge: Edge) -> Result<()> {
        self.ensure_ready()?;
        self.storage.update_edge(edge)
    }

    pub fn delete_edge(&self, id: &str) -> Result<()> {
        self.ensure_ready()?;
        self.storage.delete_edge(id)
    }

    /// Inserts a node exactly as given, preserving its id rather than
    /// minting a fresh one — the CLI `import` command's restore path for a
    /// prior `export`. Fails with `Duplicate` if the id already exists.
    pub fn import_node(&self, node: Node) -> Result<()> {
        self.ensure_ready()?;
        if let Some(embedding) = &node.embedding {
            self.check_embedding_dimensions(embedding)?;
        }
        self.storage.create_node(node.clone())?;
        self.search.index_node(&node);
        Ok(())
    }

    /// Inserts an edge exactly as given, preserving its id — the edge
    /// counterpart of [`Db::import_node`].
    pub fn import_edge(&self, edge: Edge) -> Result<()> {
        self.ensure_ready()?;
        self.storage.create_edge(edge)
    }

    pub fn outgoing_edges(&self, id: &str) -> Result<Vec<Edge>> {
        self.ensure_ready()?;
        self.storage.outgoing_edges(id)
    }

    pub fn incoming_edges(&self, id: &str) -> Result<Vec<Edge>> {
        self.ensure_ready()?;
        self.storage.incoming_edges(id)
    }

    // ---- memory view -------------------------------------------------------

    /// Stores a memory. If `memory.embedding` is already set (the caller
    /// pre-computed it, e.g. via `embed_text`), inference runs immediately;
    /// otherwise the node is enqueued for the embedding worker and
    /// inference runs later through its `on_embedded` callback.
    pub fn store(&self, memory: Memory) -> Result<Memory> {
        self.ensure_ready()?;
        if let Some(embedding) = &memory.embedding {
            self.check_embedding_dimensions(embedding)?;
        }
        let id = uuid::Uuid::now_v7().to_string();
        let mut node = Node::new(id, vec!["Memory".into()], memory.to_properties());
        node.embedding = memory.embedding.clone();
        self.storage.create_node(node.clone())?;
        self.search.index_node(&node);

        if node.embedding.is_some() {
            self.run_inference(&node.id);
        } else if self.config.auto_embed.enabled {
            self.worker.trigger();
        }

        let mut stored = memory;
        stored.id = node.id;
        Ok(stored)
    }

    /// Recalls a memory by id: bumps its access counter and decay score,
    /// notifies the co-access tracker, and proposes `CO_ACCESSED_WITH`
    /// edges to whatever else was recalled within the configured window.
    pub fn recall(&self, id: &str) -> Result<Memory> {
        self.ensure_ready()?;
        let mut node = self.storage.get_node(id)?;
        node.record_access(self.config.decay.half_life_secs as f64);
        self.storage.update_node(node.clone())?;

        if self.config.auto_links.enabled {
            let co_accessed = self.co_access.lock().expect("co-access lock poisoned").record(id);
            if !co_accessed.is_empty() {
                for edge in self.inference.infer_co_access_edges(id, &co_accessed) {
                    let _ = self.storage.create_edge(edge);
                }
            }
        }

        Memory::from_node(&node).ok_or_else(|| Error::invalid(format!("{id} is not a Memory node")))
    }

    /// Cosine k-NN against an arbitrary query vector, projected to memories.
    pub fn remember(&self, query_vector: &[f32], limit: usize) -> Result<Vec<(Memory, f32)>> {
        self.ensure_ready()?;
        Ok(self
            .search
            .query_vector(query_vector, limit)
            .into_iter()
            .filter_map(|(id, score)| {
                let node = self.storage.get_node(&id).ok()?;
                Memory::from_node(&node).map(|m| (m, score))
            })
            .collect())
    }

    pub fn forget(&self, id: &str) -> Result<()> {
        self.delete_node(id)
    }

    /// Drives the embedding worker through every currently-outstanding
    /// candidate and returns once none remain, bypassing the scan-interval
    /// ticker — used by the CLI `re-embed` command, which needs completion
    /// before the process exits rather than waiting on the background task.
    pub async fn run_embedding_pass(&self) -> Result<()> {
        self.ensure_ready()?;
        self.worker.process_until_empty().await;
        Ok(())
    }

    /// Manually asserts an edge (not `auto_generated`) between two memories.
    pub fn link(
        &self,
        start: &str,
        end: &str,
        edge_type: &str,
        properties: Properties,
        confidence: f32,
    ) -> Result<Edge> {
        self.create_edge(start, end, edge_type, properties, confidence)
    }

    /// Bounded BFS over outgoing and incoming edges, up to `depth` (hard
    /// ceiling 5), optionally filtered by edge type, collecting distinct
    /// neighbours.
    pub fn neighbors(&self, id: &str, edge_type: Option<&str>, depth: usize) -> Result<Vec<Node>> {
        self.ensure_ready()?;
        self.storage.get_node(id)?;
        let depth = depth.min(5).max(1);

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(id.to_string());
        let mut frontier = vec![id.to_string()];
        let mut result = Vec::new();

        for _ in 0..depth {
            let mut next = Vec::new();
            for current in &frontier {
                let out = self.storage.outgoing_edges(current)?;
                let inn = self.storage.incoming_edges(current)?;
                for edge in out.iter().chain(inn.iter()) {
                    if let Some(t) = edge_type {
                        if edge.edge_type != t {
                            continue;
                        }
                    }
                    if let Some(other) = edge.other_end(current) {
                        if visited.insert(other.to_string()) {
                            next.push(other.to_string());
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            for nid in &next {
                if let Ok(node) = self.storage.get_node(nid) {
                    result.push(node);
                }
            }
            frontier = next;
        }
        Ok(result)
    }

    fn run_inference(&self, node_id: &str) {
        if !self.config.auto_links.enabled {
            return;
        }
        for edge in self.inference.infer_similarity_edges(node_id, self.search.as_ref()) {
            let _ = self.storage.create_edge(edge);
        }
    }

    // ---- search --------------------------------------------------------------

    fn allowed_ids_for_labels(&self, labels: Option<&[String]>) -> Result<Option<Vec<String>>> {
        let Some(labels) = labels else { return Ok(None) };
        if labels.is_empty() {
            return Ok(None);
        }
        let nodes = self.storage.all_nodes()?;
        Ok(Some(
            nodes
                .into_iter()
                .filter(|n| labels.iter().any(|l| n.has_label(l)))
                .map(|n| n.id)
                .collect(),
        ))
    }

    /// Pure BM25 lexical search, filtered by label set.
    pub fn search(&self, query: &str, labels: Option<&[String]>, limit: usize) -> Result<Vec<(Node, f32)>> {
        self.ensure_ready()?;
        let allowed = self.allowed_ids_for_labels(labels)?;
        Ok(self
            .search
            .search(query, allowed.as_deref(), limit)
            .into_iter()
            .filter_map(|(id, score)| self.storage.get_node(&id).ok().map(|n| (n, score)))
            .collect())
    }

    /// Embeds `query` through the attached embedder and fuses BM25 with
    /// vector similarity via reciprocal-rank fusion.
    pub fn hybrid_search(&self, query: &str, labels: Option<&[String]>, limit: usize) -> Result<Vec<SearchHit>> {
        self.ensure_ready()?;
        let embedder = self.embedder()?;
        let query_vector = embedder
            .embed_one(query)
            .map_err(|e| Error::Transient(e.to_string()))?;
        let allowed = self.allowed_ids_for_labels(labels)?;

        Ok(self
            .search
            .hybrid_search(query, &query_vector, allowed.as_deref(), limit)
            .into_iter()
            .filter_map(|hit| {
                let node = self.storage.get_node(&hit.id).ok()?;
                Some(SearchHit {
                    node,
                    score: hit.rrf_score,
                    bm25_rank: hit.bm25_rank,
                    vector_rank: hit.vector_rank,
                })
            })
            .collect())
    }

    pub fn find_similar(&self, node_id: &str, limit: usize) -> Result<Vec<(Node, f32)>> {
        self.ensure_ready()?;
        Ok(self
            .search
            .find_similar(node_id, limit)
            .into_iter()
            .filter_map(|(id, score)| self.storage.get_node(&id).ok().map(|n| (n, score)))
            .collect())
    }

    // ---- schema / stats --------------------------------------------------------

    pub fn labels(&self) -> Result<Vec<String>> {
        self.ensure_ready()?;
        self.storage.labels()
    }

    pub fn relationship_types(&self) -> Result<Vec<String>> {
        self.ensure_ready()?;
        self.storage.relationship_types()
    }

    /// Every node in the graph, including internal (`_`-prefixed-label)
    /// nodes — the CLI `export` command's full dump.
    pub fn all_nodes(&self) -> Result<Vec<Node>> {
        self.ensure_ready()?;
        self.storage.all_nodes()
    }

    /// Every edge in the graph — the CLI `export` command's full dump.
    pub fn all_edges(&self) -> Result<Vec<Edge>> {
        self.ensure_ready()?;
        self.storage.all_edges()
    }

    /// All non-deleted nodes carrying `label` — the CLI's `stats --group`
    /// and `doctor` use this for per-label breakdowns.
    pub fn nodes_with_label(&self, label: &str) -> Result<Vec<Node>> {
        self.ensure_ready()?;
        Ok(self
            .storage
            .all_nodes()?
            .into_iter()
            .filter(|n| n.has_label(label))
            .collect())
    }

    pub fn stats(&self) -> Result<DbStats> {
        self.ensure_ready()?;
        Ok(DbStats {
            node_count: self.storage.node_count()?,
            edge_count: self.storage.edge_count()?,
            labels: self.storage.labels()?,
            relationship_types: self.storage.relationship_types()?,
            embedding: self.worker.stats(),
            replay_warnings: self.wal_layer.as_ref().map(|w| w.replay_warnings()).unwrap_or(0),
        })
    }

    /// Walks every edge and confirms both endpoints resolve to a stored
    /// node — the closest analogue to a relational integrity check this
    /// engine has, since there is no foreign-key enforcement at write time.
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        self.ensure_ready()?;
        let mut dangling_edges = Vec::new();
        for edge in self.storage.all_edges()? {
            if self.storage.get_node(&edge.start).is_err() || self.storage.get_node(&edge.end).is_err() {
                dangling_edges.push(edge.id);
            }
        }
        Ok(IntegrityReport {
            dangling_edges,
            replay_warnings: self.wal_layer.as_ref().map(|w| w.replay_warnings()).unwrap_or(0),
        })
    }

    /// Runs one decay sweep immediately (the CLI `compact` subcommand), in
    /// addition to whatever periodic sweep is already scheduled.
    pub fn compact(&self) -> Result<()> {
        self.ensure_ready()?;
        run_decay_sweep(&self.storage, &self.search, &self.config.decay);
        self.decay_sweeps.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Idempotent: waits for background workers to drain, then closes WAL
    /// and base storage. Operations arriving after close fail with `Closed`.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write().expect("state lock poisoned");
            if *state == Lifecycle::Closed {
                return Ok(());
            }
            *state = Lifecycle::Closing;
        }

        self.worker.close().await;
        self.decay_stop.notify_one();
        if let Some(handle) = self.decay_handle.lock().expect("decay handle lock poisoned").take() {
            let _ = handle.await;
        }

        let result = self.storage.close();

        *self.state.write().expect("state lock poisoned") = Lifecycle::Closed;
        result
    }
}

fn make_embedded_callback(
    storage: Arc<dyn StorageEngine>,
    search: Arc<SearchService>,
    inference: Arc<InferenceEngine>,
    config: &Config,
) -> Arc<EmbeddedCallback> {
    let auto_links_enabled = config.auto_links.enabled;
    Arc::new(move |id: &str| {
        let Ok(node) = storage.get_node(id) else { return };
        search.index_node(&node);
        if auto_links_enabled && node.embedding.is_some() {
            for edge in inference.infer_similarity_edges(id, search.as_ref()) {
                let _ = storage.create_edge(edge);
            }
        }
    })
}

fn spawn_decay_sweep(
    storage: Arc<dyn StorageEngine>,
    search: Arc<SearchService>,
    decay: DecayConfig,
    stop: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(decay.recalculate_interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = stop.notified() => break,
                _ = ticker.tick() => {
                    run_decay_sweep(&storage, &search, &decay);
                }
            }
        }
    })
}

/// Recomputes every non-internal node's decay score from elapsed time, and
/// flags nodes below the archive threshold with an internal `_archived`
/// label — the engine never deletes data outside an explicit `delete_node`.
fn run_decay_sweep(storage: &Arc<dyn StorageEngine>, search: &Arc<SearchService>, decay: &DecayConfig) {
    let Ok(nodes) = storage.all_nodes() else { return };
    for mut node in nodes {
        if node.is_internal() {
            continue;
        }
        node.recompute_decay(decay.half_life_secs as f64);
        if node.decay_score < decay.archive_threshold && !node.has_label("_archived") {
            node.labels.push("_archived".into());
        }
        if storage.update_node(node.clone()).is_ok() {
            search.index_node(&node);
        }
    }
}

fn clear_all_embeddings(storage: &dyn StorageEngine) -> Result<()> {
    for mut node in storage.all_nodes()? {
        if node.embedding.is_none() && !node.properties.contains_key("has_embedding") {
            continue;
        }
        node.embedding = None;
        for key in [
            "has_embedding",
            "embedding_skipped",
            "embedding_model",
            "embedding_dimensions",
            "embedded_at",
            "embedding_chunks",
        ] {
            node.properties.remove(key);
        }
        storage.update_node(node)?;
    }
    Ok(())
}

/// Reads the dimensionality recorded by a prior run (if any) and compares it
/// against `dimensions`. A mismatch refuses to open unless `clear_embeddings`
/// is set, in which case the marker is rewritten to the new value.
fn check_dimensions(data_dir: &Path, dimensions: usize, clear_embeddings: bool) -> Result<()> {
    let marker = data_dir.join(DIMENSIONS_MARKER);
    if let Ok(contents) = std::fs::read_to_string(&marker) {
        if let Ok(recorded) = contents.trim().parse::<usize>() {
            if recorded != dimensions && !clear_embeddings {
                return Err(Error::invalid(format!(
                    "configured embedding dimension {dimensions} differs from recorded {recorded}; \
                     pass clear_embeddings to reset"
                )));
            }
            if recorded == dimensions {
                return Ok(());
            }
        }
    }
    std::fs::write(&marker, dimensions.to_string())
        .map_err(|e| Error::Corrupt(format!("cannot write dimension marker: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbedder;
    use crate::model::MemoryTier;
    use crate::value::Value;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.storage.data_dir = String::new();
        config.async_writes.enabled = false;
        config.embedding.dimensions = 8;
        config.decay.enabled = false;
        config
    }

    #[tokio::test]
    async fn create_get_update_delete_node_round_trips() {
        let db = Db::open(test_config(), false).unwrap();
        let mut props = Properties::new();
        props.insert("title".into(), Value::from("hello"));
        let node = db.create_node(vec!["Memory".into()], props).unwrap();

        let fetched = db.get_node(&node.id).unwrap();
        assert_eq!(fetched.properties.get("title").unwrap().as_str(), Some("hello"));

        let mut patch = Properties::new();
        patch.insert("title".into(), Value::from("updated"));
        let updated = db.update_node(&node.id, patch).unwrap();
        assert_eq!(updated.properties.get("title").unwrap().as_str(), Some("updated"));

        db.delete_node(&node.id).unwrap();
        assert!(db.get_node(&node.id).is_err());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn store_with_precomputed_embedding_runs_inference_immediately() {
        let mut config = test_config();
        config.auto_links.similarity_threshold = 0.5;
        let db = Db::open(config, false).unwrap();

        let first = db.store(Memory::new("alpha content", MemoryTier::Semantic)).unwrap();
        let mut with_vec = Memory::new("alpha content", MemoryTier::Semantic);
        with_vec.embedding = Some(vec![1.0, 0.0, 0.0, 0.0]);
        let mut first_fetched = db.get_node(&first.id).unwrap();
        first_fetched.embedding = Some(vec![1.0, 0.0, 0.0, 0.0]);
        db.storage.update_node_embedding(first_fetched).unwrap();
        db.search.index_node(&db.get_node(&first.id).unwrap());

        let second = db.store(with_vec).unwrap();
        let edges = db.outgoing_edges(&second.id).unwrap();
        assert!(edges.iter().any(|e| e.edge_type == "SIMILAR_TO" && e.end == first.id));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn neighbors_respects_depth_and_edge_type() {
        let db = Db::open(test_config(), false).unwrap();
        let a = db.create_node(vec!["Memory".into()], Properties::new()).unwrap();
        let b = db.create_node(vec!["Memory".into()], Properties::new()).unwrap();
        let c = db.create_node(vec!["Memory".into()], Properties::new()).unwrap();
        db.link(&a.id, &b.id, "LINKS_TO", Properties::new(), 1.0).unwrap();
        db.link(&b.id, &c.id, "OTHER", Properties::new(), 1.0).unwrap();

        let one_hop = db.neighbors(&a.id, None, 1).unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].id, b.id);

        let filtered = db.neighbors(&a.id, Some("OTHER"), 2).unwrap();
        assert!(filtered.is_empty());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_db_rejects_operations() {
        let db = Db::open(test_config(), false).unwrap();
        db.close().await.unwrap();
        assert!(matches!(db.get_node("missing").unwrap_err(), Error::Closed));
        db.close().await.unwrap();
    }

    #[test]
    fn dimension_mismatch_without_clear_flag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        check_dimensions(dir.path(), 8, false).unwrap();
        let err = check_dimensions(dir.path(), 16, false).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        check_dimensions(dir.path(), 16, true).unwrap();
        check_dimensions(dir.path(), 16, false).unwrap();
    }

    #[tokio::test]
    async fn hybrid_search_uses_attached_embedder() {
        let db = Db::open(test_config(), false).unwrap();
        db.set_embedder(Arc::new(DeterministicEmbedder::new(8)));

        let mut props = Properties::new();
        props.insert("content".into(), Value::from("quick brown fox"));
        let node = db.create_node(vec!["Memory".into()], props).unwrap();
        let mut fetched = db.get_node(&node.id).unwrap();
        fetched.embedding = db.embed_text("quick brown fox").ok();
        db.storage.update_node_embedding(fetched.clone()).unwrap();
        db.search.index_node(&fetched);

        let hits = db.hybrid_search("quick fox", None, 5).unwrap();
        assert!(hits.iter().any(|h| h.node.id == node.id));
        db.close().await.unwrap();
    }
}
