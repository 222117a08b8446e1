//! The pull-based background worker that discovers nodes lacking
//! embeddings, chunks their content, calls the embedder, and writes
//! results back — or materialises chunk nodes for long `File` content.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::Error as DbError;
use crate::model::{Edge, Node};
use crate::storage::StorageEngine;
use crate::value::{Properties, Value};

use super::{EmbedError, Embedder};

const REENTRANCY_WINDOW: Duration = Duration::from_secs(30);
const REENTRANCY_GC_AGE: Duration = Duration::from_secs(60);

const PRIORITY_KEYS: [&str; 9] = [
    "title",
    "content",
    "description",
    "name",
    "text",
    "body",
    "summary",
    "path",
    "host_path",
];

/// A bounded substring of source text, with its byte offsets in the
/// original string.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Concatenates a node's textual properties into one embeddable string,
/// per the priority-key ordering. Returns an empty string when there is
/// nothing embeddable.
pub fn build_embedding_text(properties: &Properties) -> String {
    let mut parts = Vec::new();

    for key in PRIORITY_KEYS {
        if let Some(value) = properties.get(key).and_then(Value::as_str) {
            if !value.is_empty() {
                parts.push(value.to_string());
            }
        }
    }
    if let Some(kind) = properties.get("type").and_then(Value::as_str) {
        parts.push(format!("Type: {kind}"));
    }
    if let Some(tags) = properties.get("tags").and_then(Value::as_list) {
        let joined: Vec<&str> = tags.iter().filter_map(Value::as_str).collect();
        if !joined.is_empty() {
            parts.push(format!("Tags: {}", joined.join(", ")));
        }
    }
    if let Some(reasoning) = properties.get("reasoning").and_then(Value::as_str) {
        parts.push(reasoning.to_string());
    }

    parts.join("\n\n")
}

/// Splits `text` into chunks of at most `size` bytes, sliding forward with
/// an `overlap`-byte repeat between consecutive chunks. Each non-final cut
/// point is rounded back to the nearest natural boundary in the right half
/// of its window, preferring a paragraph break, then a sentence break,
/// then a word break. Guarantees forward progress.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    let size = size.max(1);
    if text.len() <= size {
        return vec![Chunk {
            text: text.to_string(),
            start: 0,
            end: text.len(),
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let mut end = (start + size).min(text.len());

        if end < text.len() {
            let search_start = start + size / 2;
            if search_start < end && text.is_char_boundary(search_start) {
                let window = &text[search_start..end];
                if let Some(pos) = window.rfind("\n\n") {
                    end = search_start + pos + 2;
                } else if let Some(pos) = window.rfind(". ") {
                    end = search_start + pos + 2;
                } else if let Some(pos) = window.rfind(' ') {
                    end = search_start + pos + 1;
                }
            }
        }
        while !text.is_char_boundary(end) {
            end -= 1;
        }

        chunks.push(Chunk {
            text: text[start..end].to_string(),
            start,
            end,
        });

        if end >= text.len() {
            break;
        }

        let next_start = if end > overlap && end - overlap > start {
            end - overlap
        } else {
            end
        };
        start = next_start;
    }

    chunks
}

fn average_vectors(vectors: &[Vec<f32>]) -> Vec<f32> {
    if vectors.len() == 1 {
        return vectors[0].clone();
    }
    let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
    let mut sum = vec![0f32; dim];
    for vector in vectors {
        for (slot, value) in sum.iter_mut().zip(vector) {
            *slot += value;
        }
    }
    let n = vectors.len().max(1) as f32;
    for slot in &mut sum {
        *slot /= n;
    }
    sum
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerStats {
    pub running: bool,
    pub processed: u64,
    pub failed: u64,
}

struct WorkerState {
    running: bool,
    processed: u64,
    failed: u64,
    closed: bool,
    recently_processed: HashMap<String, Instant>,
    logged_skip: HashSet<String>,
}

pub type EmbeddedCallback = dyn Fn(&str) + Send + Sync;

/// Single background task ensuring every non-internal node with
/// embeddable content eventually carries a vector embedding.
pub struct EmbeddingWorker {
    storage: Arc<dyn StorageEngine>,
    embedder: RwLock<Option<Arc<dyn Embedder>>>,
    config: EmbeddingConfig,
    state: Mutex<WorkerState>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
    stop: Arc<Notify>,
    on_embedded: Option<Arc<EmbeddedCallback>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EmbeddingWorker {
    pub fn new(
        storage: Arc<dyn StorageEngine>,
        config: EmbeddingConfig,
        on_embedded: Option<Arc<EmbeddedCallback>>,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        EmbeddingWorker {
            storage,
            embedder: RwLock::new(None),
            config,
            state: Mutex::new(WorkerState {
                running: false,
                processed: 0,
                failed: 0,
                closed: false,
                recently_processed: HashMap::new(),
                logged_skip: HashSet::new(),
            }),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            stop: Arc::new(Notify::new()),
            on_embedded,
            handle: Mutex::new(None),
        }
    }

    /// Attaches the embedder capability and starts the background task if
    /// it isn't already running. The façade calls this once an embedder is
    /// available; before that, the worker exists but never wakes.
    pub fn set_embedder(self: &Arc<Self>, embedder: Arc<dyn Embedder>) {
        *self.embedder.write().expect("embedder lock poisoned") = Some(embedder);
        self.start();
    }

    fn start(self: &Arc<Self>) {
        let mut handle_guard = self.handle.lock().expect("handle lock poisoned");
        if handle_guard.is_some() {
            return;
        }
        let mut rx = match self.trigger_rx.lock().expect("trigger lock poisoned").take() {
            Some(rx) => rx,
            None => return,
        };
        let worker = self.clone();
        let stop = self.stop.clone();
        let scan_interval = Duration::from_secs(self.config.scan_interval_secs.max(1));

        let join = tokio::spawn(async move {
            worker.state.lock().expect("state lock poisoned").running = true;
            let mut ticker = tokio::time::interval(scan_interval);
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        worker.process_until_empty().await;
                    }
                    Some(()) = rx.recv() => {
                        worker.process_until_empty().await;
                    }
                }
            }
            worker.state.lock().expect("state lock poisoned").running = false;
        });

        *handle_guard = Some(join);
    }

    /// Wakes the worker. A no-op once closed or if a wake is already
    /// queued (the trigger channel has capacity 1).
    pub fn trigger(&self) {
        if self.state.lock().expect("state lock poisoned").closed {
            return;
        }
        let _ = self.trigger_tx.try_send(());
    }

    pub fn stats(&self) -> WorkerStats {
        let state = self.state.lock().expect("state lock poisoned");
        WorkerStats {
            running: state.running,
            processed: state.processed,
            failed: state.failed,
        }
    }

    /// Sets the closed flag (further triggers are no-ops), stops the
    /// background task, and joins it.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.stop.notify_one();
        let handle = self.handle.lock().expect("handle lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Repeatedly processes one candidate until none remain.
    pub async fn process_until_empty(&self) {
        loop {
            if self.state.lock().expect("state lock poisoned").closed {
                return;
            }
            if !self.process_next_batch().await {
                return;
            }
            if self.config.inter_node_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.inter_node_delay_ms)).await;
            }
        }
    }

    /// Handles exactly one candidate node. Returns `true` if there was
    /// work to do (caller keeps looping), `false` otherwise.
    async fn process_next_batch(&self) -> bool {
        self.gc_recently_processed();

        let candidate = match self.next_candidate() {
            Some(node) => node,
            None => return false,
        };

        let embedder = match self.embedder.read().expect("embedder lock poisoned").clone() {
            Some(embedder) => embedder,
            None => return false,
        };

        {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.recently_processed.insert(candidate.id.clone(), Instant::now());
        }

        let text = build_embedding_text(&candidate.properties);
        if text.is_empty() {
            self.mark_no_content(&candidate);
            return true;
        }

        let chunks = chunk_text(&text, self.config.chunk_size, self.config.chunk_overlap);

        if candidate.has_label("File") && chunks.len() > 1 {
            self.materialize_chunks(&candidate, &chunks, embedder.as_ref()).await;
        } else {
            self.embed_direct(&candidate, &chunks, embedder.as_ref()).await;
        }

        true
    }

    fn gc_recently_processed(&self) {
        let mut state = self.state.lock().expect("state lock poisoned");
        state.recently_processed.retain(|_, ts| ts.elapsed() < REENTRANCY_GC_AGE);
        let WorkerState { recently_processed, logged_skip, .. } = &mut *state;
        logged_skip.retain(|id| recently_processed.contains_key(id));
    }

    /// Discovery via the storage fast path, filtered by the re-entrancy
    /// guard: a node handled within the last 30s is treated as no work
    /// this pass, since it may simply not be durably visible yet.
    fn next_candidate(&self) -> Option<Node> {
        let node = self.storage.find_node_needing_embedding().ok().flatten()?;

        let mut state = self.state.lock().expect("state lock poisoned");
        if let Some(ts) = state.recently_processed.get(&node.id) {
            if ts.elapsed() < REENTRANCY_WINDOW {
                if state.logged_skip.insert(node.id.clone()) {
                    drop(state);
                    debug!("node {} skipped, waiting for sync", node.id);
                }
                return None;
            }
        }
        Some(node)
    }

    fn mark_no_content(&self, candidate: &Node) {
        let mut updated = candidate.clone();
        updated.properties.insert("has_embedding".into(), Value::Bool(false));
        updated
            .properties
            .insert("embedding_skipped".into(), Value::from("no content"));
        if let Err(err) = self.storage.update_node(updated) {
            warn!("failed to mark node {} as content-free: {err}", candidate.id);
        }
    }

    async fn embed_with_retry(&self, chunks: &[Chunk], embedder: &dyn Embedder) -> Result<Vec<Vec<f32>>, EmbedError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut attempt = 0u32;
        loop {
            match embedder.embed_batch(&texts) {
                Ok(vectors) => {
                    let expected = embedder.dimensions();
                    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                        return Err(EmbedError::DimensionMismatch {
                            expected,
                            got: bad.len(),
                        });
                    }
                    return Ok(vectors);
                }
                Err(err) => {
                    attempt += 1;
                    if !err.is_retryable() || attempt > self.config.max_retries {
                        return Err(err);
                    }
                    tokio::time::sleep(Duration::from_secs(attempt as u64 * 2)).await;
                }
            }
        }
    }

    async fn embed_direct(&self, candidate: &Node, chunks: &[Chunk], embedder: &dyn Embedder) {
        match self.embed_with_retry(chunks, embedder).await {
            Ok(vectors) => {
                let vector = average_vectors(&vectors);
                let mut updated = candidate.clone();
                updated.embedding = Some(vector);
                updated
                    .properties
                    .insert("embedding_model".into(), Value::from(embedder.model_name().to_string()));
                updated
                    .properties
                    .insert("embedding_dimensions".into(), Value::Int(embedder.dimensions() as i64));
                updated.properties.insert("has_embedding".into(), Value::Bool(true));
                updated
                    .properties
                    .insert("embedded_at".into(), Value::from(chrono::Utc::now().to_rfc3339()));
                if chunks.len() > 1 {
                    updated
                        .properties
                        .insert("embedding_chunks".into(), Value::Int(chunks.len() as i64));
                }

                if let Err(err) = self.storage.update_node_embedding(updated) {
                    warn!("failed to write back embedding for {}: {err}", candidate.id);
                    self.record_failure();
                    return;
                }
                self.record_success();
                if let Some(callback) = &self.on_embedded {
                    callback(&candidate.id);
                }
            }
            Err(err) => {
                warn!("embedding failed for {}: {err}", candidate.id);
                self.record_failure();
            }
        }
    }

    async fn materialize_chunks(&self, candidate: &Node, chunks: &[Chunk], embedder: &dyn Embedder) {
        let vectors = match self.embed_with_retry(chunks, embedder).await {
            Ok(vectors) => vectors,
            Err(err) => {
                warn!("chunk embedding failed for {}: {err}", candidate.id);
                self.record_failure();
                return;
            }
        };

        let total = chunks.len();
        let file_path = candidate
            .properties
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let file_name = candidate
            .properties
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        for (i, (chunk, vector)) in chunks.iter().zip(vectors.into_iter()).enumerate() {
            let chunk_id = format!("{}-chunk-{}", candidate.id, i);

            let mut props = Properties::new();
            props.insert("chunk_index".into(), Value::Int(i as i64));
            props.insert("text".into(), Value::from(chunk.text.clone()));
            props.insert("start_offset".into(), Value::Int(chunk.start as i64));
            props.insert("end_offset".into(), Value::Int(chunk.end as i64));
            props.insert("embedding_model".into(), Value::from(embedder.model_name().to_string()));
            props.insert("embedding_dimensions".into(), Value::Int(embedder.dimensions() as i64));
            props.insert("total_chunks".into(), Value::Int(total as i64));
            props.insert("has_next".into(), Value::Bool(i + 1 < total));
            props.insert("has_prev".into(), Value::Bool(i > 0));
            props.insert("parent_file_id".into(), Value::from(candidate.id.clone()));
            props.insert("filePath".into(), Value::from(file_path.clone()));
            props.insert("fileName".into(), Value::from(file_name.clone()));

            let mut chunk_node = Node::new(chunk_id.clone(), vec!["FileChunk".into(), "Node".into()], props);
            chunk_node.embedding = Some(vector);

            if let Err(err) = self.upsert_node(chunk_node) {
                warn!("failed to materialise chunk {chunk_id}: {err}");
                continue;
            }

            let mut edge_props = Properties::new();
            edge_props.insert("index".into(), Value::Int(i as i64));
            let edge = Edge::new(
                format!("{chunk_id}-edge"),
                candidate.id.clone(),
                chunk_id.clone(),
                "HAS_CHUNK",
                edge_props,
                1.0,
            );
            if let Err(err) = self.upsert_edge(edge) {
                warn!("failed to link chunk {chunk_id}: {err}");
            }
        }

        let mut parent = candidate.clone();
        parent.properties.insert("has_chunks".into(), Value::Bool(true));
        parent.properties.insert("chunk_count".into(), Value::Int(total as i64));
        parent.properties.insert("has_embedding".into(), Value::Bool(true));
        parent.embedding = None;

        if let Err(err) = self.storage.update_node(parent) {
            warn!("failed to finalise parent file node {}: {err}", candidate.id);
            self.record_failure();
            return;
        }
        self.record_success();
        if let Some(callback) = &self.on_embedded {
            callback(&candidate.id);
        }
    }

    fn upsert_node(&self, node: Node) -> crate::error::Result<()> {
        match self.storage.update_node(node.clone()) {
            Err(DbError::NotFound { .. }) => self.storage.create_node(node),
            other => other,
        }
    }

    fn upsert_edge(&self, edge: Edge) -> crate::error::Result<()> {
        match self.storage.update_edge(edge.clone()) {
            Err(DbError::NotFound { .. }) => self.storage.create_edge(edge),
            other => other,
        }
    }

    fn record_success(&self) {
        self.state.lock().expect("state lock poisoned").processed += 1;
    }

    fn record_failure(&self) {
        self.state.lock().expect("state lock poisoned").failed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("hello world", 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 11);
    }

    #[test]
    fn long_text_splits_with_bounded_overlap() {
        let text = "a".repeat(90) + " " + &"b".repeat(90);
        let chunks = chunk_text(&text, 40, 10);
        assert!(chunks.len() > 1);
        for window in chunks.windows(2) {
            assert!(window[0].end <= window[1].start + 10);
            assert!(window[1].start < window[1].end);
        }
    }

    #[test]
    fn forward_progress_is_guaranteed() {
        let text = "x".repeat(500);
        let chunks = chunk_text(&text, 40, 39);
        let mut last_start = None;
        for chunk in &chunks {
            if let Some(prev) = last_start {
                assert!(chunk.start > prev);
            }
            last_start = Some(chunk.start);
        }
    }

    #[test]
    fn build_embedding_text_orders_by_priority_and_appends_type_tags() {
        let mut props = Properties::new();
        props.insert("content".into(), Value::from("body text"));
        props.insert("title".into(), Value::from("Title"));
        props.insert("type".into(), Value::from("note"));
        props.insert(
            "tags".into(),
            Value::List(vec![Value::from("a"), Value::from("b")]),
        );

        let text = build_embedding_text(&props);
        assert!(text.starts_with("Title\n\nbody text"));
        assert!(text.contains("Type: note"));
        assert!(text.contains("Tags: a, b"));
    }

    #[test]
    fn build_embedding_text_empty_for_no_content() {
        let mut props = Properties::new();
        props.insert("id".into(), Value::from("x"));
        assert!(build_embedding_text(&props).is_empty());
    }
}
