//! End-to-end scenarios exercising the façade across storage, the
//! embedding worker, and search together.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use engramdb::model::{Edge, Node};
use engramdb::storage::{StorageEngine, WalEngine, WalMode};
use engramdb::value::{Properties, Value};

async fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    loop {
        if predicate() {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Scenario 1: create + embed + recall.
#[tokio::test]
async fn create_embed_and_recall() {
    let config = helpers::in_memory_config(4);
    let db = helpers::open(config);
    db.set_embedder(Arc::new(helpers::ConstantEmbedder::new(vec![1.0, 0.0, 0.0, 0.0])));

    let mut props = Properties::new();
    props.insert("content".into(), Value::from("hello"));
    let node = db.create_node(vec!["Memory".into()], props).unwrap();

    let settled = wait_until(
        || db.stats().map(|s| s.embedding.processed >= 1).unwrap_or(false),
        Duration::from_secs(5),
    )
    .await;
    assert!(settled, "embedding worker never processed the node");

    let fetched = db.get_node(&node.id).unwrap();
    assert_eq!(fetched.embedding, Some(vec![1.0, 0.0, 0.0, 0.0]));

    let hits = db.remember(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0.id, node.id);

    db.close().await.unwrap();
}

/// Scenario 2: chunk materialisation for long `File` content.
#[tokio::test]
async fn file_content_materialises_chunks() {
    let mut config = helpers::in_memory_config(8);
    config.embedding.chunk_size = 40;
    config.embedding.chunk_overlap = 10;
    let db = helpers::open(config);
    db.set_embedder(Arc::new(helpers::SequentialEmbedder::new(8)));

    let mut props = Properties::new();
    props.insert("content".into(), Value::from("x".repeat(200)));
    props.insert("name".into(), Value::from("notes.txt"));
    let file = db.create_node(vec!["File".into()], props).unwrap();

    let settled = wait_until(
        || db.stats().map(|s| s.embedding.processed >= 1).unwrap_or(false),
        Duration::from_secs(5),
    )
    .await;
    assert!(settled, "embedding worker never processed the file node");

    let parent = db.get_node(&file.id).unwrap();
    assert!(parent.embedding.is_none());
    assert_eq!(parent.properties.get("has_chunks"), Some(&Value::Bool(true)));

    let chunk_count = match parent.properties.get("chunk_count") {
        Some(Value::Int(n)) => *n,
        other => panic!("expected chunk_count to be an int, got {other:?}"),
    };
    assert!(chunk_count >= 4, "expected at least 4 chunks, got {chunk_count}");

    let out_edges = db.outgoing_edges(&file.id).unwrap();
    let chunk_edges: Vec<_> = out_edges.iter().filter(|e| e.edge_type == "HAS_CHUNK").collect();
    assert_eq!(chunk_edges.len(), chunk_count as usize);

    let mut vectors = Vec::new();
    for i in 0..chunk_count {
        let chunk_id = format!("{}-chunk-{}", file.id, i);
        let chunk = db.get_node(&chunk_id).unwrap();
        assert!(chunk.has_label("FileChunk"));
        vectors.push(chunk.embedding.expect("chunk must carry its own vector"));
    }
    let distinct: std::collections::HashSet<_> = vectors.iter().map(|v| format!("{v:?}")).collect();
    assert_eq!(distinct.len(), vectors.len(), "expected every chunk vector to differ");

    db.close().await.unwrap();
}

/// Scenario 3: a node with no embeddable content stops the worker from
/// re-firing on it.
#[tokio::test]
async fn no_content_node_is_marked_and_not_retried() {
    let config = helpers::in_memory_config(4);
    let db = helpers::open(config);
    db.set_embedder(Arc::new(helpers::ConstantEmbedder::new(vec![1.0, 0.0, 0.0, 0.0])));

    let mut props = Properties::new();
    props.insert("id".into(), Value::from("x"));
    props.insert("createdAt".into(), Value::from("2026-01-01"));
    let node = db.create_node(vec!["Memory".into()], props).unwrap();

    let marked = wait_until(
        || {
            db.get_node(&node.id)
                .map(|n| n.properties.get("embedding_skipped").is_some())
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(marked, "node was never marked as content-free");

    let fetched = db.get_node(&node.id).unwrap();
    assert_eq!(
        fetched.properties.get("embedding_skipped").and_then(Value::as_str),
        Some("no content")
    );
    assert!(fetched.embedding.is_none());

    let processed_before = db.stats().unwrap().embedding.processed;
    db.run_embedding_pass().await.unwrap();
    let processed_after = db.stats().unwrap().embedding.processed;
    assert_eq!(processed_before, processed_after, "a settled node must not be reprocessed");

    db.close().await.unwrap();
}

/// Scenario 4: WAL recovery after an ungraceful close, including a stale
/// `UpdateEmbedding` record left behind by a deleted node.
#[test]
fn wal_recovers_state_and_counts_stale_embedding_as_a_warning() {
    let dir = tempfile::tempdir().unwrap();

    {
        let engine = WalEngine::open(dir.path(), WalMode::SyncPerRecord, 1024 * 1024).unwrap();
        for id in ["n1", "n2", "n3"] {
            engine.create_node(Node::new(id, vec!["Memory".into()], Properties::new())).unwrap();
        }
        engine
            .create_edge(Edge::new("e1", "n1", "n2", "LINKS_TO", Properties::new(), 1.0))
            .unwrap();
        engine
            .create_edge(Edge::new("e2", "n2", "n3", "LINKS_TO", Properties::new(), 1.0))
            .unwrap();

        // A node deleted after its UpdateEmbedding record was already
        // appended, forcing replay to tolerate the now-stale reference.
        engine.create_node(Node::new("ghost", vec!["Memory".into()], Properties::new())).unwrap();
        engine.delete_node("ghost").unwrap();
        let mut ghost_embedding = Node::new("ghost", vec!["Memory".into()], Properties::new());
        ghost_embedding.embedding = Some(vec![1.0, 0.0]);
        assert!(engine.update_node_embedding(ghost_embedding).is_err());
        // Dropped without calling close(): simulates a crash.
    }

    let reopened = WalEngine::open(dir.path(), WalMode::SyncPerRecord, 1024 * 1024).unwrap();
    assert_eq!(reopened.node_count().unwrap(), 3);
    assert_eq!(reopened.edge_count().unwrap(), 2);
    for id in ["n1", "n2", "n3"] {
        assert!(reopened.get_node(id).is_ok());
    }
    assert_eq!(reopened.replay_warnings(), 1);

    reopened.close().unwrap();
}

/// Scenario 5: with async writes enabled, a create is visible to an
/// immediately following get before the flusher has run.
#[tokio::test]
async fn async_write_is_visible_before_flush() {
    let (mut config, _tmp) = helpers::test_config(4);
    config.async_writes.enabled = true;
    config.async_writes.flush_interval_ms = 1000;
    let db = helpers::open(config);

    let mut props = Properties::new();
    props.insert("content".into(), Value::from("async visibility"));
    let node = db.create_node(vec!["Memory".into()], props).unwrap();

    let fetched = db.get_node(&node.id).unwrap();
    assert_eq!(fetched.id, node.id);

    db.close().await.unwrap();
}

/// Scenario 6: hybrid search fuses a lexical-only top hit and a
/// vector-only top hit into one ranked list via RRF.
#[tokio::test]
async fn hybrid_search_fuses_lexical_and_vector_top_hits() {
    let config = helpers::in_memory_config(2);
    let db = helpers::open(config);
    db.set_embedder(Arc::new(helpers::ConstantEmbedder::new(vec![1.0, 0.0])));

    let mut a_props = Properties::new();
    a_props.insert("content".into(), Value::from("distinctive lexical phrase"));
    let mut node_a = Node::new("node-a", vec!["Memory".into()], a_props);
    node_a.embedding = Some(vec![0.0, 1.0]);
    db.import_node(node_a).unwrap();

    let mut b_props = Properties::new();
    b_props.insert("content".into(), Value::from("unrelated filler text"));
    let mut node_b = Node::new("node-b", vec!["Memory".into()], b_props);
    node_b.embedding = Some(vec![1.0, 0.0]);
    db.import_node(node_b).unwrap();

    // node-a wins BM25 (it's the only document sharing any query term);
    // node-b wins the vector leg (the query embeds to [1.0, 0.0], which is
    // node-b's own vector). Fusing both rankings must surface both nodes,
    // with node-a ranked first since it scores in both legs.
    let hits = db.hybrid_search("distinctive lexical phrase", None, 10).unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.node.id.as_str()).collect();
    assert!(ids.contains(&"node-a"));
    assert!(ids.contains(&"node-b"));
    assert_eq!(hits[0].node.id, "node-a");

    db.close().await.unwrap();
}
