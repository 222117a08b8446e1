//! The hybrid search service: a BM25 lexical index and a flat vector
//! index over all nodes, combined through reciprocal-rank fusion.

mod bm25;
mod vector;

pub use bm25::{tokenize, Bm25Index};
pub use vector::{cosine_similarity, VectorIndex};

use std::sync::RwLock;

use crate::inference::SimilarityIndex;
use crate::model::Node;

const DEFAULT_RRF_K: f32 = 60.0;

/// One hybrid-search hit: the fused score plus the individual ranks it
/// came from, so callers can see how a result was found.
#[derive(Debug, Clone)]
pub struct HybridResult {
    pub id: String,
    pub rrf_score: f32,
    pub bm25_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

/// Concatenates a node's textual property values for lexical indexing.
fn searchable_text(node: &Node) -> String {
    let mut parts: Vec<String> = node.properties.values().filter_map(|v| v.as_text()).collect();
    parts.extend(node.labels.iter().cloned());
    parts.join(" ")
}

/// Maintains the BM25 and vector indexes over all nodes; rebuilt from
/// scratch at startup (after WAL recovery) and updated incrementally on
/// every node create/update.
pub struct SearchService {
    bm25: RwLock<Bm25Index>,
    vectors: RwLock<VectorIndex>,
    rrf_k: f32,
}

impl Default for SearchService {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchService {
    pub fn new() -> Self {
        SearchService {
            bm25: RwLock::new(Bm25Index::new()),
            vectors: RwLock::new(VectorIndex::new()),
            rrf_k: DEFAULT_RRF_K,
        }
    }

    /// Rebuilds both indexes from scratch over the given node set. Internal
    /// (`_`-prefixed-label) nodes are excluded, matching default
    /// enumeration elsewhere.
    pub fn rebuild(&self, nodes: &[Node]) {
        let mut bm25 = Bm25Index::new();
        let mut vectors = VectorIndex::new();
        for node in nodes {
            if node.is_internal() {
                continue;
            }
            let text = searchable_text(node);
            if !text.is_empty() {
                bm25.index_document(&node.id, &text);
            }
            if let Some(vector) = &node.embedding {
                vectors.upsert(&node.id, vector.clone());
            }
        }
        *self.bm25.write().expect("bm25 lock poisoned") = bm25;
        *self.vectors.write().expect("vector lock poisoned") = vectors;
    }

    /// Incrementally indexes one node after a create or update.
    pub fn index_node(&self, node: &Node) {
        if node.is_internal() {
            self.remove_node(&node.id);
            return;
        }
        let text = searchable_text(node);
        {
            let mut bm25 = self.bm25.write().expect("bm25 lock poisoned");
            if text.is_empty() {
                bm25.remove_document(&node.id);
            } else {
                bm25.index_document(&node.id, &text);
            }
        }
        let mut vectors = self.vectors.write().expect("vector lock poisoned");
        match &node.embedding {
            Some(vector) => vectors.upsert(&node.id, vector.clone()),
            None => vectors.remove(&node.id),
        }
    }

    pub fn remove_node(&self, id: &str) {
        self.bm25.write().expect("bm25 lock poisoned").remove_document(id);
        self.vectors.write().expect("vector lock poisoned").remove(id);
    }

    /// Pure BM25 search, filtered to `allowed` ids if given.
    pub fn search(&self, query: &str, allowed: Option<&[String]>, limit: usize) -> Vec<(String, f32)> {
        self.bm25.read().expect("bm25 lock poisoned").search(query, allowed, limit)
    }

    /// Cosine k-NN of `node_id`'s own embedding against all others,
    /// excluding itself. Empty if the node has no vector.
    pub fn find_similar(&self, node_id: &str, limit: usize) -> Vec<(String, f32)> {
        let vectors = self.vectors.read().expect("vector lock poisoned");
        let Some(query) = vectors.get(node_id).cloned() else {
            return Vec::new();
        };
        vectors.k_nearest(&query, limit, Some(node_id), None)
    }

    /// Cosine k-NN against an arbitrary query vector (not necessarily a
    /// stored node's own embedding) — the `remember` entry point.
    pub fn query_vector(&self, query: &[f32], limit: usize) -> Vec<(String, f32)> {
        self.vectors.read().expect("vector lock poisoned").k_nearest(query, limit, None, None)
    }

    /// Reciprocal-Rank Fusion over the lexical and vector rankings.
    /// `rrf_score(r) = sum(1 / (k + rank_i(r)))` across whichever rankings
    /// `r` appears in; ordered by fused score descending, ties broken by
    /// the better (lower) individual rank, then by id for full symmetry.
    pub fn hybrid_search(
        &self,
        query: &str,
        query_vector: &[f32],
        allowed: Option<&[String]>,
        limit: usize,
    ) -> Vec<HybridResult> {
        let pool = (limit.max(1) * 5).max(50);

        let bm25_results = self.bm25.read().expect("bm25 lock poisoned").search(query, allowed, pool);
        let vector_results = self
            .vectors
            .read()
            .expect("vector lock poisoned")
            .k_nearest(query_vector, pool, None, allowed);

        let mut bm25_ranks = std::collections::HashMap::new();
        let mut vector_ranks = std::collections::HashMap::new();
        let mut scores: std::collections::HashMap<String, f32> = std::collections::HashMap::new();

        for (rank, (id, _)) in bm25_results.into_iter().enumerate() {
            let r = rank + 1;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (self.rrf_k + r as f32);
            bm25_ranks.insert(id, r);
        }
        for (rank, (id, _)) in vector_results.into_iter().enumerate() {
            let r = rank + 1;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (self.rrf_k + r as f32);
            vector_ranks.insert(id, r);
        }

        let mut results: Vec<HybridResult> = scores
            .into_iter()
            .map(|(id, rrf_score)| {
                let bm25_rank = bm25_ranks.get(&id).copied();
                let vector_rank = vector_ranks.get(&id).copied();
                HybridResult {
                    id,
                    rrf_score,
                    bm25_rank,
                    vector_rank,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.rrf_score
                .partial_cmp(&a.rrf_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let a_best = [a.bm25_rank, a.vector_rank].into_iter().flatten().min();
                    let b_best = [b.bm25_rank, b.vector_rank].into_iter().flatten().min();
                    a_best.cmp(&b_best)
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(limit);
        results
    }
}

impl SimilarityIndex for SearchService {
    fn find_similar(&self, node_id: &str, limit: usize) -> Vec<(String, f32)> {
        SearchService::find_similar(self, node_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Properties;

    fn node_with(id: &str, content: &str, embedding: Option<Vec<f32>>) -> Node {
        let mut props = Properties::new();
        props.insert("content".into(), content.into());
        let mut n = Node::new(id, vec!["Memory".into()], props);
        n.embedding = embedding;
        n
    }

    #[test]
    fn internal_nodes_are_excluded_from_rebuild() {
        let service = SearchService::new();
        let mut internal = Node::new("i1", vec!["_System".into()], Properties::new());
        internal.embedding = Some(vec![1.0, 0.0]);
        let visible = node_with("n1", "hello world", Some(vec![1.0, 0.0]));
        service.rebuild(&[internal, visible]);

        assert!(service.search("hello", None, 10).iter().any(|(id, _)| id == "n1"));
        assert!(service.find_similar("i1", 5).is_empty());
    }

    #[test]
    fn hybrid_search_fuses_lexical_and_vector_rankings() {
        let service = SearchService::new();
        let a = node_with("a", "quick brown fox", Some(vec![1.0, 0.0]));
        let b = node_with("b", "lazy dog sleeps", Some(vec![0.0, 1.0]));
        service.rebuild(&[a, b]);

        let results = service.hybrid_search("quick fox", &[1.0, 0.0], None, 10);
        assert_eq!(results[0].id, "a");
        assert!(results[0].bm25_rank.is_some());
        assert!(results[0].vector_rank.is_some());
    }

    #[test]
    fn remove_node_drops_it_from_both_indexes() {
        let service = SearchService::new();
        service.rebuild(&[node_with("a", "hello", Some(vec![1.0]))]);
        service.remove_node("a");
        assert!(service.search("hello", None, 10).is_empty());
        assert!(service.find_similar("a", 5).is_empty());
    }
}
