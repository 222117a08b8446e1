//! Write-time inference of similarity edges from embedding proximity, and
//! the supplemented co-access edge proposal.
//!
//! Holds no reference to storage or the search service directly — only the
//! abstract [`SimilarityIndex`] capability the façade injects, keeping the
//! dependency one-way (inference never reaches back into the DB).

use crate::model::Edge;

/// The read-only capability inference needs: nearest neighbours by vector
/// similarity. Implemented by the search service; kept abstract so
/// inference cannot form a cycle back into storage.
pub trait SimilarityIndex: Send + Sync {
    fn find_similar(&self, node_id: &str, limit: usize) -> Vec<(String, f32)>;
}

/// Proposes `SIMILAR_TO` edges at write time, and `CO_ACCESSED_WITH` edges
/// when two nodes are recalled within the same window. Computation here
/// never fails — a caller wires the results into storage and may ignore
/// individual write errors without aborting the original operation.
pub struct InferenceEngine {
    similarity_threshold: f32,
    k: usize,
}

impl InferenceEngine {
    pub fn new(similarity_threshold: f32, k: usize) -> Self {
        InferenceEngine {
            similarity_threshold,
            k,
        }
    }

    /// Proposes similarity edges from `node_id` to its nearest neighbours
    /// in `index`, for every neighbour whose score exceeds the configured
    /// threshold.
    pub fn infer_similarity_edges(&self, node_id: &str, index: &dyn SimilarityIndex) -> Vec<Edge> {
        index
            .find_similar(node_id, self.k)
            .into_iter()
            .filter(|(_, score)| *score > self.similarity_threshold)
            .map(|(neighbor_id, score)| {
                Edge::inferred(
                    format!("{node_id}-similar-{neighbor_id}"),
                    node_id,
                    &neighbor_id,
                    "SIMILAR_TO",
                    score,
                    "embedding cosine similarity",
                    "vector",
                )
            })
            .collect()
    }

    /// Proposes `CO_ACCESSED_WITH` edges between `node_id` and every id in
    /// `co_accessed`, the nodes the co-access tracker observed recalled
    /// within the same window.
    pub fn infer_co_access_edges(&self, node_id: &str, co_accessed: &[String]) -> Vec<Edge> {
        co_accessed
            .iter()
            .filter(|other| other.as_str() != node_id)
            .map(|other| {
                Edge::inferred(
                    format!("{node_id}-co-accessed-{other}"),
                    node_id,
                    other,
                    "CO_ACCESSED_WITH",
                    1.0,
                    "recalled within the co-access window",
                    "co_access",
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeIndex(Vec<(String, f32)>);
    impl SimilarityIndex for FakeIndex {
        fn find_similar(&self, _node_id: &str, limit: usize) -> Vec<(String, f32)> {
            self.0.iter().take(limit).cloned().collect()
        }
    }

    #[test]
    fn only_neighbours_above_threshold_become_edges() {
        let engine = InferenceEngine::new(0.82, 10);
        let index = FakeIndex(vec![
            ("a".into(), 0.95),
            ("b".into(), 0.80),
            ("c".into(), 0.83),
        ]);
        let edges = engine.infer_similarity_edges("n1", &index);
        let targets: Vec<&str> = edges.iter().map(|e| e.end.as_str()).collect();
        assert_eq!(targets, vec!["a", "c"]);
        assert!(edges.iter().all(|e| e.auto_generated && e.edge_type == "SIMILAR_TO"));
    }

    #[test]
    fn co_access_edges_exclude_self() {
        let engine = InferenceEngine::new(0.82, 10);
        let edges = engine.infer_co_access_edges("n1", &["n1".into(), "n2".into()]);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].end, "n2");
        assert_eq!(edges[0].edge_type, "CO_ACCESSED_WITH");
    }
}
