use std::collections::HashMap;

use unicode_segmentation::UnicodeSegmentation;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Lower-cased Unicode word tokens; no stemming, no stopword list, per the
/// decided baseline for lexical search.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

#[derive(Default)]
struct PostingList {
    /// doc id -> term frequency within that document
    postings: HashMap<String, u32>,
}

/// A BM25 inverted index over each node's concatenated textual properties.
/// Rebuilt from scratch at startup and updated incrementally thereafter.
#[derive(Default)]
pub struct Bm25Index {
    postings: HashMap<String, PostingList>,
    doc_lengths: HashMap<String, u32>,
    total_doc_length: u64,
    doc_count: u64,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes or re-indexes a document under `id`; a prior entry for the
    /// same id is removed first so updates don't double-count.
    pub fn index_document(&mut self, id: &str, text: &str) {
        self.remove_document(id);

        let tokens = tokenize(text);
        if tokens.is_empty() {
            return;
        }

        let mut term_freq: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freq.entry(token.clone()).or_insert(0) += 1;
        }

        for (term, freq) in term_freq {
            self.postings
                .entry(term)
                .or_default()
                .postings
                .insert(id.to_string(), freq);
        }

        self.doc_lengths.insert(id.to_string(), tokens.len() as u32);
        self.total_doc_length += tokens.len() as u64;
        self.doc_count += 1;
    }

    pub fn remove_document(&mut self, id: &str) {
        if let Some(len) = self.doc_lengths.remove(id) {
            self.total_doc_length = self.total_doc_length.saturating_sub(len as u64);
            self.doc_count = self.doc_count.saturating_sub(1);
        }
        self.postings.retain(|_, list| {
            list.postings.remove(id);
            !list.postings.is_empty()
        });
    }

    fn avg_doc_length(&self) -> f32 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.total_doc_length as f32 / self.doc_count as f32
        }
    }

    /// Scores every document containing at least one query term, filtered
    /// to `allowed` if given, ordered descending by score.
    pub fn search(&self, query: &str, allowed: Option<&[String]>, limit: usize) -> Vec<(String, f32)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.doc_count == 0 {
            return Vec::new();
        }

        let avg_len = self.avg_doc_length();
        let mut scores: HashMap<String, f32> = HashMap::new();

        for term in &query_terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let df = list.postings.len() as f32;
            let idf = ((self.doc_count as f32 - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (doc_id, &freq) in &list.postings {
                if let Some(allowed) = allowed {
                    if !allowed.iter().any(|a| a == doc_id) {
                        continue;
                    }
                }
                let doc_len = *self.doc_lengths.get(doc_id).unwrap_or(&0) as f32;
                let freq = freq as f32;
                let denom = freq + K1 * (1.0 - B + B * doc_len / avg_len.max(1.0));
                let score = idf * (freq * (K1 + 1.0)) / denom.max(f32::EPSILON);
                *scores.entry(doc_id.clone()).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(String, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_unicode_words() {
        let tokens = tokenize("Héllo, World! 42");
        assert_eq!(tokens, vec!["héllo", "world", "42"]);
    }

    #[test]
    fn search_ranks_exact_match_above_partial() {
        let mut index = Bm25Index::new();
        index.index_document("a", "the quick brown fox");
        index.index_document("b", "the quick brown fox jumps over the lazy dog");
        index.index_document("c", "cats and dogs");

        let results = index.search("quick fox", None, 10);
        assert!(!results.is_empty());
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn remove_document_drops_it_from_results() {
        let mut index = Bm25Index::new();
        index.index_document("a", "hello world");
        index.remove_document("a");
        assert!(index.search("hello", None, 10).is_empty());
    }

    #[test]
    fn reindexing_same_id_replaces_not_accumulates() {
        let mut index = Bm25Index::new();
        index.index_document("a", "alpha");
        index.index_document("a", "beta");
        assert!(index.search("alpha", None, 10).is_empty());
        assert!(!index.search("beta", None, 10).is_empty());
    }

    #[test]
    fn allowed_filter_restricts_results() {
        let mut index = Bm25Index::new();
        index.index_document("a", "shared term");
        index.index_document("b", "shared term");
        let results = index.search("shared", Some(&["a".to_string()]), 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "a");
    }
}
