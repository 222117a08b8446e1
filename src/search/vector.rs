use std::collections::HashMap;

/// Cosine similarity of two equal-length vectors. Returns `0.0` for
/// mismatched lengths, empty inputs, or either vector being all-zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A size-bounded, score-sorted accumulator: a candidate is inserted only
/// if it beats the current worst kept item, avoiding materialising every
/// similarity before ranking.
struct TopK {
    k: usize,
    items: Vec<(String, f32)>,
}

impl TopK {
    fn new(k: usize) -> Self {
        TopK {
            k: k.max(1),
            items: Vec::new(),
        }
    }

    fn offer(&mut self, id: String, score: f32) {
        if self.items.len() < self.k {
            let pos = self.items.partition_point(|(_, s)| *s > score);
            self.items.insert(pos, (id, score));
            return;
        }
        if let Some(&(_, worst)) = self.items.last() {
            if score > worst {
                self.items.pop();
                let pos = self.items.partition_point(|(_, s)| *s > score);
                self.items.insert(pos, (id, score));
            }
        }
    }

    fn into_vec(self) -> Vec<(String, f32)> {
        self.items
    }
}

/// A flat list of `(id, vector)` pairs; nearest-k computed by cosine
/// similarity. Rebuilt from scratch at startup and updated incrementally
/// on every node create/update.
#[derive(Default)]
pub struct VectorIndex {
    vectors: HashMap<String, Vec<f32>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, id: &str, vector: Vec<f32>) {
        self.vectors.insert(id.to_string(), vector);
    }

    pub fn remove(&mut self, id: &str) {
        self.vectors.remove(id);
    }

    pub fn get(&self, id: &str) -> Option<&Vec<f32>> {
        self.vectors.get(id)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Nearest `k` by cosine similarity, optionally excluding one id and
    /// restricting to an `allowed` label-filtered set.
    pub fn k_nearest(
        &self,
        query: &[f32],
        k: usize,
        exclude: Option<&str>,
        allowed: Option<&[String]>,
    ) -> Vec<(String, f32)> {
        let mut top = TopK::new(k);
        for (id, vector) in &self.vectors {
            if Some(id.as_str()) == exclude {
                continue;
            }
            if let Some(allowed) = allowed {
                if !allowed.iter().any(|a| a == id) {
                    continue;
                }
            }
            top.offer(id.clone(), cosine_similarity(query, vector));
        }
        top.into_vec()
    }
}
