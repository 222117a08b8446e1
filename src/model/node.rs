use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{strip_reserved, Properties, Value};

/// A labelled, propertied entity in the graph, optionally carrying a dense
/// vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub labels: Vec<String>,
    pub properties: Properties,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub decay_score: f32,
}

impl Node {
    /// Builds a new node with fresh timestamps and `embedding`/`embeddings`/
    /// `vector` property keys stripped, as required at the storage boundary.
    pub fn new(id: impl Into<String>, labels: Vec<String>, properties: Properties) -> Self {
        let now = Utc::now();
        Node {
            id: id.into(),
            labels,
            properties: strip_reserved(properties),
            embedding: None,
            created_at: now,
            updated_at: now,
            last_accessed: now,
            access_count: 0,
            decay_score: 1.0,
        }
    }

    /// Internal nodes (any label starting with `_`) are excluded from
    /// embedding discovery and from default enumeration.
    pub fn is_internal(&self) -> bool {
        self.labels.iter().any(|l| l.starts_with('_'))
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    /// `true` once this node has been flagged by the embedding worker as
    /// content-free, or the user has explicitly marked it done.
    pub fn embedding_settled(&self) -> bool {
        if self.has_embedding() {
            return true;
        }
        match self.properties.get("has_embedding") {
            Some(Value::Bool(true)) => return true,
            _ => {}
        }
        self.properties.contains_key("embedding_skipped")
    }

    /// Merges a patch into this node's properties (patch keys win),
    /// stripping reserved keys from the patch first. Bumps `updated_at`.
    pub fn apply_patch(&mut self, patch: Properties) {
        let patch = strip_reserved(patch);
        for (k, v) in patch {
            if v == Value::Null {
                self.properties.remove(&k);
            } else {
                self.properties.insert(k, v);
            }
        }
        self.updated_at = Utc::now();
    }

    /// Records an access: bumps the counter, refreshes `last_accessed`, and
    /// recomputes the decay score against a linear half-life model.
    pub fn record_access(&mut self, half_life_secs: f64) {
        let now = Utc::now();
        self.access_count += 1;
        self.last_accessed = now;
        self.decay_score = decay_at(self.created_at, now, half_life_secs, self.access_count);
    }

    /// Recomputes the decay score from elapsed time and the existing access
    /// count, without bumping it — used by the periodic decay sweep for
    /// nodes nobody is actively recalling.
    pub fn recompute_decay(&mut self, half_life_secs: f64) {
        self.decay_score = decay_at(self.created_at, Utc::now(), half_life_secs, self.access_count);
    }
}

/// Decay score in `[0, 1]`: exponential falloff from creation, nudged up by
/// each access so frequently-recalled nodes stay "hot" longer.
fn decay_at(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_secs: f64, access_count: u64) -> f32 {
    if half_life_secs <= 0.0 {
        return 1.0;
    }
    let age_secs = (now - created_at).num_seconds().max(0) as f64;
    let base = 0.5f64.powf(age_secs / half_life_secs);
    let boost = 1.0 - 0.5f64.powf(access_count as f64 / 4.0);
    (base + boost * (1.0 - base)).clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_strips_reserved_keys() {
        let mut props = Properties::new();
        props.insert("vector".into(), Value::Int(1));
        props.insert("title".into(), Value::from("hi"));
        let n = Node::new("n1", vec!["Memory".into()], props);
        assert!(!n.properties.contains_key("vector"));
        assert!(n.properties.contains_key("title"));
        assert_eq!(n.decay_score, 1.0);
        assert!(n.embedding.is_none());
    }

    #[test]
    fn internal_label_detected() {
        let n = Node::new("n1", vec!["_System".into()], Properties::new());
        assert!(n.is_internal());
        let n2 = Node::new("n2", vec!["Memory".into()], Properties::new());
        assert!(!n2.is_internal());
    }

    #[test]
    fn embedding_settled_tracks_markers() {
        let mut n = Node::new("n1", vec!["Memory".into()], Properties::new());
        assert!(!n.embedding_settled());
        n.properties.insert("embedding_skipped".into(), Value::from("no content"));
        assert!(n.embedding_settled());
    }

    #[test]
    fn patch_removes_null_and_updates_existing() {
        let mut n = Node::new("n1", vec![], Properties::new());
        let mut patch = Properties::new();
        patch.insert("title".into(), Value::from("new"));
        n.apply_patch(patch);
        assert_eq!(n.properties.get("title").unwrap().as_str(), Some("new"));

        let mut patch2 = Properties::new();
        patch2.insert("title".into(), Value::Null);
        n.apply_patch(patch2);
        assert!(!n.properties.contains_key("title"));
    }

    #[test]
    fn record_access_raises_decay_towards_one() {
        let mut n = Node::new("n1", vec![], Properties::new());
        n.decay_score = 0.1;
        n.record_access(3600.0);
        assert!(n.decay_score > 0.1);
        assert!(n.decay_score <= 1.0);
    }
}
