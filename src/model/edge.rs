use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Properties;

/// A directed, typed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub start: String,
    pub end: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub properties: Properties,
    pub confidence: f32,
    pub auto_generated: bool,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// Confidence ≤0 or >1 is normalised to 1.0, per the edge invariant.
    pub fn new(
        id: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
        edge_type: impl Into<String>,
        properties: Properties,
        confidence: f32,
    ) -> Self {
        Edge {
            id: id.into(),
            start: start.into(),
            end: end.into(),
            edge_type: edge_type.into(),
            properties,
            confidence: clamp_confidence(confidence),
            auto_generated: false,
            created_at: Utc::now(),
        }
    }

    /// Builds an inference-engine-proposed edge, marked `auto_generated`.
    pub fn inferred(
        id: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
        edge_type: impl Into<String>,
        confidence: f32,
        reason: &str,
        method: &str,
    ) -> Self {
        let mut properties = Properties::new();
        properties.insert("reason".into(), reason.into());
        properties.insert("method".into(), method.into());
        let mut e = Edge::new(id, start, end, edge_type, properties, confidence);
        e.auto_generated = true;
        e
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.start == node_id || self.end == node_id
    }

    /// Given one endpoint, returns the id at the other end, if it touches.
    pub fn other_end(&self, node_id: &str) -> Option<&str> {
        if self.start == node_id {
            Some(&self.end)
        } else if self.end == node_id {
            Some(&self.start)
        } else {
            None
        }
    }
}

fn clamp_confidence(c: f32) -> f32 {
    if c <= 0.0 || c > 1.0 {
        1.0
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_out_of_range_normalises_to_one() {
        let e = Edge::new("e1", "a", "b", "LINKS_TO", Properties::new(), -0.5);
        assert_eq!(e.confidence, 1.0);
        let e2 = Edge::new("e2", "a", "b", "LINKS_TO", Properties::new(), 1.5);
        assert_eq!(e2.confidence, 1.0);
        let e3 = Edge::new("e3", "a", "b", "LINKS_TO", Properties::new(), 0.4);
        assert_eq!(e3.confidence, 0.4);
    }

    #[test]
    fn inferred_edge_is_flagged() {
        let e = Edge::inferred("e1", "a", "b", "SIMILAR_TO", 0.9, "embedding cosine", "vector");
        assert!(e.auto_generated);
        assert_eq!(e.properties.get("reason").unwrap().as_str(), Some("embedding cosine"));
    }

    #[test]
    fn other_end_resolves_either_direction() {
        let e = Edge::new("e1", "a", "b", "LINKS_TO", Properties::new(), 1.0);
        assert_eq!(e.other_end("a"), Some("b"));
        assert_eq!(e.other_end("b"), Some("a"));
        assert_eq!(e.other_end("c"), None);
    }
}
