use serde::{Deserialize, Serialize};

use super::Node;
use crate::value::{Properties, Value};

/// The three memory tiers callers use to classify a stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryTier {
    Episodic,
    Semantic,
    Procedural,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Episodic => "EPISODIC",
            MemoryTier::Semantic => "SEMANTIC",
            MemoryTier::Procedural => "PROCEDURAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EPISODIC" => Some(MemoryTier::Episodic),
            "SEMANTIC" => Some(MemoryTier::Semantic),
            "PROCEDURAL" => Some(MemoryTier::Procedural),
            _ => None,
        }
    }
}

/// A convenience projection of `Node` for the memory API: the subset of
/// properties most callers of `store`/`recall` care about, under the
/// `Memory` label.
#[derive(Debug, Clone)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub title: Option<String>,
    pub tier: MemoryTier,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl Memory {
    pub fn new(content: impl Into<String>, tier: MemoryTier) -> Self {
        Memory {
            id: String::new(),
            content: content.into(),
            title: None,
            tier,
            tags: Vec::new(),
            source: None,
            embedding: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Renders this memory as a property map suitable for `create_node`
    /// under the `Memory` label. The `embedding` field is intentionally
    /// omitted: embeddings are engine-managed and enter through the
    /// dedicated embedding path, never through a user-supplied property.
    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("content".into(), Value::from(self.content.clone()));
        if let Some(title) = &self.title {
            props.insert("title".into(), Value::from(title.clone()));
        }
        props.insert("tier".into(), Value::from(self.tier.as_str()));
        if !self.tags.is_empty() {
            props.insert(
                "tags".into(),
                Value::List(self.tags.iter().map(|t| Value::from(t.clone())).collect()),
            );
        }
        if let Some(source) = &self.source {
            props.insert("source".into(), Value::from(source.clone()));
        }
        props
    }

    /// Projects a `Memory`-labelled node back into this view. Returns
    /// `None` if the node lacks a `content` string or a recognisable tier.
    pub fn from_node(node: &Node) -> Option<Self> {
        if !node.has_label("Memory") {
            return None;
        }
        let content = node.properties.get("content")?.as_str()?.to_string();
        let tier = node
            .properties
            .get("tier")
            .and_then(Value::as_str)
            .and_then(MemoryTier::parse)
            .unwrap_or(MemoryTier::Episodic);
        let title = node
            .properties
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        let source = node
            .properties
            .get("source")
            .and_then(Value::as_str)
            .map(str::to_string);
        let tags = node
            .properties
            .get("tags")
            .and_then(Value::as_list)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        Some(Memory {
            id: node.id.clone(),
            content,
            title,
            tier,
            tags,
            source,
            embedding: node.embedding.clone(),
        })
    }
}
