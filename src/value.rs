//! Dynamically-typed property values.
//!
//! The source system this engine is modeled on treats node/edge properties
//! as heterogeneous maps. Rather than carry that dynamism as untyped JSON
//! everywhere, properties are a tagged value variant matched explicitly at
//! each use site.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A property value: the closed set of types a node or edge property can hold.
///
/// `Map` uses a `BTreeMap` (not `HashMap`) so that serialized property
/// payloads — in particular WAL records — have a deterministic byte
/// representation, which keeps checksums stable across identical writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// A node or edge property map.
pub type Properties = BTreeMap<String, Value>;

/// Property keys reserved for engine-managed embedding storage; stripped
/// from any user-supplied property map at the boundary.
pub const RESERVED_KEYS: [&str; 3] = ["embedding", "embeddings", "vector"];

/// Remove engine-reserved keys from a user-supplied property map.
pub fn strip_reserved(mut props: Properties) -> Properties {
    for key in RESERVED_KEYS {
        props.remove(key);
    }
    props
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Renders a value as display text for full-text indexing purposes.
    /// Lists of strings are space-joined; other composite types are skipped.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::List(items) => {
                let strs: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
                if strs.is_empty() {
                    None
                } else {
                    Some(strs.join(" "))
                }
            }
            Value::Null | Value::Bytes(_) | Value::Map(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}
