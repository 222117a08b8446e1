//! Library error type.
//!
//! Every public operation documents which of these kinds it may return.
//! Outer layers (the CLI) wrap these in `anyhow` for display.

use thiserror::Error;

/// The error kinds the engine can surface, per the error-handling design.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database is closed")]
    Closed,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("corrupt state: {0}")]
    Corrupt(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn duplicate(kind: &'static str, id: impl Into<String>) -> Self {
        Error::Duplicate {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// `true` for kinds a caller may reasonably retry (I/O or embedder hiccups).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
