//! Error taxonomy for grammar construction, matching and compilation
//!
//! All errors are deterministic input errors, raised synchronously where
//! they are detected. Nothing here is retryable.

use thiserror::Error;

/// Error type for grammar, layer and pattern failures
#[derive(Debug, Error)]
pub enum GrammarError {
    /// Structurally invalid grammar tree. `path` locates the node
    /// (e.g. `root.children[1]`).
    #[error("Malformed grammar at {path}: {message}")]
    MalformedGrammar { path: String, message: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("No such layer: {0}")]
    UnknownLayer(String),

    #[error("Offset {offset} out of range for layer {layer} (length {len})")]
    OffsetOutOfRange {
        layer: String,
        offset: usize,
        len: usize,
    },

    #[error("Token {index} out of range for layer {layer} ({count} tokens)")]
    TokenOutOfRange {
        layer: String,
        index: usize,
        count: usize,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl GrammarError {
    pub(crate) fn malformed(path: &str, message: impl Into<String>) -> Self {
        GrammarError::MalformedGrammar {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GrammarError>;
