//! Error taxonomy for the RAG pipeline.
//!
//! Each variant names the stage that failed. File- and chunk-level variants
//! ([`RagError::Load`], [`RagError::Validation`]) are absorbed and logged by
//! the batch operations that produce them; index, retrieval and generation
//! variants are returned to the caller because they decide whether the
//! user-visible answer is valid.

use std::time::Duration;

use thiserror::Error;

use crate::models::ChunkRef;

/// Errors produced by the core pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// One source file could not be read or its text could not be extracted.
    #[error("failed to load {source_name}: {message}")]
    Load {
        source_name: String,
        message: String,
    },

    /// A record is malformed (empty text, missing field, duplicate identity).
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid static configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Embedding or persistence failed while indexing. `completed` lists the
    /// chunks that were stored before the failure so a resumed run can skip them.
    #[error("indexing failed after {} stored chunk(s): {message}", completed.len())]
    Index {
        message: String,
        completed: Vec<ChunkRef>,
    },

    /// The index could not be queried.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// The embedding service rejected or failed a request.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The language model call failed (quota, network, malformed response).
    #[error("generation failed: {0}")]
    Generation(String),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// An external call was cancelled, e.g. by a conversation reset.
    #[error("{operation} was cancelled")]
    Cancelled { operation: &'static str },

    /// Translation failed. Callers fall back to the untranslated text.
    #[error("translation failed: {0}")]
    Translation(String),
}

impl RagError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn retrieval(msg: impl Into<String>) -> Self {
        Self::Retrieval(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Short machine-readable code, used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Load { .. } => "load_failed",
            RagError::Validation(_) => "bad_request",
            RagError::Config(_) => "config_error",
            RagError::Index { .. } => "index_failed",
            RagError::Retrieval(_) => "retrieval_failed",
            RagError::Embedding(_) => "embedding_failed",
            RagError::Generation(_) => "generation_failed",
            RagError::Timeout { .. } => "timeout",
            RagError::Cancelled { .. } => "cancelled",
            RagError::Translation(_) => "translation_failed",
        }
    }
}
