//! Core data models that flow through the loading, indexing, retrieval and
//! conversation stages.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RagError;

/// Text of one source file, as extracted at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub id: String,
    pub source_name: String,
    pub full_text: String,
    pub language: Option<String>,
}

impl RawDocument {
    /// Build a document. The id is derived from `source_name`, so loading the
    /// same file twice yields the same id.
    pub fn new(
        source_name: impl Into<String>,
        full_text: impl Into<String>,
        language: Option<String>,
    ) -> Result<Self, RagError> {
        let source_name = source_name.into();
        if source_name.trim().is_empty() {
            return Err(RagError::validation("document source name is empty"));
        }
        Ok(Self {
            id: document_id_for(&source_name),
            source_name,
            full_text: full_text.into(),
            language,
        })
    }
}

/// Deterministic document id: first 16 hex chars of SHA-256(source name).
pub fn document_id_for(source_name: &str) -> String {
    let mut id = hash_text(source_name);
    id.truncate(16);
    id
}

/// SHA-256 hex digest of `text`.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The documents of one load batch. Source names are unique within a set.
#[derive(Debug, Clone, Default)]
pub struct DocumentSet {
    documents: Vec<RawDocument>,
    names: HashSet<String>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document, rejecting a second document with the same source name.
    pub fn insert(&mut self, doc: RawDocument) -> Result<(), RagError> {
        if !self.names.insert(doc.source_name.clone()) {
            return Err(RagError::validation(format!(
                "duplicate source name in batch: {}",
                doc.source_name
            )));
        }
        self.documents.push(doc);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RawDocument> {
        self.documents.iter()
    }

    pub fn as_slice(&self) -> &[RawDocument] {
        &self.documents
    }

    pub fn into_vec(self) -> Vec<RawDocument> {
        self.documents
    }
}

/// A contiguous window of a document's text. Offsets count characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub parent_document_id: String,
    pub sequence_index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub hash: String,
}

impl Chunk {
    pub fn chunk_ref(&self) -> ChunkRef {
        ChunkRef {
            chunk_id: self.id.clone(),
            content_hash: self.hash.clone(),
        }
    }
}

/// Identifies the exact chunk content behind an indexed vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub content_hash: String,
}

/// Provenance stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub source: String,
    pub document_id: String,
    pub sequence_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// An embedded chunk as held by a vector store. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedVector {
    pub chunk_ref: ChunkRef,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: VectorMetadata,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of the conversation memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    /// Position in the session, strictly increasing.
    pub order: u64,
    pub timestamp: DateTime<Utc>,
    /// Source names that backed an assistant answer. Empty for user turns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

/// A ranked passage returned for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk_text: String,
    pub source_name: String,
    /// 1-based rank, best match first.
    pub rank: usize,
    pub score: f32,
    pub sequence_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Result of one conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
    /// `(from, to)` language codes when the answer was translated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_from: Option<(String, String)>,
}
