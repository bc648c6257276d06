//! Vector store abstraction.
//!
//! The [`VectorStore`] trait defines the operations the indexer and
//! retriever need from a persisted similarity index: create-if-absent
//! (backend constructors), append, similarity query, clear, and flush.
//! Backends are selected by configuration: [`memory::InMemoryStore`] (with an
//! optional JSON snapshot file) lives here, the SQLite backend lives in the
//! app crate.
//!
//! Stores are append-only: vectors are never updated in place, only removed
//! wholesale by [`clear`](VectorStore::clear) when an index is rebuilt.
//!
//! [`IndexHandle`] wraps the active store in a read/write lock so that
//! retrieval reads never observe a batch insertion half-done.

pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::models::{ChunkRef, IndexedVector};

/// Metadata key holding the embedding model an index was built with.
pub const META_EMBEDDING_MODEL: &str = "embedding_model";
/// Metadata key holding the embedding dimensionality.
pub const META_EMBEDDING_DIMS: &str = "embedding_dims";
/// Metadata key holding the fingerprint of the indexed source set.
pub const META_SOURCE_FINGERPRINT: &str = "source_fingerprint";
/// Metadata key holding the fingerprint of a build that has started but may
/// not have finished.
pub const META_PENDING_FINGERPRINT: &str = "pending_source_fingerprint";

/// A stored vector with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredVector {
    pub vector: IndexedVector,
    pub score: f32,
}

/// Abstract similarity index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorStore::insert) | Append vectors, in order |
/// | [`search`](VectorStore::search) | Top-k by cosine similarity |
/// | [`len`](VectorStore::len) | Number of stored vectors |
/// | [`clear`](VectorStore::clear) | Drop all vectors and metadata |
/// | [`flush`](VectorStore::flush) | Make the current state durable |
/// | [`chunk_refs`](VectorStore::chunk_refs) | Content already indexed |
/// | [`sources`](VectorStore::sources) | Distinct source names |
/// | [`get_meta`](VectorStore::get_meta) / [`set_meta`](VectorStore::set_meta) | Index-level metadata |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name, e.g. `"memory"` or `"sqlite"`.
    fn backend(&self) -> &str;

    /// Append vectors. Insertion order is the tie-breaker for equal scores.
    async fn insert(&self, vectors: &[IndexedVector]) -> Result<()>;

    /// Return the `k` vectors most similar to `query`, best first; equal
    /// scores keep insertion order.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredVector>>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn clear(&self) -> Result<()>;

    async fn flush(&self) -> Result<()>;

    async fn chunk_refs(&self) -> Result<HashSet<ChunkRef>>;

    async fn sources(&self) -> Result<Vec<String>>;

    async fn get_meta(&self, key: &str) -> Result<Option<String>>;

    async fn set_meta(&self, key: &str, value: &str) -> Result<()>;
}

/// Sort scored vectors best-first. The sort is stable, so candidates given in
/// insertion order keep that order among equal scores. NaN scores rank last.
pub fn rank_candidates(candidates: &mut Vec<ScoredVector>, k: usize) {
    candidates.sort_by(|a, b| rank_key(b.score).total_cmp(&rank_key(a.score)));
    candidates.truncate(k);
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

/// Shared handle to the active vector store.
///
/// Readers (retrieval) hold a read guard for the duration of a query;
/// writers (batch insertion, rebuild) take the write guard, which waits for
/// in-flight reads and blocks new ones until the batch is complete.
#[derive(Clone)]
pub struct IndexHandle {
    inner: Arc<RwLock<Arc<dyn VectorStore>>>,
}

impl IndexHandle {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub async fn read(&self) -> OwnedRwLockReadGuard<Arc<dyn VectorStore>> {
        self.inner.clone().read_owned().await
    }

    pub async fn write(&self) -> OwnedRwLockWriteGuard<Arc<dyn VectorStore>> {
        self.inner.clone().write_owned().await
    }

    /// Replace the active store. Waits for in-flight reads, then installs
    /// `store` and returns the retired one.
    pub async fn swap(&self, store: Arc<dyn VectorStore>) -> Arc<dyn VectorStore> {
        let mut guard = self.write().await;
        std::mem::replace(&mut *guard, store)
    }

    /// The current store, without holding the lock.
    pub async fn current(&self) -> Arc<dyn VectorStore> {
        self.read().await.clone()
    }
}
