//! In-memory [`VectorStore`] with an optional JSON snapshot file.
//!
//! Vectors live in a `Vec` behind a `parking_lot::RwLock`; search is
//! brute-force cosine similarity over all of them. When opened with a
//! snapshot path, the file is loaded if present (create-if-absent) and
//! [`flush`](VectorStore::flush) rewrites it atomically (temp file + rename).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::models::{ChunkRef, IndexedVector};

use super::{rank_candidates, ScoredVector, VectorStore};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    #[serde(default)]
    meta: BTreeMap<String, String>,
    #[serde(default)]
    vectors: Vec<IndexedVector>,
}

/// In-memory store, optionally backed by a snapshot file.
pub struct InMemoryStore {
    state: RwLock<Snapshot>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryStore {
    /// A purely in-process store. `flush` is a no-op.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Snapshot {
                version: SNAPSHOT_VERSION,
                ..Snapshot::default()
            }),
            snapshot_path: None,
        }
    }

    /// Open (or create on first flush) the snapshot at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read index snapshot: {}", path.display()))?;
            let snapshot: Snapshot = serde_json::from_str(&data)
                .with_context(|| format!("Corrupt index snapshot: {}", path.display()))?;
            if snapshot.version != SNAPSHOT_VERSION {
                anyhow::bail!(
                    "Unsupported index snapshot version {} in {}",
                    snapshot.version,
                    path.display()
                );
            }
            tracing::debug!(path = %path.display(), vectors = snapshot.vectors.len(), "loaded index snapshot");
            snapshot
        } else {
            Snapshot {
                version: SNAPSHOT_VERSION,
                ..Snapshot::default()
            }
        };
        Ok(Self {
            state: RwLock::new(snapshot),
            snapshot_path: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn insert(&self, vectors: &[IndexedVector]) -> Result<()> {
        self.state.write().vectors.extend_from_slice(vectors);
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredVector>> {
        let state = self.state.read();
        let mut candidates: Vec<ScoredVector> = state
            .vectors
            .iter()
            .map(|v| ScoredVector {
                score: cosine_similarity(query, &v.embedding),
                vector: v.clone(),
            })
            .collect();
        rank_candidates(&mut candidates, k);
        Ok(candidates)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().vectors.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        state.vectors.clear();
        state.meta.clear();
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let data = serde_json::to_vec(&*self.state.read())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("Failed to write index snapshot: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace index snapshot: {}", path.display()))?;
        Ok(())
    }

    async fn chunk_refs(&self) -> Result<HashSet<ChunkRef>> {
        Ok(self
            .state
            .read()
            .vectors
            .iter()
            .map(|v| v.chunk_ref.clone())
            .collect())
    }

    async fn sources(&self) -> Result<Vec<String>> {
        let state = self.state.read();
        let mut sources: Vec<String> = state
            .vectors
            .iter()
            .map(|v| v.metadata.source.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        sources.sort();
        Ok(sources)
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.read().meta.get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.state
            .write()
            .meta
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
