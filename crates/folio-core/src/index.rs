//! Indexer: embeds chunks and appends them to the vector store.
//!
//! # Batch semantics
//!
//! 1. Chunks with blank text, or whose parent document was not supplied, are
//!    rejected and reported; they never reach the store.
//! 2. The embedder is checked against the model recorded in the store, so an
//!    index is never queried with vectors from two different models.
//! 3. Remaining chunks are embedded in batches, each call bounded by a
//!    timeout. Embedding happens outside the store lock, so readers keep
//!    seeing the previous contents meanwhile.
//! 4. One write-lock section then clears the store (`Rebuild` only),
//!    inserts everything embedded, and flushes when persistence is requested.
//!
//! If an embedding batch fails, the chunks embedded before it are still
//! committed, and [`RagError::Index`] lists them so a
//! [`IndexMode::Resume`] run can pick up where this one stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bounded::bounded;
use crate::embedding::Embedder;
use crate::error::RagError;
use crate::models::{Chunk, ChunkRef, IndexedVector, RawDocument, VectorMetadata};
use crate::store::{IndexHandle, VectorStore, META_EMBEDDING_DIMS, META_EMBEDDING_MODEL};

/// How a batch treats what is already in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Insert every valid chunk, even if identical content is already stored.
    Append,
    /// Skip chunks whose content is already stored.
    Resume,
    /// Replace the store contents with every valid chunk.
    Rebuild,
}

/// Indexer tuning.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Texts per embedding call.
    pub batch_size: usize,
    /// Deadline for each embedding call.
    pub call_timeout: Duration,
    /// Flush the store before returning.
    pub persist: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            batch_size: 64,
            call_timeout: Duration::from_secs(30),
            persist: true,
        }
    }
}

/// A chunk that was not indexed, and why.
#[derive(Debug, Clone)]
pub struct RejectedChunk {
    pub chunk_id: String,
    pub reason: String,
}

/// Outcome of a successful indexing call.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    /// Vectors appended by this call.
    pub inserted: usize,
    /// Chunks skipped because their content was already indexed (`Resume`).
    pub skipped: usize,
    /// Vectors cleared by `Rebuild`.
    pub removed: usize,
    pub rejected: Vec<RejectedChunk>,
    /// Store size after the call.
    pub total: usize,
}

/// Embeds chunks and appends them to the store behind an [`IndexHandle`].
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    index: IndexHandle,
    settings: IndexSettings,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, index: IndexHandle, settings: IndexSettings) -> Self {
        Self {
            embedder,
            index,
            settings,
        }
    }

    /// Index `chunks`, whose parents must all be in `documents`.
    pub async fn index(
        &self,
        documents: &[RawDocument],
        chunks: &[Chunk],
        mode: IndexMode,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, RagError> {
        let parents: HashMap<&str, &RawDocument> =
            documents.iter().map(|d| (d.id.as_str(), d)).collect();

        let mut report = IndexReport::default();
        let mut valid: Vec<(&Chunk, &RawDocument)> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match validate_chunk(chunk, &parents) {
                Ok(parent) => valid.push((chunk, parent)),
                Err(e) => {
                    tracing::warn!(chunk = %chunk.id, error = %e, "rejected chunk");
                    report.rejected.push(RejectedChunk {
                        chunk_id: chunk.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let store = self.index.current().await;
        if mode != IndexMode::Rebuild {
            self.check_model(store.as_ref()).await?;
        }

        if mode == IndexMode::Resume {
            let existing = store
                .chunk_refs()
                .await
                .map_err(|e| index_error(format!("failed to read index: {}", e), vec![]))?;
            let before = valid.len();
            valid.retain(|(chunk, _)| !existing.contains(&chunk.chunk_ref()));
            report.skipped = before - valid.len();
        }

        let (embedded, failure) = self.embed_all(&valid, cancel).await;

        let completed: Vec<ChunkRef> = embedded.iter().map(|v| v.chunk_ref.clone()).collect();
        report.removed = self
            .commit(mode == IndexMode::Rebuild, &embedded, &completed)
            .await?;
        report.inserted = embedded.len();

        if let Some(err) = failure {
            return Err(index_error(err.to_string(), completed));
        }

        let guard = self.index.read().await;
        report.total = guard
            .len()
            .await
            .map_err(|e| index_error(format!("failed to count index: {}", e), completed))?;

        tracing::info!(
            inserted = report.inserted,
            skipped = report.skipped,
            removed = report.removed,
            rejected = report.rejected.len(),
            total = report.total,
            "indexing complete"
        );
        Ok(report)
    }

    /// Embed in batches until done or the first failure.
    async fn embed_all(
        &self,
        valid: &[(&Chunk, &RawDocument)],
        cancel: &CancellationToken,
    ) -> (Vec<IndexedVector>, Option<RagError>) {
        let mut embedded = Vec::with_capacity(valid.len());
        for batch in valid.chunks(self.settings.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
            let outcome = bounded(
                "embed",
                self.settings.call_timeout,
                cancel,
                self.embedder.embed(&texts),
            )
            .await;
            let vectors = match outcome {
                Ok(Ok(vectors)) => vectors,
                Ok(Err(e)) => return (embedded, Some(RagError::Embedding(e.to_string()))),
                Err(e) => return (embedded, Some(e)),
            };
            if vectors.len() != batch.len() {
                let err = RagError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                ));
                return (embedded, Some(err));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.embedder.dims()) {
                let err = RagError::Embedding(format!(
                    "expected {} dimensions, got {}",
                    self.embedder.dims(),
                    bad.len()
                ));
                return (embedded, Some(err));
            }
            for ((chunk, parent), embedding) in batch.iter().zip(vectors) {
                embedded.push(IndexedVector {
                    chunk_ref: chunk.chunk_ref(),
                    embedding,
                    text: chunk.text.clone(),
                    metadata: VectorMetadata {
                        source: parent.source_name.clone(),
                        document_id: parent.id.clone(),
                        sequence_index: chunk.sequence_index,
                        language: parent.language.clone(),
                    },
                });
            }
            tracing::debug!(embedded = embedded.len(), of = valid.len(), "embedded batch");
        }
        (embedded, None)
    }

    /// Clear (when rebuilding), insert and flush under one write lock.
    /// Returns the number of vectors cleared.
    async fn commit(
        &self,
        clear: bool,
        vectors: &[IndexedVector],
        completed: &[ChunkRef],
    ) -> Result<usize, RagError> {
        let guard = self.index.write().await;
        let mut removed = 0;
        if clear {
            removed = guard
                .len()
                .await
                .map_err(|e| index_error(format!("failed to count index: {}", e), vec![]))?;
            guard
                .clear()
                .await
                .map_err(|e| index_error(format!("failed to clear index: {}", e), vec![]))?;
        }
        if !vectors.is_empty() {
            guard
                .insert(vectors)
                .await
                .map_err(|e| index_error(format!("failed to store vectors: {}", e), vec![]))?;
            self.record_model(&**guard, completed).await?;
        }
        if self.settings.persist {
            guard.flush().await.map_err(|e| {
                index_error(format!("failed to persist index: {}", e), completed.to_vec())
            })?;
        }
        Ok(removed)
    }

    async fn check_model(&self, store: &dyn VectorStore) -> Result<(), RagError> {
        let recorded = store
            .get_meta(META_EMBEDDING_MODEL)
            .await
            .map_err(|e| index_error(format!("failed to read index metadata: {}", e), vec![]))?;
        match recorded {
            Some(model) if model != self.embedder.model_name() => Err(index_error(
                format!(
                    "index was built with embedding model '{}' but '{}' is configured; rebuild the index",
                    model,
                    self.embedder.model_name()
                ),
                vec![],
            )),
            _ => Ok(()),
        }
    }

    async fn record_model(&self, store: &dyn VectorStore, completed: &[ChunkRef]) -> Result<(), RagError> {
        let write = async {
            store
                .set_meta(META_EMBEDDING_MODEL, self.embedder.model_name())
                .await?;
            store
                .set_meta(META_EMBEDDING_DIMS, &self.embedder.dims().to_string())
                .await
        };
        write.await.map_err(|e| {
            index_error(
                format!("failed to record index metadata: {}", e),
                completed.to_vec(),
            )
        })
    }
}

fn validate_chunk<'a>(
    chunk: &Chunk,
    parents: &HashMap<&str, &'a RawDocument>,
) -> Result<&'a RawDocument, RagError> {
    if chunk.text.trim().is_empty() {
        return Err(RagError::validation(format!(
            "chunk {} has empty text",
            chunk.id
        )));
    }
    parents
        .get(chunk.parent_document_id.as_str())
        .copied()
        .ok_or_else(|| {
            RagError::validation(format!(
                "chunk {} references unknown document {}",
                chunk.id, chunk.parent_document_id
            ))
        })
}

fn index_error(message: String, completed: Vec<ChunkRef>) -> RagError {
    RagError::Index { message, completed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunker;
    use crate::embedding::HashEmbedder;
    use crate::retrieve::Retriever;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle() -> IndexHandle {
        IndexHandle::new(Arc::new(InMemoryStore::new()))
    }

    fn docs_and_chunks(texts: &[(&str, &str)]) -> (Vec<RawDocument>, Vec<Chunk>) {
        let chunker = Chunker::new(16, 4).unwrap();
        let mut docs = Vec::new();
        let mut chunks = Vec::new();
        for (name, text) in texts {
            let doc = RawDocument::new(*name, *text, None).unwrap();
            chunks.extend(chunker.chunk_document(&doc));
            docs.push(doc);
        }
        (docs, chunks)
    }

    fn indexer(embedder: Arc<dyn Embedder>, index: &IndexHandle, batch_size: usize) -> Indexer {
        Indexer::new(
            embedder,
            index.clone(),
            IndexSettings {
                batch_size,
                call_timeout: Duration::from_secs(5),
                persist: false,
            },
        )
    }

    /// Fails every call after the first `ok_calls`.
    struct FlakyEmbedder {
        inner: HashEmbedder,
        ok_calls: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
                anyhow::bail!("rate limited");
            }
            self.inner.embed(texts).await
        }
    }

    /// Sleeps before every call.
    struct SlowEmbedder {
        inner: HashEmbedder,
        delay: Duration,
    }

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            tokio::time::sleep(self.delay).await;
            self.inner.embed(texts).await
        }
    }

    #[tokio::test]
    async fn test_fresh_index_grows_by_valid_chunk_count() {
        let index = handle();
        let (docs, chunks) = docs_and_chunks(&[
            ("a.pdf", "Ecosystem services include pollination and more."),
            ("b.pdf", "Introduction to biodiversity."),
        ]);
        let n = chunks.len();
        let report = indexer(Arc::new(HashEmbedder::new(32)), &index, 3)
            .index(&docs, &chunks, IndexMode::Append, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.inserted, n);
        assert_eq!(report.total, n);
        assert_eq!(index.current().await.len().await.unwrap(), n);
    }

    #[tokio::test]
    async fn test_invalid_chunks_are_rejected_not_inserted() {
        let index = handle();
        let (docs, mut chunks) = docs_and_chunks(&[("a.pdf", "pollination")]);
        let mut blank = chunks[0].clone();
        blank.id = "blank".to_string();
        blank.text = "   ".to_string();
        let mut orphan = chunks[0].clone();
        orphan.id = "orphan".to_string();
        orphan.parent_document_id = "missing".to_string();
        chunks.push(blank);
        chunks.push(orphan);

        let report = indexer(Arc::new(HashEmbedder::new(32)), &index, 8)
            .index(&docs, &chunks, IndexMode::Append, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(index.current().await.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_metadata_carries_provenance() {
        let index = handle();
        let (mut docs, chunks) = docs_and_chunks(&[("services.pdf", "pollination")]);
        docs[0].language = Some("en".to_string());
        indexer(Arc::new(HashEmbedder::new(32)), &index, 8)
            .index(&docs, &chunks, IndexMode::Append, &CancellationToken::new())
            .await
            .unwrap();
        let store = index.current().await;
        let hits = store.search(&HashEmbedder::new(32).embed_one("pollination"), 1).await.unwrap();
        assert_eq!(hits[0].vector.metadata.source, "services.pdf");
        assert_eq!(hits[0].vector.metadata.language.as_deref(), Some("en"));
        assert_eq!(store.sources().await.unwrap(), vec!["services.pdf"]);
    }

    #[tokio::test]
    async fn test_append_twice_duplicates_resume_does_not() {
        let index = handle();
        let (docs, chunks) = docs_and_chunks(&[("a.pdf", "some text that spans a few chunks")]);
        let n = chunks.len();
        let idx = indexer(Arc::new(HashEmbedder::new(32)), &index, 4);
        let token = CancellationToken::new();

        idx.index(&docs, &chunks, IndexMode::Append, &token).await.unwrap();
        let resumed = idx.index(&docs, &chunks, IndexMode::Resume, &token).await.unwrap();
        assert_eq!(resumed.inserted, 0);
        assert_eq!(resumed.skipped, n);
        assert_eq!(resumed.total, n);

        let appended = idx.index(&docs, &chunks, IndexMode::Append, &token).await.unwrap();
        assert_eq!(appended.total, 2 * n);

        let rebuilt = idx.index(&docs, &chunks, IndexMode::Rebuild, &token).await.unwrap();
        assert_eq!(rebuilt.total, n);
    }

    #[tokio::test]
    async fn test_failed_batch_reports_completed_and_resume_finishes() {
        let index = handle();
        let (docs, chunks) = docs_and_chunks(&[(
            "a.pdf",
            "a long enough document to produce several chunks of sixteen characters each",
        )]);
        assert!(chunks.len() > 2);

        let flaky = Arc::new(FlakyEmbedder {
            inner: HashEmbedder::new(32),
            ok_calls: 1,
            calls: AtomicUsize::new(0),
        });
        let err = indexer(flaky, &index, 2)
            .index(&docs, &chunks, IndexMode::Append, &CancellationToken::new())
            .await
            .unwrap_err();
        let completed = match err {
            RagError::Index { completed, .. } => completed,
            other => panic!("expected index error, got {:?}", other),
        };
        assert_eq!(completed.len(), 2);
        assert_eq!(index.current().await.len().await.unwrap(), 2);

        let report = indexer(Arc::new(HashEmbedder::new(32)), &index, 2)
            .index(&docs, &chunks, IndexMode::Resume, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.total, chunks.len());
    }

    #[tokio::test]
    async fn test_model_mismatch_requires_rebuild() {
        let index = handle();
        let (docs, chunks) = docs_and_chunks(&[("a.pdf", "pollination")]);
        let token = CancellationToken::new();
        indexer(Arc::new(HashEmbedder::new(32)), &index, 8)
            .index(&docs, &chunks, IndexMode::Append, &token)
            .await
            .unwrap();

        let other = indexer(Arc::new(HashEmbedder::new(64)), &index, 8);
        let err = other
            .index(&docs, &chunks, IndexMode::Append, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Index { .. }));

        let report = other
            .index(&docs, &chunks, IndexMode::Rebuild, &token)
            .await
            .unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(
            index
                .current()
                .await
                .get_meta(META_EMBEDDING_MODEL)
                .await
                .unwrap()
                .as_deref(),
            Some("hash-64")
        );
    }

    #[tokio::test]
    async fn test_rebuild_keeps_old_contents_readable_until_commit() {
        let index = handle();
        let (docs, chunks) =
            docs_and_chunks(&[("services.pdf", "Ecosystem services include pollination.")]);
        let n = chunks.len();
        indexer(Arc::new(HashEmbedder::new(32)), &index, 64)
            .index(&docs, &chunks, IndexMode::Append, &CancellationToken::new())
            .await
            .unwrap();

        let slow = indexer(
            Arc::new(SlowEmbedder {
                inner: HashEmbedder::new(32),
                delay: Duration::from_millis(300),
            }),
            &index,
            64,
        );
        let rebuild = tokio::spawn(async move {
            slow.index(&docs, &chunks, IndexMode::Rebuild, &CancellationToken::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!rebuild.is_finished());

        let retriever = Retriever::new(
            Arc::new(HashEmbedder::new(32)),
            index.clone(),
            Duration::from_secs(5),
        );
        let during = retriever
            .retrieve("pollination", 1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(during.len(), 1);
        assert_eq!(during[0].source_name, "services.pdf");

        let report = rebuild.await.unwrap().unwrap();
        assert_eq!(report.removed, n);
        assert_eq!(report.total, n);
        let after = retriever
            .retrieve("pollination", 1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
    }
}
