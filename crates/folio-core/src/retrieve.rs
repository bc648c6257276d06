//! Query-time retrieval over the vector index.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bounded::bounded;
use crate::embedding::Embedder;
use crate::error::RagError;
use crate::models::RetrievalResult;
use crate::store::IndexHandle;

/// Embeds a question and returns the top-k most similar chunks.
///
/// Holds the index read guard for the whole query, so an in-progress batch
/// insertion is either fully visible or not at all.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: IndexHandle,
    call_timeout: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: IndexHandle, call_timeout: Duration) -> Self {
        Self {
            embedder,
            index,
            call_timeout,
        }
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    /// Top-`k` chunks for `query`, ranked 1..=k, best first.
    ///
    /// An empty index yields an empty list without calling the embedder.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        if k == 0 {
            return Err(RagError::validation("k must be at least 1"));
        }
        if query.trim().is_empty() {
            return Err(RagError::validation("query is empty"));
        }

        let store = self.index.read().await;
        if store.is_empty().await.map_err(|e| RagError::retrieval(e.to_string()))? {
            tracing::debug!("index is empty, nothing to retrieve");
            return Ok(Vec::new());
        }

        let query_vec = match bounded(
            "embed",
            self.call_timeout,
            cancel,
            self.embedder.embed(&[query.to_string()]),
        )
        .await?
        {
            Ok(mut vectors) if vectors.len() == 1 => vectors.remove(0),
            Ok(vectors) => {
                return Err(RagError::Embedding(format!(
                    "expected 1 query embedding, got {}",
                    vectors.len()
                )))
            }
            Err(e) => return Err(RagError::Embedding(e.to_string())),
        };

        if let Some(dims) = store
            .get_meta(crate::store::META_EMBEDDING_DIMS)
            .await
            .map_err(|e| RagError::retrieval(e.to_string()))?
        {
            if dims != query_vec.len().to_string() {
                return Err(RagError::retrieval(format!(
                    "query embedding has {} dimensions but the index holds {}-dimensional vectors",
                    query_vec.len(),
                    dims
                )));
            }
        }

        let hits = store
            .search(&query_vec, k)
            .await
            .map_err(|e| RagError::retrieval(e.to_string()))?;

        tracing::debug!(k, hits = hits.len(), "retrieved chunks");
        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| RetrievalResult {
                chunk_text: hit.vector.text,
                source_name: hit.vector.metadata.source,
                rank: i + 1,
                score: hit.score,
                sequence_index: hit.vector.metadata.sequence_index,
                language: hit.vector.metadata.language,
            })
            .collect())
    }
}
