//! Index build: load → chunk → index, as one blocking setup phase.
//!
//! The build is idempotent. A fingerprint of the loaded source set (sorted
//! source names and text hashes) is stored in the index metadata after a
//! complete build. Before indexing starts, the same fingerprint is stored as
//! *pending*, so a build that failed part way can be told apart from a
//! different source set:
//!
//! | Stored fingerprint | Action |
//! |--------------------|--------|
//! | equal to the current one | nothing to do (same embedder) |
//! | different | `Rebuild` (the source set changed) |
//! | absent, empty index | `Resume` (first build) |
//! | absent, pending equal to the current one | `Resume` (continue the failed build) |
//! | absent, anything else | `Rebuild` (the failed build indexed other content) |
//!
//! `--rebuild` forces `Rebuild`.

use std::sync::Arc;

use anyhow::{Context, Result};
use folio_core::embedding::Embedder;
use folio_core::index::{IndexMode, IndexReport, IndexSettings, Indexer};
use folio_core::models::{hash_text, Chunk, DocumentSet};
use folio_core::store::memory::InMemoryStore;
use folio_core::store::{
    IndexHandle, VectorStore, META_EMBEDDING_MODEL, META_PENDING_FINGERPRINT,
    META_SOURCE_FINGERPRINT,
};
use folio_core::RagError;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, IndexConfig};
use crate::loader::load_directory;
use crate::sqlite_store::SqliteVectorStore;

/// Open the configured backend, creating it if absent.
pub async fn open_store(config: &IndexConfig) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.backend.as_str() {
        "sqlite" => Arc::new(
            SqliteVectorStore::open(&config.path, &config.collection)
                .await
                .with_context(|| format!("Failed to open index at {}", config.path.display()))?,
        ),
        "memory" if config.persist => Arc::new(InMemoryStore::open(
            config.path.join(format!("{}.json", config.collection)),
        )?),
        "memory" => Arc::new(InMemoryStore::new()),
        other => anyhow::bail!("Unknown index backend: {}", other),
    };
    tracing::debug!(backend = store.backend(), path = %config.path.display(), "opened index");
    Ok(store)
}

/// SHA-256 over sorted `(source name, text hash)` pairs.
pub fn source_fingerprint(documents: &DocumentSet) -> String {
    let mut entries: Vec<(&str, String)> = documents
        .iter()
        .map(|d| (d.source_name.as_str(), hash_text(&d.full_text)))
        .collect();
    entries.sort();
    let mut hasher = Sha256::new();
    for (name, text_hash) in entries {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(text_hash.as_bytes());
        hasher.update([b'\n']);
    }
    format!("{:x}", hasher.finalize())
}

/// What a build did.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Names of the documents that loaded, sorted.
    pub sources: Vec<String>,
    pub documents: usize,
    pub chunks: usize,
    pub load_failures: Vec<RagError>,
    /// `None` when the index was already up to date.
    pub index: Option<IndexReport>,
}

impl BuildReport {
    pub fn up_to_date(&self) -> bool {
        self.index.is_none()
    }
}

/// Load, chunk and index the configured source directory.
pub async fn build_index(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    index: &IndexHandle,
    rebuild: bool,
    cancel: &CancellationToken,
) -> Result<BuildReport> {
    let chunker = config.chunker()?;
    let documents_config = config.documents.clone();
    let outcome = tokio::task::spawn_blocking(move || load_directory(&documents_config))
        .await
        .context("document loader panicked")??;

    let sources = outcome.source_names();
    let documents = outcome.documents;
    let chunks: Vec<Chunk> = documents
        .iter()
        .flat_map(|d| chunker.chunk_document(d))
        .collect();
    let fingerprint = source_fingerprint(&documents);

    let mut report = BuildReport {
        sources,
        documents: documents.len(),
        chunks: chunks.len(),
        load_failures: outcome.failures,
        index: None,
    };

    let store = index.current().await;
    let stored = store.get_meta(META_SOURCE_FINGERPRINT).await?;
    let pending = store.get_meta(META_PENDING_FINGERPRINT).await?;
    let empty = store.is_empty().await?;
    let same_model = store
        .get_meta(META_EMBEDDING_MODEL)
        .await?
        .map_or(true, |m| m == embedder.model_name());
    let mode = match stored {
        _ if rebuild => IndexMode::Rebuild,
        Some(ref f) if *f == fingerprint && same_model => {
            tracing::info!(documents = report.documents, "index is up to date");
            return Ok(report);
        }
        // Same sources, different embedder: the indexer reports the mismatch.
        Some(ref f) if *f == fingerprint => IndexMode::Resume,
        Some(_) => {
            tracing::info!("source documents changed, rebuilding index");
            IndexMode::Rebuild
        }
        None if empty => IndexMode::Resume,
        None if pending.as_deref() == Some(fingerprint.as_str()) => {
            tracing::info!("continuing an unfinished build");
            IndexMode::Resume
        }
        None => {
            tracing::info!("unfinished build of other documents, rebuilding index");
            IndexMode::Rebuild
        }
    };

    {
        let guard = index.write().await;
        guard.set_meta(META_PENDING_FINGERPRINT, &fingerprint).await?;
        if config.index.persist {
            guard.flush().await?;
        }
    }

    let indexer = Indexer::new(
        embedder,
        index.clone(),
        IndexSettings {
            batch_size: config.embedding.batch_size,
            call_timeout: config.embedding.timeout(),
            persist: config.index.persist,
        },
    );
    let index_report = indexer
        .index(documents.as_slice(), &chunks, mode, cancel)
        .await?;

    {
        let guard = index.write().await;
        guard.set_meta(META_SOURCE_FINGERPRINT, &fingerprint).await?;
        if config.index.persist {
            guard.flush().await?;
        }
    }

    report.index = Some(index_report);
    Ok(report)
}
