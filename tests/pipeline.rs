//! End-to-end library tests: PDFs on disk → index → retrieval → answer,
//! with offline providers.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use folio::config::Config;
use folio::llm::ExtractiveModel;
use folio::loader::load_directory;
use folio::pipeline::open_store;
use folio::session::Services;
use folio_core::embedding::{Embedder, HashEmbedder};
use folio_core::store::IndexHandle;
use folio_core::RagError;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.documents.dir = root.join("docs");
    config.index.backend = "sqlite".to_string();
    config.index.path = root.join("index");
    config.retrieval.k = 1;
    config.embedding.provider = "hash".to_string();
    config.generation.provider = "extractive".to_string();
    config
}

async fn services(config: Config, dims: usize) -> Services {
    services_with(config, Arc::new(HashEmbedder::new(dims))).await
}

async fn services_with(config: Config, embedder: Arc<dyn Embedder>) -> Services {
    let index = IndexHandle::new(open_store(&config.index).await.unwrap());
    Services::new(config, embedder, Arc::new(ExtractiveModel), None, index)
}

/// Hash embeddings that stop working after `ok_calls` calls.
struct FailingEmbedder {
    inner: HashEmbedder,
    ok_calls: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
            anyhow::bail!("embedding service unavailable");
        }
        self.inner.embed(texts).await
    }
}

#[tokio::test]
async fn test_relevant_document_ranks_first() {
    let tmp = TempDir::new().unwrap();
    common::write_corpus(&tmp.path().join("docs"));
    let services = services(test_config(tmp.path()), 512).await;

    let report = services
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.documents, 2);
    assert!(report.load_failures.is_empty());
    let index = report.index.expect("first build indexes");
    assert_eq!(index.inserted, 2);
    assert_eq!(index.total, 2);

    let results = services
        .retriever()
        .retrieve("Which ecosystem services include pollination?", 2, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].source_name, "services.pdf");
    assert_eq!(results[0].rank, 1);
    assert!(results[0].score > results[1].score);
    assert!(results[0].chunk_text.contains("pollination"));
}

#[tokio::test]
async fn test_corrupt_pdf_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    common::write_corpus(&docs);
    common::write_corrupt_pdf(&docs.join("broken.pdf"));

    let services = services(test_config(tmp.path()), 512).await;
    let report = services
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.documents, 2);
    assert_eq!(report.load_failures.len(), 1);
    match &report.load_failures[0] {
        RagError::Load { source_name, .. } => assert_eq!(source_name, "broken.pdf"),
        other => panic!("expected a load error, got {:?}", other),
    }
    assert_eq!(report.sources, vec!["intro.pdf", "services.pdf"]);
    assert_eq!(services.sources(), vec!["intro.pdf", "services.pdf"]);
}

#[test]
fn test_load_directory_lists_sources() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    common::write_corpus(&docs);
    common::write_corrupt_pdf(&docs.join("broken.pdf"));

    let outcome = load_directory(&test_config(tmp.path()).documents).unwrap();
    assert_eq!(outcome.source_names(), vec!["intro.pdf", "services.pdf"]);
    assert_eq!(outcome.failures.len(), 1);
    let services = outcome
        .documents
        .iter()
        .find(|d| d.source_name == "services.pdf")
        .unwrap();
    assert!(services.full_text.contains("pollination"));
}

#[tokio::test]
async fn test_build_is_idempotent_across_processes() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    common::write_corpus(&docs);

    {
        let services = services(test_config(tmp.path()), 512).await;
        let first = services
            .build_index(false, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!first.up_to_date());
        let second = services
            .build_index(false, &CancellationToken::new())
            .await
            .unwrap();
        assert!(second.up_to_date());
    }

    // Reopen from disk: nothing to do, nothing duplicated.
    let services = services(test_config(tmp.path()), 512).await;
    let again = services
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap();
    assert!(again.up_to_date());
    assert_eq!(services.index().current().await.len().await.unwrap(), 2);

    // A new document changes the source set: full rebuild, no duplicates.
    std::fs::write(
        docs.join("wetlands.pdf"),
        common::pdf_with_text("Wetlands store carbon and buffer floods."),
    )
    .unwrap();
    let rebuilt = services
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap();
    let index = rebuilt.index.expect("changed sources are re-indexed");
    assert_eq!(index.total, 3);
}

#[tokio::test]
async fn test_embedding_model_change_requires_rebuild() {
    let tmp = TempDir::new().unwrap();
    common::write_corpus(&tmp.path().join("docs"));

    services(test_config(tmp.path()), 512)
        .await
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap();

    let other = services(test_config(tmp.path()), 256).await;
    assert!(other
        .build_index(false, &CancellationToken::new())
        .await
        .is_err());

    let report = other
        .build_index(true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.index.map(|r| r.total), Some(2));
}

#[tokio::test]
async fn test_conversation_cites_sources() {
    let tmp = TempDir::new().unwrap();
    common::write_corpus(&tmp.path().join("docs"));
    let services = services(test_config(tmp.path()), 512).await;
    services
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap();

    let engine = services.new_engine();
    let answer = engine.ask("What does pollination do for crops?").await.unwrap();
    assert!(answer.answer.contains("pollination"));
    assert_eq!(answer.sources, vec!["services.pdf"]);

    let follow_up = engine.ask("Tell me about the valley history").await.unwrap();
    assert_eq!(follow_up.sources, vec!["intro.pdf"]);
    assert_eq!(engine.history().len(), 4);

    engine.reset();
    assert!(engine.history().is_empty());
}

#[tokio::test]
async fn test_memory_backend_snapshot_persists() {
    let tmp = TempDir::new().unwrap();
    common::write_corpus(&tmp.path().join("docs"));
    let mut config = test_config(tmp.path());
    config.index.backend = "memory".to_string();

    services(config.clone(), 512)
        .await
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap();
    assert!(tmp.path().join("index").join("documents.json").exists());

    let reopened = services(config, 512).await;
    assert_eq!(reopened.index().current().await.len().await.unwrap(), 2);
    assert!(reopened
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap()
        .up_to_date());
}

#[tokio::test]
async fn test_build_after_failure_drops_edited_content() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(
        docs.join("intro.pdf"),
        common::pdf_with_text("Old text about pollination bees."),
    )
    .unwrap();
    std::fs::write(docs.join("services.pdf"), common::pdf_with_text(common::SERVICES_TEXT)).unwrap();
    let mut config = test_config(tmp.path());
    config.embedding.batch_size = 1;

    let failing = services_with(
        config.clone(),
        Arc::new(FailingEmbedder {
            inner: HashEmbedder::new(512),
            ok_calls: 1,
            calls: AtomicUsize::new(0),
        }),
    )
    .await;
    assert!(failing
        .build_index(false, &CancellationToken::new())
        .await
        .is_err());
    assert_eq!(failing.index().current().await.len().await.unwrap(), 1);
    drop(failing);

    std::fs::write(docs.join("intro.pdf"), common::pdf_with_text("New text about rivers.")).unwrap();
    let services = services(config, 512).await;
    let report = services
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap();
    let index = report.index.expect("edited sources are re-indexed");
    assert_eq!(index.removed, 1);
    assert_eq!(index.skipped, 0);
    assert_eq!(index.total, report.chunks);
    assert_eq!(index.total, 2);

    let results = services
        .retriever()
        .retrieve("pollination bees", 2, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| !r.chunk_text.contains("Old text")));
    assert!(results
        .iter()
        .any(|r| r.source_name == "intro.pdf" && r.chunk_text.contains("rivers")));
}

#[tokio::test]
async fn test_build_after_failure_resumes_unchanged_sources() {
    let tmp = TempDir::new().unwrap();
    common::write_corpus(&tmp.path().join("docs"));
    let mut config = test_config(tmp.path());
    config.embedding.batch_size = 1;

    let failing = services_with(
        config.clone(),
        Arc::new(FailingEmbedder {
            inner: HashEmbedder::new(512),
            ok_calls: 1,
            calls: AtomicUsize::new(0),
        }),
    )
    .await;
    assert!(failing
        .build_index(false, &CancellationToken::new())
        .await
        .is_err());
    drop(failing);

    let services = services(config, 512).await;
    let index = services
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap()
        .index
        .expect("unfinished build continues");
    assert_eq!(index.skipped, 1);
    assert_eq!(index.inserted, 1);
    assert_eq!(index.removed, 0);
    assert_eq!(index.total, 2);

    assert!(services
        .build_index(false, &CancellationToken::new())
        .await
        .unwrap()
        .up_to_date());
}
