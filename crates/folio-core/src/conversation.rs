//! Conversation engine: one question at a time, with memory.
//!
//! Each [`ask`](ConversationEngine::ask) moves the engine `Idle →
//! AwaitingAnswer → Idle`. The user turn is appended before anything can
//! fail; the assistant turn only after a successful answer. A failed turn
//! therefore leaves a pending user turn that [`retry`](ConversationEngine::retry)
//! (or asking the same question again) picks up without duplicating it.
//!
//! Two locks are involved:
//!
//! - the *turn gate* (`tokio::sync::Mutex`) serializes asks, and is held
//!   across the retrieval and generation awaits;
//! - the memory (`parking_lot::Mutex`) is only held for short synchronous
//!   sections, so [`reset`](ConversationEngine::reset) never waits for a
//!   generation in flight. Reset cancels that generation and bumps an epoch;
//!   an answer that arrives for an older epoch is discarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::bounded::bounded;
use crate::error::RagError;
use crate::generation::{LanguageModel, Prompt, DEFAULT_SYSTEM_PROMPT};
use crate::models::{Answer, ConversationTurn, RetrievalResult, Role};
use crate::normalize::{LanguageNormalizer, Normalized};
use crate::retrieve::Retriever;

/// Engine parameters, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Chunks retrieved per question.
    pub k: usize,
    pub temperature: f32,
    /// Deadline for the generation call.
    pub call_timeout: Duration,
    /// Attach source names to answers.
    pub provenance: bool,
    pub system_prompt: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            k: 4,
            temperature: 0.3,
            call_timeout: Duration::from_secs(60),
            provenance: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    AwaitingAnswer,
}

struct Memory {
    turns: Vec<ConversationTurn>,
    state: EngineState,
    epoch: u64,
    cancel: CancellationToken,
    next_order: u64,
}

impl Memory {
    fn new() -> Self {
        Self {
            turns: Vec::new(),
            state: EngineState::Idle,
            epoch: 0,
            cancel: CancellationToken::new(),
            next_order: 0,
        }
    }

    fn push(&mut self, role: Role, text: &str, sources: Vec<String>) {
        self.turns.push(ConversationTurn {
            role,
            text: text.to_string(),
            order: self.next_order,
            timestamp: Utc::now(),
            sources,
        });
        self.next_order += 1;
    }

    fn pending_question(&self) -> Option<&str> {
        match self.turns.last() {
            Some(turn) if turn.role == Role::User => Some(turn.text.as_str()),
            _ => None,
        }
    }
}

/// Retrieval-augmented conversation over one turn history.
pub struct ConversationEngine {
    retriever: RwLock<Retriever>,
    model: Arc<dyn LanguageModel>,
    normalizer: Option<Arc<LanguageNormalizer>>,
    settings: EngineSettings,
    memory: Mutex<Memory>,
    turn_gate: tokio::sync::Mutex<()>,
}

impl ConversationEngine {
    pub fn new(
        retriever: Retriever,
        model: Arc<dyn LanguageModel>,
        normalizer: Option<Arc<LanguageNormalizer>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            retriever: RwLock::new(retriever),
            model,
            normalizer,
            settings,
            memory: Mutex::new(Memory::new()),
            turn_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Answer `question` in the context of the conversation so far.
    pub async fn ask(&self, question: &str) -> Result<Answer, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::validation("question is empty"));
        }

        let _gate = self.turn_gate.lock().await;

        let (epoch, cancel, history) = {
            let mut mem = self.memory.lock();
            if mem.pending_question() != Some(question) {
                mem.push(Role::User, question, Vec::new());
            }
            mem.state = EngineState::AwaitingAnswer;
            let history = mem.turns[..mem.turns.len() - 1].to_vec();
            (mem.epoch, mem.cancel.clone(), history)
        };
        let retriever = self.retriever.read().clone();

        let result = self.answer(&retriever, question, history, &cancel).await;

        let mut mem = self.memory.lock();
        if mem.epoch != epoch {
            tracing::info!("conversation was reset, discarding answer");
            return Err(RagError::Cancelled { operation: "ask" });
        }
        mem.state = EngineState::Idle;
        match result {
            Ok(answer) => {
                mem.push(Role::Assistant, &answer.answer, answer.sources.clone());
                Ok(answer)
            }
            Err(e) => {
                tracing::warn!(error = %e, "turn failed, question kept for retry");
                Err(e)
            }
        }
    }

    /// Re-answer the pending user turn left by a failed [`ask`](Self::ask).
    pub async fn retry(&self) -> Result<Answer, RagError> {
        let pending = self
            .memory
            .lock()
            .pending_question()
            .map(str::to_string)
            .ok_or_else(|| RagError::validation("no unanswered question to retry"))?;
        self.ask(&pending).await
    }

    async fn answer(
        &self,
        retriever: &Retriever,
        question: &str,
        history: Vec<ConversationTurn>,
        cancel: &CancellationToken,
    ) -> Result<Answer, RagError> {
        let retrieved = retriever.retrieve(question, self.settings.k, cancel).await?;

        let prompt = Prompt {
            system: self.settings.system_prompt.clone(),
            history,
            context: retrieved.iter().map(|r| r.chunk_text.clone()).collect(),
            question: question.to_string(),
        };

        let text = match bounded(
            "generate",
            self.settings.call_timeout,
            cancel,
            self.model.generate(&prompt, self.settings.temperature),
        )
        .await?
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => return Err(RagError::generation("model returned an empty answer")),
            Err(e) => return Err(RagError::generation(e.to_string())),
        };

        let normalized = match &self.normalizer {
            Some(normalizer) => normalizer.normalize(question, &text, cancel).await,
            None => Normalized {
                answer: text,
                translated_from: None,
            },
        };

        let sources = if self.settings.provenance {
            distinct_sources(&retrieved)
        } else {
            Vec::new()
        };

        Ok(Answer {
            answer: normalized.answer,
            sources,
            translated_from: normalized.translated_from,
        })
    }

    /// Clear the turn history and abandon any generation in flight.
    pub fn reset(&self) {
        let mut mem = self.memory.lock();
        mem.cancel.cancel();
        mem.cancel = CancellationToken::new();
        mem.epoch += 1;
        mem.turns.clear();
        mem.next_order = 0;
        mem.state = EngineState::Idle;
        tracing::debug!(epoch = mem.epoch, "conversation reset");
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.memory.lock().turns.clone()
    }

    pub fn state(&self) -> EngineState {
        self.memory.lock().state
    }

    /// Point the engine at a new retriever after the index was swapped.
    /// Waits for the current turn to finish; memory is kept.
    pub async fn rebuild(&self, retriever: Retriever) {
        let _gate = self.turn_gate.lock().await;
        *self.retriever.write() = retriever;
    }
}

/// Source names in order of first appearance.
pub fn distinct_sources(results: &[RetrievalResult]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for r in results {
        if !sources.contains(&r.source_name) {
            sources.push(r.source_name.clone());
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunker;
    use crate::embedding::HashEmbedder;
    use crate::index::{IndexMode, IndexSettings, Indexer};
    use crate::models::RawDocument;
    use crate::store::memory::InMemoryStore;
    use crate::store::IndexHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies "answer N" and records every prompt. Fails calls listed in
    /// `fail_on`, hangs on calls listed in `hang_on` (0-based).
    #[derive(Default)]
    struct ScriptedModel {
        prompts: Mutex<Vec<Prompt>>,
        calls: AtomicUsize,
        fail_on: Vec<usize>,
        hang_on: Vec<usize>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &Prompt, _temperature: f32) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().push(prompt.clone());
            if self.hang_on.contains(&n) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail_on.contains(&n) {
                anyhow::bail!("insufficient quota");
            }
            Ok(format!("answer {}", n))
        }
    }

    async fn retriever() -> Retriever {
        let embedder = Arc::new(HashEmbedder::new(256));
        let index = IndexHandle::new(Arc::new(InMemoryStore::new()));
        let chunker = Chunker::new(1000, 200).unwrap();
        let docs = vec![
            RawDocument::new("services.pdf", "Ecosystem services include pollination.", None)
                .unwrap(),
            RawDocument::new("intro.pdf", "Introduction to biodiversity.", None).unwrap(),
        ];
        let chunks: Vec<_> = docs.iter().flat_map(|d| chunker.chunk_document(d)).collect();
        Indexer::new(embedder.clone(), index.clone(), IndexSettings::default())
            .index(&docs, &chunks, IndexMode::Append, &CancellationToken::new())
            .await
            .unwrap();
        Retriever::new(embedder, index, Duration::from_secs(5))
    }

    async fn engine(model: Arc<ScriptedModel>, timeout: Duration) -> ConversationEngine {
        ConversationEngine::new(
            retriever().await,
            model,
            None,
            EngineSettings {
                call_timeout: timeout,
                ..EngineSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn test_memory_alternates_user_assistant() {
        let model = Arc::new(ScriptedModel::default());
        let engine = engine(model.clone(), Duration::from_secs(5)).await;
        for q in ["What is pollination?", "Who pollinates?", "Why does it matter?"] {
            engine.ask(q).await.unwrap();
        }
        let history = engine.history();
        assert_eq!(history.len(), 6);
        for (i, turn) in history.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(turn.role, expected);
            assert_eq!(turn.order, i as u64);
        }
        assert_eq!(engine.state(), EngineState::Idle);

        let prompts = model.prompts.lock();
        assert_eq!(prompts[2].history.len(), 4);
        assert_eq!(prompts[2].question, "Why does it matter?");
    }

    #[tokio::test]
    async fn test_answer_carries_distinct_sources() {
        let model = Arc::new(ScriptedModel::default());
        let engine = engine(model.clone(), Duration::from_secs(5)).await;
        let answer = engine.ask("What is pollination?").await.unwrap();
        assert_eq!(answer.answer, "answer 0");
        assert_eq!(answer.sources[0], "services.pdf");
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(engine.history()[1].sources, answer.sources);
        assert_eq!(
            model.prompts.lock()[0].context[0],
            "Ecosystem services include pollination."
        );
    }

    #[tokio::test]
    async fn test_reset_starts_fresh_context() {
        let model = Arc::new(ScriptedModel::default());
        let engine = engine(model.clone(), Duration::from_secs(5)).await;
        engine.ask("What is pollination?").await.unwrap();
        engine.reset();
        assert!(engine.history().is_empty());

        engine.ask("Who pollinates?").await.unwrap();
        let prompts = model.prompts.lock();
        assert!(prompts[1].history.is_empty());
        assert_eq!(engine.history().len(), 2);
        assert_eq!(engine.history()[0].order, 0);
    }

    #[tokio::test]
    async fn test_generation_failure_keeps_user_turn() {
        let model = Arc::new(ScriptedModel {
            fail_on: vec![0],
            ..ScriptedModel::default()
        });
        let engine = engine(model.clone(), Duration::from_secs(5)).await;
        let err = engine.ask("What is pollination?").await.unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));

        let history = engine.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(engine.state(), EngineState::Idle);

        let answer = engine.retry().await.unwrap();
        assert_eq!(answer.answer, "answer 1");
        assert_eq!(engine.history().len(), 2);
        // The retried prompt does not see the pending question twice.
        assert!(model.prompts.lock()[1].history.is_empty());
    }

    #[tokio::test]
    async fn test_asking_same_question_after_failure_reuses_turn() {
        let model = Arc::new(ScriptedModel {
            fail_on: vec![0],
            ..ScriptedModel::default()
        });
        let engine = engine(model, Duration::from_secs(5)).await;
        assert!(engine.ask("What is pollination?").await.is_err());
        engine.ask("What is pollination?").await.unwrap();
        assert_eq!(engine.history().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_without_pending_question() {
        let engine = engine(Arc::new(ScriptedModel::default()), Duration::from_secs(5)).await;
        assert!(matches!(engine.retry().await, Err(RagError::Validation(_))));
    }

    #[tokio::test]
    async fn test_timeout_is_surfaced() {
        let model = Arc::new(ScriptedModel {
            hang_on: vec![0],
            ..ScriptedModel::default()
        });
        let engine = engine(model, Duration::from_millis(50)).await;
        let err = engine.ask("What is pollination?").await.unwrap_err();
        assert!(matches!(err, RagError::Timeout { operation: "generate", .. }));
        assert_eq!(engine.history().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_during_hung_generation() {
        let model = Arc::new(ScriptedModel {
            hang_on: vec![0],
            ..ScriptedModel::default()
        });
        let engine = Arc::new(engine(model.clone(), Duration::from_secs(30)).await);

        let asking = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.ask("What is pollination?").await })
        };
        while model.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.state(), EngineState::AwaitingAnswer);

        engine.reset();
        assert!(engine.history().is_empty());

        let err = asking.await.unwrap().unwrap_err();
        assert!(matches!(err, RagError::Cancelled { .. }));
        assert!(engine.history().is_empty());

        engine.ask("Who pollinates?").await.unwrap();
        assert_eq!(engine.history().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_question_rejected_without_turn() {
        let engine = engine(Arc::new(ScriptedModel::default()), Duration::from_secs(5)).await;
        assert!(matches!(engine.ask("  ").await, Err(RagError::Validation(_))));
        assert!(engine.history().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_keeps_memory() {
        let engine = engine(Arc::new(ScriptedModel::default()), Duration::from_secs(5)).await;
        engine.ask("What is pollination?").await.unwrap();
        let empty = Retriever::new(
            Arc::new(HashEmbedder::new(256)),
            IndexHandle::new(Arc::new(InMemoryStore::new())),
            Duration::from_secs(5),
        );
        engine.rebuild(empty).await;
        let answer = engine.ask("Who pollinates?").await.unwrap();
        assert!(answer.sources.is_empty());
        assert_eq!(engine.history().len(), 4);
    }

    #[test]
    fn test_distinct_sources_first_occurrence() {
        let r = |s: &str, rank| RetrievalResult {
            chunk_text: String::new(),
            source_name: s.to_string(),
            rank,
            score: 0.0,
            sequence_index: 0,
            language: None,
        };
        let sources = distinct_sources(&[r("b.pdf", 1), r("a.pdf", 2), r("b.pdf", 3)]);
        assert_eq!(sources, vec!["b.pdf", "a.pdf"]);
    }
}
