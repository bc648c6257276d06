//! Shared services and per-conversation sessions.
//!
//! [`Services`] is built once at startup from the configuration: embedder,
//! language model, vector index and (optionally) the language normalizer.
//! Each [`Session`] owns one [`ConversationEngine`] built from those
//! services, so sessions share the index but never their memory.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use folio_core::conversation::{ConversationEngine, EngineSettings};
use folio_core::embedding::Embedder;
use folio_core::generation::{LanguageModel, DEFAULT_SYSTEM_PROMPT};
use folio_core::normalize::{LanguageNormalizer, ModelTranslator};
use folio_core::retrieve::Retriever;
use folio_core::store::IndexHandle;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::language::WhatlangDetector;
use crate::llm::{create_model, create_named_model};
use crate::pipeline::{self, BuildReport};

pub struct Services {
    config: Config,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    normalizer: Option<Arc<LanguageNormalizer>>,
    index: IndexHandle,
    sources: RwLock<Vec<String>>,
}

impl Services {
    /// Build providers and open the index named in `config`.
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let model = create_model(&config.generation)?;
        let normalizer = if config.translation.enabled {
            let translation_model = match &config.translation.model {
                Some(name) => create_named_model(&config.generation, name)?,
                None => model.clone(),
            };
            Some(Arc::new(LanguageNormalizer::new(
                Arc::new(WhatlangDetector::new()),
                Arc::new(ModelTranslator::new(translation_model)),
                config.translation.languages.clone(),
                std::time::Duration::from_secs(config.translation.timeout_secs),
            )))
        } else {
            None
        };
        let index = IndexHandle::new(pipeline::open_store(&config.index).await?);
        Ok(Self::new(config, embedder, model, normalizer, index))
    }

    /// Assemble from parts (tests, embedding in other programs).
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        normalizer: Option<Arc<LanguageNormalizer>>,
        index: IndexHandle,
    ) -> Self {
        Self {
            config,
            embedder,
            model,
            normalizer,
            index,
            sources: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(
            self.embedder.clone(),
            self.index.clone(),
            self.config.embedding.timeout(),
        )
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            k: self.config.retrieval.k,
            temperature: self.config.generation.temperature,
            call_timeout: self.config.generation.timeout(),
            provenance: self.config.retrieval.provenance,
            system_prompt: self
                .config
                .generation
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub fn new_engine(&self) -> ConversationEngine {
        ConversationEngine::new(
            self.retriever(),
            self.model.clone(),
            self.normalizer.clone(),
            self.engine_settings(),
        )
    }

    /// Bring the index in line with the source directory, and remember the
    /// loaded source names.
    pub async fn build_index(&self, rebuild: bool, cancel: &CancellationToken) -> Result<BuildReport> {
        let report =
            pipeline::build_index(&self.config, self.embedder.clone(), &self.index, rebuild, cancel)
                .await?;
        self.set_sources(report.sources.clone());
        Ok(report)
    }

    /// Source documents loaded by the last build, sorted.
    pub fn sources(&self) -> Vec<String> {
        self.sources.read().clone()
    }

    pub fn set_sources(&self, sources: Vec<String>) {
        *self.sources.write() = sources;
    }
}

/// One conversation: an engine and its identity.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    engine: ConversationEngine,
}

impl Session {
    pub fn new(id: impl Into<String>, services: &Services) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            engine: services.new_engine(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }
}

/// Sessions keyed by id, created on first use.
pub struct SessionRegistry {
    services: Arc<Services>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.get(id) {
            return session;
        }
        let mut sessions = self.sessions.write();
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::info!(session = id, "session created");
                Arc::new(Session::new(id, &self.services))
            })
            .clone()
    }

    /// End a session. Any answer still in flight is discarded.
    pub fn remove(&self, id: &str) -> bool {
        match self.sessions.write().remove(id) {
            Some(session) => {
                session.engine().reset();
                tracing::info!(session = id, "session ended");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
