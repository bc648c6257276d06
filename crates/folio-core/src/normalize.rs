//! Language normalization of answers.
//!
//! When a question and its answer are in different languages, and both are in
//! the supported set, the answer is translated into the question's language.
//! Nothing here fails a turn: undetectable text or a failed translation both
//! leave the answer as generated.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bounded::bounded;
use crate::error::RagError;
use crate::generation::{LanguageModel, Prompt};

/// Guesses the ISO 639-1 code of a text, or `None` when unsure.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> Option<String>;
}

/// `translate(text, target_language) -> text`.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String>;
}

/// Result of [`LanguageNormalizer::normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub answer: String,
    /// `(from, to)` when the answer was translated.
    pub translated_from: Option<(String, String)>,
}

impl Normalized {
    fn unchanged(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            translated_from: None,
        }
    }
}

pub struct LanguageNormalizer {
    detector: Arc<dyn LanguageDetector>,
    translator: Arc<dyn Translator>,
    supported: Vec<String>,
    call_timeout: Duration,
}

impl LanguageNormalizer {
    /// `supported` empty means any detected pair is translated.
    pub fn new(
        detector: Arc<dyn LanguageDetector>,
        translator: Arc<dyn Translator>,
        supported: Vec<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            detector,
            translator,
            supported: supported.into_iter().map(|l| l.to_lowercase()).collect(),
            call_timeout,
        }
    }

    fn is_supported(&self, lang: &str) -> bool {
        self.supported.is_empty() || self.supported.iter().any(|l| l == lang)
    }

    pub async fn normalize(&self, question: &str, answer: &str, cancel: &CancellationToken) -> Normalized {
        let (Some(q_lang), Some(a_lang)) = (self.detector.detect(question), self.detector.detect(answer)) else {
            tracing::debug!("language not detected, answer left as is");
            return Normalized::unchanged(answer);
        };
        if q_lang == a_lang || !self.is_supported(&q_lang) || !self.is_supported(&a_lang) {
            return Normalized::unchanged(answer);
        }

        let outcome = match bounded(
            "translate",
            self.call_timeout,
            cancel,
            self.translator.translate(answer, &q_lang),
        )
        .await
        {
            Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
            Ok(Ok(_)) => Err(RagError::Translation("empty translation".to_string())),
            Ok(Err(e)) => Err(RagError::Translation(e.to_string())),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(text) => {
                tracing::info!(from = %a_lang, to = %q_lang, "translated answer");
                Normalized {
                    answer: text,
                    translated_from: Some((a_lang, q_lang)),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "translation failed, returning untranslated answer");
                Normalized::unchanged(answer)
            }
        }
    }
}

/// [`Translator`] backed by a chat model at temperature 0.
pub struct ModelTranslator {
    model: Arc<dyn LanguageModel>,
}

impl ModelTranslator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

/// English name for the codes the translation instruction is likely to see.
fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "it" => "Italian",
        "pt" => "Portuguese",
        "nl" => "Dutch",
        other => other,
    }
}

#[async_trait]
impl Translator for ModelTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String> {
        let prompt = Prompt {
            system: format!(
                "Translate the user's text into {}. Reply with the translation only.",
                language_name(target_language)
            ),
            history: Vec::new(),
            context: Vec::new(),
            question: text.to_string(),
        };
        let out = self.model.generate(&prompt, 0.0).await?;
        Ok(out.trim().to_string())
    }
}
