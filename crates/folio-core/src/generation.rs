//! Language-model capability and prompt composition.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ConversationTurn, Role};

/// System instruction used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant that answers questions about a \
collection of documents. Answer using only the provided passages and the conversation so far. \
If the passages do not contain the answer, say that you don't know.";

/// One chat message, in the shape chat-completion APIs expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Everything a model sees for one turn.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    /// Turns preceding the current question, oldest first.
    pub history: Vec<ConversationTurn>,
    /// Retrieved passages, best first.
    pub context: Vec<String>,
    pub question: String,
}

impl Prompt {
    /// Chat form: system (with passages), then history, then the question.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        let mut system = self.system.clone();
        if !self.context.is_empty() {
            system.push_str("\n\nPassages:\n");
            for (i, passage) in self.context.iter().enumerate() {
                system.push_str(&format!("\n[{}] {}\n", i + 1, passage.trim()));
            }
        }
        messages.push(ChatMessage::new("system", system));
        for turn in &self.history {
            messages.push(ChatMessage::new(turn.role.as_str(), turn.text.clone()));
        }
        messages.push(ChatMessage::new("user", self.question.clone()));
        messages
    }

    /// Flat text form, for completion-style models.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.system);
        out.push_str("\n\n");
        if !self.context.is_empty() {
            out.push_str("Passages:\n");
            for (i, passage) in self.context.iter().enumerate() {
                out.push_str(&format!("[{}] {}\n", i + 1, passage.trim()));
            }
            out.push('\n');
        }
        if !self.history.is_empty() {
            out.push_str("Conversation:\n");
            for turn in &self.history {
                let speaker = match turn.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                out.push_str(&format!("{}: {}\n", speaker, turn.text));
            }
            out.push('\n');
        }
        out.push_str(&format!("Question: {}\nAnswer:", self.question));
        out
    }
}

/// A text generation service: `generate(prompt, temperature) -> text`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &Prompt, temperature: f32) -> Result<String>;
}
