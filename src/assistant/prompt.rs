//! Chat request construction
//!
//! Each turn is a fresh two-message conversation: the persona system prompt
//! and the user's transcript. When the transcript mentions a trigger keyword,
//! the configured reference material is appended to the user message.

use std::fmt::Write;

use serde::Serialize;

use crate::Result;
use crate::config::KnowledgeConfig;

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    /// System message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// User message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Reference material gated by trigger keywords
#[derive(Debug, Clone)]
pub struct Knowledge {
    triggers: Vec<String>,
    text: String,
}

impl Knowledge {
    /// Create from trigger keywords and reference text
    #[must_use]
    pub fn new(triggers: Vec<String>, text: impl Into<String>) -> Self {
        Self {
            triggers: triggers.into_iter().map(|t| t.to_lowercase()).collect(),
            text: text.into(),
        }
    }

    /// Load the reference text from the configured file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub fn load(config: &KnowledgeConfig) -> Result<Self> {
        let text = std::fs::read_to_string(&config.path)?;
        tracing::debug!(
            path = %config.path.display(),
            chars = text.len(),
            triggers = ?config.triggers,
            "loaded knowledge"
        );
        Ok(Self::new(config.triggers.clone(), text))
    }

    /// Whether any trigger appears as a word of the transcript
    #[must_use]
    pub fn matches(&self, transcript: &str) -> bool {
        // Strip punctuation and split into clean tokens
        let lower = transcript.to_lowercase();
        let tokens: Vec<&str> = lower
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty())
            .collect();

        self.triggers.iter().any(|trigger| {
            if trigger.contains(' ') {
                lower.contains(trigger.as_str())
            } else {
                tokens.iter().any(|t| t.starts_with(trigger.as_str()))
            }
        })
    }
}

/// Builds the message list for a turn
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    knowledge: Option<Knowledge>,
}

impl PromptBuilder {
    /// Create a builder with the persona prompt
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            knowledge: None,
        }
    }

    /// Attach trigger-gated reference material
    #[must_use]
    pub fn with_knowledge(mut self, knowledge: Knowledge) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Messages for a transcript
    #[must_use]
    pub fn build(&self, transcript: &str) -> Vec<ChatMessage> {
        let mut user = transcript.to_string();

        if let Some(knowledge) = self.knowledge.as_ref().filter(|k| k.matches(transcript)) {
            tracing::debug!("transcript matched knowledge trigger");
            let _ = write!(user, "\n\nReference material:\n{}", knowledge.text);
        }

        vec![ChatMessage::system(&self.system_prompt), ChatMessage::user(user)]
    }
}
