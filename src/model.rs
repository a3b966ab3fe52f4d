//! Common data models for chat requests and streamed responses.

use serde::{Deserialize, Serialize};

/// Role of the message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Request body POSTed to the provider's chat endpoint.
///
/// The same shape is accepted by OpenAI-compatible servers (LM Studio
/// included) and by Ollama's `/api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub stream: bool,
}

/// One increment of a streaming response, extracted from a single frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// New content text, possibly empty.
    pub content: String,

    /// New reasoning ("thinking") text, possibly empty.
    pub reasoning: String,

    /// The frame signalled the end of the stream.
    pub done: bool,
}

impl Delta {
    /// A delta carrying only the end-of-stream signal.
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    /// Whether the delta carries any text.
    pub fn has_text(&self) -> bool {
        !self.content.is_empty() || !self.reasoning.is_empty()
    }
}

/// Final output of a completed request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResult {
    pub content: String,

    /// `None` when the provider never sent reasoning text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// A model advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
}
