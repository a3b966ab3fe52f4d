//! Provider profiles and frame parsing.
//!
//! LM Studio, Ollama and generic OpenAI-compatible servers differ only in
//! framing, endpoint paths and where the text lives in each JSON payload.
//! A [`ProviderProfile`] captures those differences as data so one
//! accumulator serves every provider.
//!
//! Field locations are JSON pointers (RFC 6901). When several are listed,
//! the first one holding a non-empty string wins.

use serde_json::Value;
use tracing::debug;

use crate::client::ClientError;
use crate::frame::{is_done_marker, Framing};
use crate::model::{Delta, ModelInfo, StreamResult};
use crate::options::ProviderKind;

/// Protocol description of one provider family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub kind: ProviderKind,

    /// Framing of streamed response bodies
    pub framing: Framing,

    /// Chat endpoint, relative to the base URL
    pub chat_path: &'static str,

    /// Model listing endpoint, relative to the base URL
    pub models_path: &'static str,

    /// Content text in a streamed frame
    pub stream_content: &'static [&'static str],

    /// Reasoning text in a streamed frame
    pub stream_reasoning: &'static [&'static str],

    /// Boolean completion flag carried inline in a frame, if any
    pub done_flag: Option<&'static str>,

    /// Content text in a non-streamed response
    pub response_content: &'static [&'static str],

    /// Reasoning text in a non-streamed response
    pub response_reasoning: &'static [&'static str],

    /// Error text reported in place of a reply, streamed or not
    pub error_message: &'static [&'static str],

    /// Array of models in the listing response
    pub models_list: &'static str,

    /// Model identifier within one listing entry
    pub model_id: &'static str,
}

impl ProviderProfile {
    /// OpenAI Chat Completions over SSE, as served by LM Studio.
    pub fn lm_studio() -> Self {
        Self {
            kind: ProviderKind::LmStudio,
            ..Self::openai_compatible()
        }
    }

    /// Ollama's native `/api/chat` with NDJSON framing.
    pub fn ollama() -> Self {
        Self {
            kind: ProviderKind::Ollama,
            framing: Framing::Ndjson,
            chat_path: "/api/chat",
            models_path: "/api/tags",
            stream_content: &["/message/content"],
            stream_reasoning: &["/message/reasoning_content", "/message/thinking"],
            done_flag: Some("/done"),
            response_content: &["/message/content"],
            response_reasoning: &["/message/reasoning_content", "/message/thinking"],
            error_message: &["/error", "/error/message"],
            models_list: "/models",
            model_id: "/name",
        }
    }

    /// Any server implementing OpenAI Chat Completions.
    pub fn openai_compatible() -> Self {
        Self {
            kind: ProviderKind::OpenAiCompatible,
            framing: Framing::Sse,
            chat_path: "/v1/chat/completions",
            models_path: "/v1/models",
            stream_content: &["/choices/0/delta/content"],
            stream_reasoning: &[
                "/choices/0/delta/reasoning_content",
                "/choices/0/delta/reasoning",
            ],
            done_flag: None,
            response_content: &["/choices/0/message/content"],
            response_reasoning: &[
                "/choices/0/message/reasoning_content",
                "/choices/0/message/reasoning",
            ],
            error_message: &["/error/message", "/error"],
            models_list: "/data",
            model_id: "/id",
        }
    }

    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::LmStudio => Self::lm_studio(),
            ProviderKind::Ollama => Self::ollama(),
            ProviderKind::OpenAiCompatible => Self::openai_compatible(),
        }
    }

    /// Turn one frame into a [`Delta`].
    ///
    /// Returns `Ok(None)` when the frame is not valid JSON; such frames are
    /// dropped without ending the stream. Missing or non-string fields read
    /// as empty text. A frame carrying an error message fails with
    /// [`ClientError::ProviderError`].
    pub fn parse_frame(&self, frame: &str) -> Result<Option<Delta>, ClientError> {
        if self.framing == Framing::Sse && is_done_marker(frame) {
            return Ok(Some(Delta::done()));
        }

        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, frame, "Dropping malformed frame");
                return Ok(None);
            }
        };

        self.check_error(&value)?;

        let done = self
            .done_flag
            .and_then(|path| value.pointer(path))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Some(Delta {
            content: first_text(&value, self.stream_content),
            reasoning: first_text(&value, self.stream_reasoning),
            done,
        }))
    }

    /// Extract the result of a non-streamed response.
    pub fn parse_response(&self, value: &Value) -> Result<StreamResult, ClientError> {
        self.check_error(value)?;

        let reasoning = first_text(value, self.response_reasoning);

        Ok(StreamResult {
            content: first_text(value, self.response_content),
            reasoning: Some(reasoning).filter(|r| !r.is_empty()),
        })
    }

    fn check_error(&self, value: &Value) -> Result<(), ClientError> {
        let message = first_text(value, self.error_message);
        if message.is_empty() {
            Ok(())
        } else {
            Err(ClientError::ProviderError(message))
        }
    }

    /// Extract the model listing. Entries without an identifier are skipped.
    pub fn parse_models(&self, value: &Value) -> Vec<ModelInfo> {
        value
            .pointer(self.models_list)
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.pointer(self.model_id).and_then(Value::as_str))
                    .map(|id| ModelInfo { id: id.to_string() })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn first_text(value: &Value, paths: &[&str]) -> String {
    paths
        .iter()
        .filter_map(|path| value.pointer(path).and_then(Value::as_str))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
        .to_string()
}
