//! Chat client and error types.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::http::{HttpTransport, Transport};
use crate::model::{ChatRequest, Message, ModelInfo, StreamResult};
use crate::options::{ClientOptions, ProviderSettings};
use crate::profile::ProviderProfile;
use crate::stream::{accumulate, until_cancelled, TokenCallback};

const GENERIC_FAILURE: &str =
    "Failed to get a response from the model. Check that the server is running and try again.";

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// The caller asked for the request to stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::StreamCancelled)
    }

    /// Text suitable for showing to an end user.
    ///
    /// Cancellation is not a failure and yields `None`.
    pub fn user_message(&self) -> Option<String> {
        match self {
            ClientError::StreamCancelled => None,
            ClientError::Config(detail) => Some(format!("Configuration error: {detail}")),
            _ => Some(GENERIC_FAILURE.to_string()),
        }
    }
}

/// Chat client for one provider.
///
/// The provider's protocol comes from its [`ProviderProfile`]; the network
/// comes from a [`Transport`], `reqwest` unless another is injected.
///
/// # Example
/// ```no_run
/// use chatwire::client::ChatClient;
/// use chatwire::model::Message;
/// use chatwire::options::{ClientOptions, ProviderKind};
/// use chatwire::profile::ProviderProfile;
///
/// # async fn run() -> Result<(), chatwire::ClientError> {
/// let client = ChatClient::new(
///     ProviderProfile::ollama(),
///     ClientOptions::for_kind(ProviderKind::Ollama),
/// )?;
///
/// let history = vec![Message::user("Why is the sky blue?")];
/// let mut print = |content: &str, _reasoning: Option<&str>| print!("{content}");
/// let reply = client
///     .send_message(&history, "llama3", Some(&mut print), None)
///     .await?;
/// println!("\n{} characters", reply.content.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChatClient<T = HttpTransport> {
    profile: ProviderProfile,
    options: ClientOptions,
    transport: T,
}

impl ChatClient<HttpTransport> {
    pub fn new(profile: ProviderProfile, options: ClientOptions) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&options)?;
        Ok(Self::with_transport(profile, options, transport))
    }

    /// Build a client from a persisted settings record.
    pub fn from_settings(settings: ProviderSettings) -> Result<Self, ClientError> {
        let (profile, options) = settings.into_client_parts();
        Self::new(profile, options)
    }
}

impl<T: Transport> ChatClient<T> {
    pub fn with_transport(profile: ProviderProfile, options: ClientOptions, transport: T) -> Self {
        Self {
            profile,
            options,
            transport,
        }
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Send the conversation and return the assistant's reply.
    ///
    /// With `on_token` the reply is streamed and the callback receives each
    /// new piece of text as it arrives. Without it a single non-streamed
    /// request is made and the callback machinery is skipped entirely.
    ///
    /// Cancelling `cancel` at any point makes the call fail with
    /// [`ClientError::StreamCancelled`].
    pub async fn send_message(
        &self,
        history: &[Message],
        model: &str,
        on_token: Option<&mut TokenCallback<'_>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<StreamResult, ClientError> {
        if model.trim().is_empty() {
            return Err(ClientError::Config("Model must be specified".to_string()));
        }

        let cancel = cancel.cloned().unwrap_or_else(CancellationToken::new);
        let url = self.options.endpoint(self.profile.chat_path);
        let streaming = on_token.is_some();
        let body = serde_json::to_value(ChatRequest {
            model,
            messages: history,
            stream: streaming,
        })?;

        debug!(
            provider = ?self.profile.kind,
            model,
            messages = history.len(),
            streaming,
            "Sending chat request"
        );

        let result = match on_token {
            Some(on_token) => {
                match until_cancelled(&cancel, self.transport.post_stream(&url, &body)).await {
                    Ok(source) => accumulate(source, &self.profile, Some(on_token), &cancel).await,
                    Err(e) => Err(e),
                }
            }
            None => until_cancelled(&cancel, self.transport.post_json(&url, &body))
                .await
                .and_then(|value| self.profile.parse_response(&value)),
        };

        if let Err(e) = &result {
            if !e.is_cancelled() {
                warn!(error = %e, url = %url, "Chat request failed");
            }
        }

        result
    }

    /// List the models the server advertises.
    pub async fn list_models(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ModelInfo>, ClientError> {
        let cancel = cancel.cloned().unwrap_or_else(CancellationToken::new);
        let url = self.options.endpoint(self.profile.models_path);

        let value = until_cancelled(&cancel, self.transport.get_json(&url)).await?;
        let models = self.profile.parse_models(&value);

        debug!(provider = ?self.profile.kind, count = models.len(), "Listed models");
        Ok(models)
    }
}
