//! Client configuration and the persisted provider settings record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::client::ClientError;
use crate::profile::ProviderProfile;

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Which kind of local server the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    LmStudio,
    Ollama,
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

impl ProviderKind {
    /// Default base URL of a locally running server.
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::LmStudio => "http://localhost:1234",
            ProviderKind::Ollama => "http://localhost:11434",
            ProviderKind::OpenAiCompatible => "http://localhost:8080",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lm-studio" | "lmstudio" => Ok(ProviderKind::LmStudio),
            "ollama" => Ok(ProviderKind::Ollama),
            "openai-compatible" | "openai" => Ok(ProviderKind::OpenAiCompatible),
            other => Err(ClientError::Config(format!("unknown provider: {other}"))),
        }
    }
}

/// Transport-level options for a [`ChatClient`](crate::client::ChatClient).
///
/// # Example
/// ```rust
/// use chatwire::options::{ClientOptions, ProviderKind};
/// use std::time::Duration;
///
/// let options = ClientOptions::for_kind(ProviderKind::Ollama)
///     .with_timeout(Duration::from_secs(120));
/// assert_eq!(options.base_url, "http://localhost:11434");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Server root, without a trailing path (e.g. `http://localhost:1234`)
    pub base_url: String,

    /// Sent as a bearer token when present
    pub api_key: Option<SecretString>,

    /// Overall request timeout. Streams have none unless set here.
    pub timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn for_kind(kind: ProviderKind) -> Self {
        Self::new(kind.default_base_url())
    }

    pub fn with_api_key(mut self, api_key: impl Into<SecretString>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }

    /// Join the base URL and an endpoint path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Persisted provider selection, as stored by the settings layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    pub provider: ProviderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderSettings {
    /// Read settings from `CHATWIRE_*` environment variables.
    ///
    /// Unset variables fall back to defaults; an unknown provider name is
    /// a configuration error.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let provider = match lookup("CHATWIRE_PROVIDER") {
            Some(name) => name.parse()?,
            None => ProviderKind::default(),
        };

        Ok(Self {
            provider,
            base_url: lookup("CHATWIRE_BASE_URL").filter(|s| !s.is_empty()),
            api_key: lookup("CHATWIRE_API_KEY")
                .filter(|s| !s.is_empty())
                .map(SecretString::new),
            model: lookup("CHATWIRE_MODEL").filter(|s| !s.is_empty()),
        })
    }

    /// Split into the profile and options a client is built from.
    pub fn into_client_parts(self) -> (ProviderProfile, ClientOptions) {
        let mut options = ClientOptions::for_kind(self.provider);
        if let Some(base_url) = self.base_url {
            options.base_url = base_url;
        }
        options.api_key = self.api_key;

        (ProviderProfile::for_kind(self.provider), options)
    }
}
