//! HTTP transport for talking to local LLM servers.
//!
//! The chat client only needs three things from the network: a POST whose
//! body arrives as a stream of byte chunks, a POST with a JSON reply, and a
//! GET with a JSON reply. [`Transport`] names that contract so the client
//! can be driven by something other than `reqwest` in tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

use crate::client::ClientError;
use crate::options::{ClientOptions, SecretString};

/// Ordered response body chunks, ending with the end of the body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Network operations the chat client depends on.
///
/// Implementations must fail with [`ClientError::Status`] on a non-success
/// status without yielding any body data.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` and expose the response body as it arrives.
    async fn post_stream(&self, url: &str, body: &Value) -> Result<ByteStream, ClientError>;

    /// POST `body` and parse the whole response as one JSON document.
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ClientError>;

    /// GET `url` and parse the response as JSON.
    async fn get_json(&self, url: &str) -> Result<Value, ClientError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    api_key: Option<SecretString>,
    extra_headers: Option<HashMap<String, String>>,
}

impl HttpTransport {
    pub fn new(options: &ClientOptions) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(options)?,
            api_key: options.api_key.clone(),
            extra_headers: options.extra_headers.clone(),
        })
    }

    fn prepare(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(api_key) = &self.api_key {
            request = request.header(
                AUTHORIZATION,
                format!("Bearer {}", api_key.expose_secret()),
            );
        }
        add_extra_headers(request, &self.extra_headers)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = self.prepare(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(handle_error_response(status, &body));
        }

        Ok(response)
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value, ClientError> {
        let bytes = self.send(request).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_stream(&self, url: &str, body: &Value) -> Result<ByteStream, ClientError> {
        let request = self.client.post(url).json(body);

        let response = self.send(request).await?;
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ClientError::from)),
        ))
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ClientError> {
        let request = self.client.post(url).json(body);

        self.send_json(request).await
    }

    async fn get_json(&self, url: &str) -> Result<Value, ClientError> {
        self.send_json(self.client.get(url)).await
    }
}

/// Build a configured HTTP client from client options.
///
/// This applies the timeout and proxy settings.
pub fn build_http_client(options: &ClientOptions) -> Result<Client, ClientError> {
    let mut builder = Client::builder();

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &options.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }

    Ok(builder.build()?)
}

/// Add extra headers to a request if any are configured.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// Map a non-success response to [`ClientError::Status`].
///
/// OpenAI-compatible servers report `{"error": {"message": ...}}`, Ollama
/// reports `{"error": "..."}`. Anything else is passed through as text.
fn handle_error_response(status: reqwest::StatusCode, body: &str) -> ClientError {
    let message = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            error: ErrorBody::Detailed { message },
        }) => message,
        Ok(ErrorResponse {
            error: ErrorBody::Plain(message),
        }) => message,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => body.trim().to_string(),
    };

    ClientError::Status {
        status: status.as_u16(),
        message,
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Detailed { message: String },
    Plain(String),
}
