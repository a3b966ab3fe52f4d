//! # chatwire - streaming chat client for local LLM servers
//!
//! A small client for LM Studio, Ollama and other OpenAI-compatible servers
//! that streams a reply as it is generated.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - One stream decoder for every provider, configured by a [`ProviderProfile`]
//! - SSE and newline-delimited JSON framing
//! - Separate content and reasoning ("thinking") channels
//! - Cooperative cancellation via [`CancellationToken`]
//! - Prefixed settings storage with change subscriptions
//!
//! ## Architecture
//!
//! A streamed response passes through four stages:
//!
//! 1. **[`Transport`]** POSTs the request and yields body chunks
//! 2. **[`frame::FrameSplitter`]** cuts the body into SSE events or JSON lines
//! 3. **[`ProviderProfile::parse_frame`]** extracts a [`Delta`] from each frame
//! 4. **[`stream::accumulate`]** appends deltas and reports each new token
//!
//! ## Example
//! ```no_run
//! use chatwire::{ChatClient, CancellationToken, Message};
//! use chatwire::options::{ClientOptions, ProviderKind};
//! use chatwire::profile::ProviderProfile;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ChatClient::new(
//!         ProviderProfile::lm_studio(),
//!         ClientOptions::for_kind(ProviderKind::LmStudio),
//!     )?;
//!
//!     let history = vec![Message::user("Hello!")];
//!     let cancel = CancellationToken::new();
//!     let mut on_token = |content: &str, _reasoning: Option<&str>| print!("{content}");
//!
//!     match client
//!         .send_message(&history, "qwen2.5-7b-instruct", Some(&mut on_token), Some(&cancel))
//!         .await
//!     {
//!         Ok(reply) => println!("\n{:?}", reply),
//!         Err(e) if e.is_cancelled() => {}
//!         Err(e) => eprintln!("{}", e.user_message().unwrap_or_default()),
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod frame;
pub mod http;
pub mod model;
pub mod options;
pub mod profile;
pub mod settings;
pub mod stream;

// Re-exports for convenience
pub use client::{ChatClient, ClientError};
pub use http::{HttpTransport, Transport};
pub use model::{Delta, Message, Role, StreamResult};
pub use profile::ProviderProfile;
pub use stream::TokenCallback;
pub use tokio_util::sync::CancellationToken;
