//! Interactive chat against a local server, streaming replies to stdout.
//!
//! Run with:
//! ```bash
//! export CHATWIRE_PROVIDER=ollama      # lm-studio | ollama | openai-compatible
//! export CHATWIRE_MODEL=llama3
//! RUST_LOG=chatwire=debug cargo run --example local_chat
//! ```
//!
//! Press Ctrl-C while a reply is streaming to cancel it.

use std::io::{BufRead, Write};

use chatwire::options::ProviderSettings;
use chatwire::{CancellationToken, ChatClient, Message};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = ProviderSettings::from_env()?;
    let client = ChatClient::from_settings(settings.clone())?;

    let model = match settings.model {
        Some(model) => model,
        None => {
            let models = client.list_models(None).await?;
            let first = models.first().ok_or("server has no models; set CHATWIRE_MODEL")?;
            first.id.clone()
        }
    };
    println!("Chatting with {model} via {:?}. Empty line quits.\n", settings.provider);

    let mut history = Vec::new();
    let stdin = std::io::stdin();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 || line.trim().is_empty() {
            break;
        }
        history.push(Message::user(line.trim()));

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let mut thinking = false;
        let mut on_token = |content: &str, reasoning: Option<&str>| {
            if let Some(reasoning) = reasoning {
                if !thinking {
                    print!("[thinking] ");
                    thinking = true;
                }
                print!("{reasoning}");
            }
            if !content.is_empty() {
                if thinking {
                    print!("\n\n");
                    thinking = false;
                }
                print!("{content}");
            }
            let _ = std::io::stdout().flush();
        };

        let result = client
            .send_message(&history, &model, Some(&mut on_token), Some(&cancel))
            .await;
        watcher.abort();
        println!();

        match result {
            Ok(reply) => history.push(Message::assistant(reply.content)),
            Err(e) if e.is_cancelled() => {
                println!("(cancelled)");
                history.pop();
            }
            Err(e) => {
                eprintln!("{}", e.user_message().unwrap_or_default());
                history.pop();
            }
        }
    }

    Ok(())
}
