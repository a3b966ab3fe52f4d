//! Stream accumulation: the read loop behind a streamed chat reply.
//!
//! Chunks are appended to a byte buffer that [`FrameSplitter`] cuts into
//! frames, and [`ProviderProfile::parse_frame`] turns each frame into a
//! [`Delta`].
//!
//! [`StreamAccumulator`] then appends every delta and hands the new token
//! slices to the caller's callback.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::future::Future;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::ClientError;
use crate::frame::FrameSplitter;
use crate::model::{Delta, StreamResult};
use crate::profile::ProviderProfile;

/// Per-delta callback: `(content_token, reasoning_token)`.
///
/// The content token may be empty; the reasoning token is `None` when the
/// delta carried no reasoning text.
pub type TokenCallback<'a> = dyn FnMut(&str, Option<&str>) + Send + 'a;

/// Running content and reasoning text of one response.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    reasoning: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and fire the callback with exactly its new text.
    ///
    /// Deltas without text are not reported.
    pub fn apply(&mut self, delta: &Delta, on_token: Option<&mut TokenCallback<'_>>) {
        if !delta.has_text() {
            return;
        }

        self.content.push_str(&delta.content);
        self.reasoning.push_str(&delta.reasoning);

        if let Some(on_token) = on_token {
            let reasoning = (!delta.reasoning.is_empty()).then_some(delta.reasoning.as_str());
            on_token(&delta.content, reasoning);
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn finish(self) -> StreamResult {
        StreamResult {
            content: self.content,
            reasoning: Some(self.reasoning).filter(|r| !r.is_empty()),
        }
    }
}

/// Drive a response body to completion.
///
/// The loop ends on a `done` delta (remaining chunks are never read), on
/// source exhaustion, on a transport or provider error, or on
/// cancellation. Once `cancel` fires no further callbacks are made and the
/// call fails with [`ClientError::StreamCancelled`]; partial text is
/// discarded.
pub async fn accumulate<S>(
    source: S,
    profile: &ProviderProfile,
    mut on_token: Option<&mut TokenCallback<'_>>,
    cancel: &CancellationToken,
) -> Result<StreamResult, ClientError>
where
    S: Stream<Item = Result<Bytes, ClientError>> + Send,
{
    futures::pin_mut!(source);

    let mut splitter = FrameSplitter::new(profile.framing);
    let mut buffer = BytesMut::new();
    let mut accumulator = StreamAccumulator::new();
    let mut exhausted = false;
    let mut skipped = 0usize;

    loop {
        let frame = if exhausted {
            splitter.decode_eof(&mut buffer)?
        } else {
            splitter.decode(&mut buffer)?
        };

        let Some(frame) = frame else {
            if exhausted {
                debug!(
                    content_len = accumulator.content().len(),
                    skipped,
                    "Stream ended without a completion marker"
                );
                return Ok(accumulator.finish());
            }

            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(&accumulator)),
                chunk = source.next() => chunk,
            };

            match chunk {
                Some(chunk) => buffer.extend_from_slice(&chunk?),
                None => exhausted = true,
            }
            continue;
        };

        if cancel.is_cancelled() {
            return Err(cancelled(&accumulator));
        }

        let Some(delta) = profile.parse_frame(&frame)? else {
            skipped += 1;
            continue;
        };

        accumulator.apply(&delta, on_token.as_deref_mut());

        if delta.done {
            debug!(
                content_len = accumulator.content().len(),
                reasoning_len = accumulator.reasoning().len(),
                skipped,
                "Stream finished"
            );
            return Ok(accumulator.finish());
        }
    }
}

/// Await `future` unless `cancel` fires first.
pub(crate) async fn until_cancelled<F, T>(
    cancel: &CancellationToken,
    future: F,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::StreamCancelled),
        result = future => result,
    }
}

fn cancelled(accumulator: &StreamAccumulator) -> ClientError {
    debug!(
        content_len = accumulator.content().len(),
        "Stream cancelled by caller"
    );
    ClientError::StreamCancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use proptest::prelude::*;
    use serde_json::json;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, ClientError>> + Send {
        let owned: Vec<Result<Bytes, ClientError>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(owned)
    }

    async fn collect(
        source: impl Stream<Item = Result<Bytes, ClientError>> + Send,
        profile: &ProviderProfile,
        cancel: &CancellationToken,
    ) -> (Result<StreamResult, ClientError>, Vec<(String, Option<String>)>) {
        let mut tokens = Vec::new();
        let mut on_token = |content: &str, reasoning: Option<&str>| {
            tokens.push((content.to_string(), reasoning.map(str::to_string)));
        };
        let result = accumulate(source, profile, Some(&mut on_token), cancel).await;
        (result, tokens)
    }

    #[tokio::test]
    async fn test_sse_hello() {
        let source = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
            "data: [DONE]\n",
        ]);

        let (result, tokens) = collect(
            source,
            &ProviderProfile::openai_compatible(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            result.unwrap(),
            StreamResult {
                content: "Hello".to_string(),
                reasoning: None,
            }
        );
        assert_eq!(
            tokens,
            vec![("Hel".to_string(), None), ("lo".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn test_sse_reasoning_and_content_channels() {
        let source = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"Let me \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"think.\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"42\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);

        let (result, tokens) = collect(
            source,
            &ProviderProfile::lm_studio(),
            &CancellationToken::new(),
        )
        .await;

        let result = result.unwrap();
        assert_eq!(result.content, "42");
        assert_eq!(result.reasoning.as_deref(), Some("Let me think."));
        assert_eq!(
            tokens,
            vec![
                (String::new(), Some("Let me ".to_string())),
                (String::new(), Some("think.".to_string())),
                ("42".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_ndjson_stops_at_done() {
        let source = chunks(&[
            "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"!\"},\"done\":true}\n",
            "{\"message\":{\"content\":\" ignored\"},\"done\":false}\n",
        ]);

        let (result, tokens) = collect(
            source,
            &ProviderProfile::ollama(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.unwrap().content, "Hi!");
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_done_stops_reading_the_source() {
        let mut pulled = 0usize;
        let frames = vec![
            "{\"message\":{\"content\":\"a\"},\"done\":true}\n",
            "{\"message\":{\"content\":\"b\"},\"done\":false}\n",
        ];
        let source = stream::iter(frames).map(move |frame| {
            pulled += 1;
            assert_eq!(pulled, 1, "chunk after done was read");
            Ok(Bytes::from(frame))
        });

        let result = accumulate(
            source,
            &ProviderProfile::ollama(),
            None,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.unwrap().content, "a");
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let source = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n",
            "data: [DONE]\n",
        ]);

        let (result, tokens) = collect(
            source,
            &ProviderProfile::openai_compatible(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.unwrap().content, "AB");
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_without_marker_completes() {
        // Final line has no trailing newline.
        let source = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"y\"}}]}",
        ]);

        let (result, _) = collect(
            source,
            &ProviderProfile::openai_compatible(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.unwrap().content, "xy");
    }

    #[tokio::test]
    async fn test_frames_and_characters_split_across_chunks() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9} \u{1F600}\"}}]}\ndata: [DONE]\n";
        let bytes = body.as_bytes();
        let parts: Vec<Result<Bytes, ClientError>> = bytes
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let (result, tokens) = collect(
            stream::iter(parts),
            &ProviderProfile::openai_compatible(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.unwrap().content, "caf\u{e9} \u{1F600}");
        assert_eq!(tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_n_frames() {
        let cancel = CancellationToken::new();
        let source = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"1\"}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"2\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"3\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"4\"}}]}\n",
            "data: [DONE]\n",
        ]);

        let mut calls = 0usize;
        let trigger = cancel.clone();
        let mut on_token = |_: &str, _: Option<&str>| {
            calls += 1;
            if calls == 1 {
                trigger.cancel();
            }
        };

        let result = accumulate(
            source,
            &ProviderProfile::openai_compatible(),
            Some(&mut on_token),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(ClientError::StreamCancelled)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_chunk() {
        let cancel = CancellationToken::new();
        let first = stream::iter(vec![Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
        ))]);
        let source = first.chain(stream::pending());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let (result, tokens) = collect(source, &ProviderProfile::openai_compatible(), &cancel).await;

        assert!(matches!(result, Err(ClientError::StreamCancelled)));
        assert_eq!(tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n")),
            Err(ClientError::Config("connection reset".to_string())),
        ]);

        let result = accumulate(
            source,
            &ProviderProfile::openai_compatible(),
            None,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_ndjson_error_line_fails_the_stream() {
        let source = chunks(&[
            "{\"message\":{\"content\":\"Par\"},\"done\":false}\n",
            "{\"error\":\"model runner has unexpectedly stopped\"}\n",
            "{\"message\":{\"content\":\"tial\"},\"done\":true}\n",
        ]);

        let (result, tokens) = collect(
            source,
            &ProviderProfile::ollama(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(ClientError::ProviderError(ref m)) if m == "model runner has unexpectedly stopped"
        ));
        assert_eq!(tokens, vec![("Par".to_string(), None)]);
    }

    #[tokio::test]
    async fn test_sse_error_event_fails_the_stream() {
        let source = chunks(&[
            "data: {\"error\":{\"message\":\"context length exceeded\",\"code\":400}}\n\n",
            "data: [DONE]\n\n",
        ]);

        let (result, tokens) = collect(
            source,
            &ProviderProfile::lm_studio(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(ClientError::ProviderError(ref m)) if m == "context length exceeded"
        ));
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_accumulator_ignores_empty_deltas() {
        let mut accumulator = StreamAccumulator::new();
        let mut calls = 0;
        let mut on_token = |_: &str, _: Option<&str>| calls += 1;

        accumulator.apply(&Delta::default(), Some(&mut on_token));
        accumulator.apply(
            &Delta {
                content: "a".to_string(),
                reasoning: "r".to_string(),
                done: false,
            },
            Some(&mut on_token),
        );

        assert_eq!(calls, 1);
        assert_eq!(
            accumulator.finish(),
            StreamResult {
                content: "a".to_string(),
                reasoning: Some("r".to_string()),
            }
        );
    }

    type Token = (String, Option<String>);

    fn block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    /// Cut `body` into chunks at arbitrary byte offsets.
    fn cut(body: &[u8], cuts: &[prop::sample::Index]) -> Vec<Result<Bytes, ClientError>> {
        let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(body.len() + 1)).collect();
        offsets.push(0);
        offsets.push(body.len());
        offsets.sort_unstable();
        offsets.dedup();

        offsets
            .windows(2)
            .map(|w| Ok(Bytes::copy_from_slice(&body[w[0]..w[1]])))
            .collect()
    }

    /// Result and callback sequence a well-behaved accumulator must produce.
    fn expected(deltas: &[(String, String, bool)]) -> (StreamResult, Vec<Token>) {
        let mut content = String::new();
        let mut reasoning = String::new();
        let mut tokens = Vec::new();

        for (c, r, _) in deltas {
            content.push_str(c);
            reasoning.push_str(r);
            if !c.is_empty() || !r.is_empty() {
                tokens.push((c.clone(), (!r.is_empty()).then(|| r.clone())));
            }
        }

        let result = StreamResult {
            content,
            reasoning: Some(reasoning).filter(|r| !r.is_empty()),
        };
        (result, tokens)
    }

    fn sse_body(deltas: &[(String, String, bool)]) -> Vec<u8> {
        let mut body = String::new();
        for (content, reasoning, malformed_before) in deltas {
            if *malformed_before {
                body.push_str("data: {\"choices\":[{\"delta\":{\"content\":\n\n");
            }
            let frame = json!({
                "choices": [{"delta": {"content": content, "reasoning_content": reasoning}}]
            });
            body.push_str(&format!("data: {frame}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body.into_bytes()
    }

    fn ndjson_body(deltas: &[(String, String, bool)]) -> Vec<u8> {
        let mut body = String::new();
        for (content, thinking, malformed_before) in deltas {
            if *malformed_before {
                body.push_str("{\"message\":{\"content\":\n");
            }
            let line = json!({
                "message": {"role": "assistant", "content": content, "thinking": thinking},
                "done": false
            });
            body.push_str(&format!("{line}\n"));
        }
        body.push_str("{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n");
        // Must never be parsed: either line would change the outcome.
        body.push_str("{\"message\":{\"content\":\"after done\"},\"done\":false}\n");
        body.push_str("{\"error\":\"read past done\"}\n");
        body.into_bytes()
    }

    fn delta_specs() -> impl Strategy<Value = Vec<(String, String, bool)>> {
        prop::collection::vec(("\\PC{0,6}", "\\PC{0,4}", any::<bool>()), 0..12)
    }

    proptest! {
        // SSE content and reasoning are the in-order concatenation of every
        // delta, however the body is chunked and wherever malformed frames sit.
        #[test]
        fn prop_sse_accumulates_every_delta(
            deltas in delta_specs(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let source = stream::iter(cut(&sse_body(&deltas), &cuts));
            let (result, tokens) = block_on(collect(
                source,
                &ProviderProfile::openai_compatible(),
                &CancellationToken::new(),
            ));

            let (want, want_tokens) = expected(&deltas);
            prop_assert_eq!(result.unwrap(), want);
            prop_assert_eq!(tokens, want_tokens);
        }

        // NDJSON stops at the `done: true` line; nothing after it is parsed.
        #[test]
        fn prop_ndjson_stops_at_done(
            deltas in delta_specs(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let source = stream::iter(cut(&ndjson_body(&deltas), &cuts));
            let (result, tokens) = block_on(collect(
                source,
                &ProviderProfile::ollama(),
                &CancellationToken::new(),
            ));

            let (want, want_tokens) = expected(&deltas);
            prop_assert_eq!(result.unwrap(), want);
            prop_assert_eq!(tokens, want_tokens);
        }
    }
}
