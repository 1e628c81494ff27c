//! Streamed reply consumption
//!
//! Chat completions are requested with `stream: true`; the response body is a
//! sequence of server-sent `data: {json}` lines ending with `data: [DONE]`.
//! [`ReplyStream`] turns that body into ordered text fragments.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::prompt::ChatMessage;
use crate::{Error, Result};

/// Opens a reply stream for a message list
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Start generating a reply
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] if the stream cannot be opened
    async fn open(&self, messages: &[ChatMessage]) -> Result<ReplyStream>;
}

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Text increment
    Fragment(String),
    /// End-of-stream sentinel
    Done,
}

#[derive(Deserialize)]
struct ChunkFrame {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental `text/event-stream` line decoder
///
/// Bytes are buffered until a full line is available, so frames (and UTF-8
/// sequences) split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Feed a chunk, returning the events it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            events.extend(decode_line(&line));
        }
        events
    }

    /// Decode whatever is left once the body has ended
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.pending);
        decode_line(&line).into_iter().collect()
    }
}

/// Decode a single line; malformed or irrelevant lines yield nothing
fn decode_line(line: &[u8]) -> Option<SseEvent> {
    let Ok(line) = std::str::from_utf8(line) else {
        tracing::trace!(bytes = line.len(), "skipping undecodable line");
        return None;
    };
    let line = line.trim_end_matches(['\r', '\n']);

    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }

    match parse_frame(payload) {
        Ok(content) => content.map(SseEvent::Fragment),
        Err(e) => {
            tracing::trace!(error = %e, "skipping malformed frame");
            None
        }
    }
}

/// Text increment carried by one JSON frame, if any
fn parse_frame(payload: &str) -> Result<Option<String>> {
    let frame: ChunkFrame = serde_json::from_str(payload)?;
    Ok(frame
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Lazy, ordered, finite sequence of reply fragments
///
/// Ends at the `[DONE]` sentinel or when the body closes. Not restartable.
pub struct ReplyStream {
    body: ByteStream,
    decoder: SseDecoder,
    ready: VecDeque<SseEvent>,
    done: bool,
}

impl ReplyStream {
    /// Wrap a raw event-stream body
    pub fn from_body<S, B, E>(body: S) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let body = body.map(|chunk| {
            chunk
                .map(|bytes| bytes.as_ref().to_vec())
                .map_err(|e| Error::Generation(e.to_string()))
        });
        Self {
            body: Box::pin(body),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }

    /// Next text fragment, or `None` once the stream has completed
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] if the connection fails mid-stream
    pub async fn next_fragment(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                match event {
                    SseEvent::Fragment(text) => return Ok(Some(text)),
                    SseEvent::Done => {
                        self.finish();
                        return Ok(None);
                    }
                }
            }

            if self.done {
                return Ok(None);
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.ready.extend(self.decoder.feed(&chunk)),
                Some(Err(e)) => {
                    self.finish();
                    return Err(e);
                }
                None => {
                    self.done = true;
                    self.ready.extend(self.decoder.finish());
                    tracing::debug!("reply body closed");
                }
            }
        }
    }

    /// Whether the end of stream has been reached
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done && self.ready.is_empty()
    }

    fn finish(&mut self) {
        self.done = true;
        self.ready.clear();
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// Streams chat completions from an OpenAI-compatible `/chat/completions`
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl ChatClient {
    /// Create a new chat client
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ReplyGenerator for ChatClient {
    async fn open(&self, messages: &[ChatMessage]) -> Result<ReplyStream> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "chat request failed");
            Error::Generation(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Generation(format!("chat API error {status}: {body}")));
        }

        tracing::debug!(model = %self.model, "reply stream opened");
        Ok(ReplyStream::from_body(response.bytes_stream()))
    }
}
