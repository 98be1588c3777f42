//! Chat model transports: Ollama, OpenAI-compatible servers, and an
//! offline mock.

use crate::{
    client::{message_chunk, ChatBackend},
    config::ModelConfig,
    error::Result,
    fragment::FragmentStream,
    message::{Message, Usage},
    stage::BoxFut,
    ChainError,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect()
}

/// POST `body` to `url` and fail on a non-success status.
async fn post_json(
    request: reqwest::RequestBuilder,
    url: &str,
    body: &Value,
) -> Result<Response> {
    let resp = request.json(body).send().await.map_err(|e| {
        ChainError::Other(format!("Failed to connect to model at {}: {}", url, e))
    })?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(ChainError::Model { status, body: text });
    }
    Ok(resp)
}

// -- Ollama --

/// Client for Ollama's `/api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Client,
    config: ModelConfig,
}

impl OllamaBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    /// Reuse an existing HTTP client.
    pub fn with_client(client: Client, config: ModelConfig) -> Self {
        Self { client, config }
    }

    fn url(&self) -> String {
        format!("{}/api/chat", self.config.endpoint())
    }

    fn body(&self, messages: &[Message], stream: bool) -> Value {
        json!({
            "model": self.config.model,
            "messages": wire_messages(messages),
            "stream": stream,
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens,
            },
        })
    }

    async fn send(&self, body: &Value) -> Result<Response> {
        let url = self.url();
        let request = self.client.post(&url).timeout(self.config.timeout);
        post_json(request, &url, body).await
    }
}

fn ollama_usage(json: &Value) -> Option<Usage> {
    let input = json.get("prompt_eval_count")?.as_u64()?;
    let output = json.get("eval_count")?.as_u64()?;
    Some(Usage::new(input, output))
}

/// One decoded NDJSON line of an Ollama stream.
#[derive(Debug, PartialEq)]
struct OllamaLine {
    delta: String,
    usage: Option<Usage>,
    done: bool,
}

fn parse_ollama_line(line: &[u8]) -> Result<Option<OllamaLine>> {
    let text = std::str::from_utf8(line)
        .map_err(|e| ChainError::Other(format!("Ollama stream is not UTF-8: {}", e)))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }
    let json: Value = match serde_json::from_str(text) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed Ollama stream line");
            return Ok(None);
        }
    };
    if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
        return Err(ChainError::Other(format!("Ollama stream error: {}", err)));
    }
    let done = json.get("done").and_then(|v| v.as_bool()).unwrap_or(false);
    Ok(Some(OllamaLine {
        delta: json["message"]["content"].as_str().unwrap_or("").to_string(),
        usage: if done { ollama_usage(&json) } else { None },
        done,
    }))
}

impl ChatBackend for OllamaBackend {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn complete<'a>(&'a self, messages: &'a [Message]) -> BoxFut<'a, Result<Message>> {
        Box::pin(async move {
            let resp = self.send(&self.body(messages, false)).await?;
            let json: Value = resp.json().await?;
            let content = json["message"]["content"]
                .as_str()
                .ok_or_else(|| {
                    ChainError::Other(format!("response has no message content: {}", json))
                })?
                .to_string();
            let mut reply = Message::assistant(content);
            reply.usage = ollama_usage(&json);
            Ok(reply)
        })
    }

    fn complete_stream(&self, messages: Vec<Message>) -> BoxFut<'_, Result<FragmentStream>> {
        Box::pin(async move {
            let resp = self.send(&self.body(&messages, true)).await?;
            let mut bytes = Box::pin(resp.bytes_stream());

            // Lines may straddle network chunks, so bytes are buffered until a newline.
            let stream = async_stream::stream! {
                let mut buf: Vec<u8> = Vec::new();
                let mut first = true;
                loop {
                    let finished = match bytes.next().await {
                        Some(Ok(chunk)) => {
                            buf.extend_from_slice(&chunk);
                            false
                        }
                        Some(Err(e)) => {
                            yield Err(ChainError::Request(e));
                            return;
                        }
                        None => {
                            buf.push(b'\n');
                            true
                        }
                    };

                    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        match parse_ollama_line(&line) {
                            Ok(Some(parsed)) => {
                                let emit = !parsed.delta.is_empty()
                                    || parsed.usage.is_some()
                                    || (parsed.done && first);
                                if emit {
                                    yield Ok(message_chunk(&parsed.delta, first, parsed.usage));
                                    first = false;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }

                    if finished {
                        break;
                    }
                }
            };
            Ok(stream.boxed())
        })
    }
}

// -- OpenAI-compatible --

/// Client for `/chat/completions` on OpenAI and compatible servers.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: Client,
    config: ModelConfig,
}

impl OpenAiBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: ModelConfig) -> Self {
        Self { client, config }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint())
    }

    fn body(&self, messages: &[Message], stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": wire_messages(messages),
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<Response> {
        let url = self.url();
        let mut request = self.client.post(&url).timeout(self.config.timeout);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }
        post_json(request, &url, body).await
    }
}

fn openai_usage(json: &Value) -> Option<Usage> {
    let usage = json.get("usage")?;
    let input = usage.get("prompt_tokens")?.as_u64()?;
    let output = usage.get("completion_tokens")?.as_u64()?;
    Some(Usage::new(input, output))
}

impl ChatBackend for OpenAiBackend {
    fn provider(&self) -> &str {
        "openai"
    }

    fn complete<'a>(&'a self, messages: &'a [Message]) -> BoxFut<'a, Result<Message>> {
        Box::pin(async move {
            let resp = self.send(&self.body(messages, false)).await?;
            let json: Value = resp.json().await?;
            let content = json["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| {
                    ChainError::Other(format!("response has no message content: {}", json))
                })?
                .to_string();
            let mut reply = Message::assistant(content);
            reply.usage = openai_usage(&json);
            Ok(reply)
        })
    }

    fn complete_stream(&self, messages: Vec<Message>) -> BoxFut<'_, Result<FragmentStream>> {
        Box::pin(async move {
            let resp = self.send(&self.body(&messages, true)).await?;
            let mut events = Box::pin(resp.bytes_stream().eventsource());

            let stream = async_stream::stream! {
                let mut first = true;
                while let Some(event) = events.next().await {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            yield Err(ChainError::Other(format!("SSE stream error: {}", e)));
                            return;
                        }
                    };
                    let data = event.data.trim();
                    if data == "[DONE]" {
                        break;
                    }
                    let json: Value = match serde_json::from_str(data) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed SSE event");
                            continue;
                        }
                    };
                    if let Some(err) = json.get("error") {
                        yield Err(ChainError::Other(format!("model stream error: {}", err)));
                        return;
                    }
                    let delta = json["choices"][0]["delta"]["content"].as_str().unwrap_or("");
                    let usage = openai_usage(&json);
                    if delta.is_empty() && usage.is_none() && !first {
                        continue;
                    }
                    yield Ok(message_chunk(delta, first, usage));
                    first = false;
                }
            };
            Ok(stream.boxed())
        })
    }
}

// -- Mock --

type Responder = dyn Fn(&[Message]) -> String + Send + Sync;

#[derive(Clone)]
enum Reply {
    Fixed(String),
    With(Arc<Responder>),
    Fail(String),
}

/// In-process backend with a scripted reply.
///
/// Clones share call counters, so a test can keep one handle while the
/// model owns another.
#[derive(Clone)]
pub struct MockBackend {
    reply: Reply,
    chunk_size: usize,
    delay: Duration,
    usage: Option<Usage>,
    calls: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<Vec<Message>>>>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("chunk_size", &self.chunk_size)
            .field("delay", &self.delay)
            .field("calls", &self.calls())
            .finish()
    }
}

impl MockBackend {
    /// Always answer with `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self::from_reply(Reply::Fixed(reply.into()))
    }

    /// Compute the answer from the conversation.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[Message]) -> String + Send + Sync + 'static,
    {
        Self::from_reply(Reply::With(Arc::new(responder)))
    }

    /// Answer with the content of the last message.
    pub fn echo() -> Self {
        Self::with_responder(|messages| {
            messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default()
        })
    }

    /// Fail every call with a model error.
    pub fn failing(body: impl Into<String>) -> Self {
        Self::from_reply(Reply::Fail(body.into()))
    }

    fn from_reply(reply: Reply) -> Self {
        Self {
            reply,
            chunk_size: 4,
            delay: Duration::ZERO,
            usage: None,
            calls: Arc::new(AtomicUsize::new(0)),
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Characters per streamed chunk.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Simulated latency before replying and between streamed chunks.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Number of requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages of the most recent request.
    pub fn last_messages(&self) -> Option<Vec<Message>> {
        self.last.lock().ok().and_then(|guard| guard.clone())
    }

    async fn respond(&self, messages: &[Message]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.last.lock() {
            *guard = Some(messages.to_vec());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            Reply::Fixed(text) => Ok(text.clone()),
            Reply::With(responder) => Ok(responder(messages)),
            Reply::Fail(body) => Err(ChainError::Model {
                status: 500,
                body: body.clone(),
            }),
        }
    }
}

fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

impl ChatBackend for MockBackend {
    fn provider(&self) -> &str {
        "mock"
    }

    fn complete<'a>(&'a self, messages: &'a [Message]) -> BoxFut<'a, Result<Message>> {
        Box::pin(async move {
            let text = self.respond(messages).await?;
            let mut reply = Message::assistant(text);
            reply.usage = self.usage;
            Ok(reply)
        })
    }

    fn complete_stream(&self, messages: Vec<Message>) -> BoxFut<'_, Result<FragmentStream>> {
        Box::pin(async move {
            let text = self.respond(&messages).await?;
            let pieces = split_chunks(&text, self.chunk_size);
            let last = pieces.len() - 1;
            let usage = self.usage;
            let delay = self.delay;

            let stream = futures::stream::iter(pieces.into_iter().enumerate()).then(
                move |(i, piece)| async move {
                    if i > 0 && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let usage = if i == last { usage } else { None };
                    Ok::<_, ChainError>(message_chunk(&piece, i == 0, usage))
                },
            );
            Ok(stream.boxed())
        })
    }
}
