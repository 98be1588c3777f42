use crate::{
    backend::{MockBackend, OllamaBackend, OpenAiBackend},
    config::ModelConfig,
    error::Result,
    fragment::FragmentStream,
    message::{messages_from_value, Message, Role, Usage},
    stage::{BoxFut, Stage},
    ChainError,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Transport to a chat model server.
pub trait ChatBackend: Send + Sync + 'static {
    /// Provider label used in logs.
    fn provider(&self) -> &str;

    /// Send the conversation and wait for the whole reply.
    fn complete<'a>(&'a self, messages: &'a [Message]) -> BoxFut<'a, Result<Message>>;

    /// Send the conversation and stream the reply as message chunks.
    ///
    /// Chunks follow [`message_chunk`]: the first carries the role, every
    /// chunk carries a content delta, and the last may carry usage. Folding
    /// them gives the same value as [`complete`](Self::complete).
    fn complete_stream(&self, messages: Vec<Message>) -> BoxFut<'_, Result<FragmentStream>>;
}

/// Build one streamed message chunk.
pub fn message_chunk(delta: &str, first: bool, usage: Option<Usage>) -> Value {
    let mut chunk = json!({ "content": delta });
    if first {
        chunk["role"] = json!(Role::Assistant);
    }
    if let Some(usage) = usage {
        chunk["usage"] = json!(usage);
    }
    chunk
}

/// A chat model as a pipeline stage.
///
/// Input may be text, messages, or a rendered prompt. Output is the
/// assistant [`Message`]; streaming yields message chunks as tokens arrive.
#[derive(Clone)]
pub struct ChatModel {
    name: String,
    backend: Arc<dyn ChatBackend>,
    system_prompt: Option<String>,
}

impl std::fmt::Debug for ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModel")
            .field("name", &self.name)
            .field("provider", &self.backend.provider())
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}

impl ChatModel {
    pub fn new(backend: impl ChatBackend) -> Self {
        Self::from_backend(Arc::new(backend))
    }

    pub fn from_backend(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            name: "ChatModel".to_string(),
            backend,
            system_prompt: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Prepended as a system message when the input has none.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    fn prepare(&self, input: Value) -> Result<Vec<Message>> {
        let mut messages = messages_from_value(input)?;
        if messages.is_empty() {
            return Err(ChainError::InvalidInput(
                "no messages to send to the model".to_string(),
            ));
        }
        if let Some(ref system) = self.system_prompt {
            if !messages.iter().any(|m| m.role == Role::System) {
                messages.insert(0, Message::system(system.clone()));
            }
        }
        Ok(messages)
    }

    /// Send messages directly, bypassing the value layer.
    pub async fn chat(&self, input: Value) -> Result<Message> {
        let messages = self.prepare(input)?;
        self.backend.complete(&messages).await
    }
}

impl Stage for ChatModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_fields(&self) -> Option<Vec<String>> {
        Some(vec!["role".to_string(), "content".to_string()])
    }

    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>> {
        Box::pin(async move {
            tracing::debug!(model = %self.name, provider = self.backend.provider(), "calling model");
            let reply = self.chat(input).await?;
            Ok(serde_json::to_value(reply)?)
        })
    }

    fn stream(&self, input: Value) -> BoxFut<'_, Result<FragmentStream>> {
        Box::pin(async move {
            let messages = self.prepare(input)?;
            tracing::debug!(model = %self.name, provider = self.backend.provider(), "streaming model");
            self.backend.complete_stream(messages).await
        })
    }
}

/// Build a [`ChatModel`] for the provider named in `config`.
pub fn init_chat_model(config: ModelConfig) -> Result<ChatModel> {
    config.validate()?;
    let model = match config.provider.to_ascii_lowercase().as_str() {
        "ollama" => ChatModel::new(OllamaBackend::new(config)),
        "openai" => ChatModel::new(OpenAiBackend::new(config)),
        "mock" => ChatModel::new(MockBackend::echo()),
        other => {
            return Err(ChainError::InvalidConfig(format!(
                "unsupported model provider '{}'",
                other
            )))
        }
    };
    Ok(model)
}
