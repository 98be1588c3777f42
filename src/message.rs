use crate::{error::Result, ChainError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[serde(alias = "human")]
    User,
    #[serde(alias = "ai")]
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        f.write_str(label)
    }
}

impl FromStr for Role {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" | "human" => Ok(Role::User),
            "assistant" | "ai" => Ok(Role::Assistant),
            other => Err(ChainError::InvalidTemplate(format!(
                "unknown message role '{}'",
                other
            ))),
        }
    }
}

/// Token accounting reported by a model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// A role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            usage: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A rendered prompt, ready to send to a chat model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptValue {
    pub messages: Vec<Message>,
}

impl PromptValue {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl fmt::Display for PromptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, msg) in self.messages.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", msg.role, msg.content)?;
        }
        Ok(())
    }
}

/// Interpret a stage input as a list of chat messages.
///
/// Accepts a bare string (one user message), a single message object, an
/// array of messages, or an object with a `messages` array (a rendered
/// [`PromptValue`]).
pub fn messages_from_value(value: Value) -> Result<Vec<Message>> {
    match value {
        Value::String(text) => Ok(vec![Message::user(text)]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(ChainError::from))
            .collect(),
        Value::Object(mut map) => {
            if let Some(messages) = map.remove("messages") {
                return messages_from_value(messages);
            }
            Ok(vec![serde_json::from_value(Value::Object(map))?])
        }
        other => Err(ChainError::InvalidInput(format!(
            "expected a prompt, messages or text, got {}",
            other
        ))),
    }
}
