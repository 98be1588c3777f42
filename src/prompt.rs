//! Prompt templates with `{variable}` placeholders.
//!
//! Literal braces are written `{{` and `}}`. Rendering fails with
//! [`ChainError::UndefinedVariable`] when the input lacks a referenced
//! variable.

use crate::{
    error::Result,
    message::{Message, PromptValue, Role},
    stage::{BoxFut, Stage},
    ChainError,
};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Var(String),
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => {
                                return Err(ChainError::InvalidTemplate(format!(
                                    "unclosed placeholder in {:?}",
                                    source
                                )))
                            }
                            Some(ch) => name.push(ch),
                        }
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(ChainError::InvalidTemplate(format!(
                            "empty placeholder in {:?}",
                            source
                        )));
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Var(name.to_string()));
                }
                '}' => {
                    return Err(ChainError::InvalidTemplate(format!(
                        "unmatched '}}' in {:?}",
                        source
                    )))
                }
                other => text.push(other),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variable names in order of first appearance.
    pub fn variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = Vec::new();
        for segment in &self.segments {
            if let Segment::Var(name) = segment {
                if !vars.contains(name) {
                    vars.push(name.clone());
                }
            }
        }
        vars
    }

    /// Substitute every placeholder. String values are inserted verbatim,
    /// anything else as its JSON text.
    pub fn format(&self, values: &Map<String, Value>) -> Result<String> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => rendered.push_str(text),
                Segment::Var(name) => match values.get(name) {
                    Some(Value::String(s)) => rendered.push_str(s),
                    Some(other) => rendered.push_str(&other.to_string()),
                    None => return Err(ChainError::UndefinedVariable(name.clone())),
                },
            }
        }
        Ok(rendered)
    }
}

/// Values bound ahead of time plus the variables still expected as input.
#[derive(Debug, Clone, Default)]
struct Bindings {
    partials: Map<String, Value>,
}

impl Bindings {
    fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.partials.insert(key.into(), value.into());
    }

    /// Variables the caller still has to provide.
    fn required(&self, variables: Vec<String>) -> Vec<String> {
        variables
            .into_iter()
            .filter(|v| !self.partials.contains_key(v))
            .collect()
    }

    /// Merge partials with the stage input. Input fields win over partials.
    ///
    /// A non-object input binds to the single required variable, if there is
    /// exactly one.
    fn resolve(&self, required: &[String], input: Value) -> Result<Map<String, Value>> {
        let mut values = self.partials.clone();
        match input {
            Value::Object(map) => values.extend(map),
            other if required.len() == 1 => {
                values.insert(required[0].clone(), other);
            }
            _ if required.is_empty() => {}
            other => {
                return Err(ChainError::InvalidInput(format!(
                    "expected an object with fields {:?}, got {}",
                    required, other
                )))
            }
        }
        Ok(values)
    }
}

/// Renders a single template into one user message.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    name: String,
    template: Template,
    bindings: Bindings,
}

impl PromptTemplate {
    pub fn from_template(template: &str) -> Result<Self> {
        Ok(Self {
            name: "PromptTemplate".to_string(),
            template: Template::parse(template)?,
            bindings: Bindings::default(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bind a variable ahead of time.
    pub fn partial(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(key, value);
        self
    }

    pub fn render(&self, input: Value) -> Result<PromptValue> {
        let required = self.bindings.required(self.template.variables());
        let values = self.bindings.resolve(&required, input)?;
        let text = self.template.format(&values)?;
        Ok(PromptValue::new(vec![Message::user(text)]))
    }
}

impl Stage for PromptTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_fields(&self) -> Vec<String> {
        self.bindings.required(self.template.variables())
    }

    fn output_fields(&self) -> Option<Vec<String>> {
        Some(vec!["messages".to_string()])
    }

    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>> {
        Box::pin(async move {
            let prompt = self.render(input)?;
            tracing::trace!(template = %self.name, %prompt, "rendered prompt");
            Ok(serde_json::to_value(prompt)?)
        })
    }
}

/// Renders a list of role-tagged templates into chat messages.
///
/// ```
/// use llm_chain::ChatPromptTemplate;
/// use serde_json::json;
///
/// let template = ChatPromptTemplate::from_messages([
///     ("system", "You translate {field} texts."),
///     ("user", "{content}"),
/// ])
/// .unwrap();
/// let prompt = template
///     .render(json!({"field": "legal", "content": "Hello"}))
///     .unwrap();
/// assert_eq!(prompt.messages[1].content, "Hello");
/// ```
#[derive(Debug, Clone)]
pub struct ChatPromptTemplate {
    name: String,
    messages: Vec<(Role, Template)>,
    bindings: Bindings,
}

impl ChatPromptTemplate {
    pub fn from_messages<I, R, T>(messages: I) -> Result<Self>
    where
        I: IntoIterator<Item = (R, T)>,
        R: AsRef<str>,
        T: AsRef<str>,
    {
        let messages = messages
            .into_iter()
            .map(|(role, template)| {
                Ok((role.as_ref().parse::<Role>()?, Template::parse(template.as_ref())?))
            })
            .collect::<Result<Vec<_>>>()?;
        if messages.is_empty() {
            return Err(ChainError::InvalidTemplate(
                "chat prompt needs at least one message".to_string(),
            ));
        }
        Ok(Self {
            name: "ChatPromptTemplate".to_string(),
            messages,
            bindings: Bindings::default(),
        })
    }

    /// Shorthand for a single user message.
    pub fn from_template(template: &str) -> Result<Self> {
        Self::from_messages([("user", template)])
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bind a variable ahead of time.
    pub fn partial(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(key, value);
        self
    }

    fn variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = Vec::new();
        for (_, template) in &self.messages {
            for var in template.variables() {
                if !vars.contains(&var) {
                    vars.push(var);
                }
            }
        }
        vars
    }

    pub fn render(&self, input: Value) -> Result<PromptValue> {
        let required = self.bindings.required(self.variables());
        let values = self.bindings.resolve(&required, input)?;
        let messages = self
            .messages
            .iter()
            .map(|(role, template)| Ok(Message::new(*role, template.format(&values)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(PromptValue::new(messages))
    }
}

impl Stage for ChatPromptTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_fields(&self) -> Vec<String> {
        self.bindings.required(self.variables())
    }

    fn output_fields(&self) -> Option<Vec<String>> {
        Some(vec!["messages".to_string()])
    }

    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>> {
        Box::pin(async move {
            let prompt = self.render(input)?;
            tracing::trace!(template = %self.name, %prompt, "rendered prompt");
            Ok(serde_json::to_value(prompt)?)
        })
    }
}
