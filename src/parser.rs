use crate::{
    error::Result,
    fragment::FragmentStream,
    stage::{BoxFut, Stage},
    ChainError,
};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;

/// Text carried by a message, chunk, or plain string value.
fn text_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("content").and_then(|c| c.as_str()),
        _ => None,
    }
}

/// A content-less chunk that only reports usage or role, like the trailing
/// usage chunk of a model stream.
fn is_metadata_chunk(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty() && map.keys().all(|k| k == "usage" || k == "role")
        }
        _ => false,
    }
}

/// Extracts the text content of a model message.
///
/// Streams fragment by fragment: each message chunk becomes its content
/// delta, so tokens reach the caller as soon as the model emits them.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrOutputParser;

impl StrOutputParser {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for StrOutputParser {
    fn name(&self) -> &str {
        "StrOutputParser"
    }

    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>> {
        Box::pin(async move {
            match text_of(&input) {
                Some(text) => Ok(Value::String(text.to_string())),
                None => Err(ChainError::InvalidInput(format!(
                    "expected a message or text, got {}",
                    input
                ))),
            }
        })
    }

    fn transform(self: Arc<Self>, upstream: FragmentStream) -> FragmentStream {
        upstream
            .filter_map(|item| async move {
                match item {
                    Ok(Value::Null) => None,
                    Ok(fragment) => match text_of(&fragment) {
                        Some(text) => Some(Ok(Value::String(text.to_string()))),
                        None if is_metadata_chunk(&fragment) => None,
                        None => Some(Err(ChainError::InvalidInput(format!(
                            "expected a message chunk or text, got {}",
                            fragment
                        )))),
                    },
                    Err(err) => Some(Err(err)),
                }
            })
            .boxed()
    }
}

/// Parses model output as JSON.
///
/// Handles `<think>` reasoning blocks, fenced code blocks, and JSON
/// embedded in surrounding prose.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonOutputParser;

impl JsonOutputParser {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for JsonOutputParser {
    fn name(&self) -> &str {
        "JsonOutputParser"
    }

    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>> {
        Box::pin(async move {
            let text = text_of(&input).ok_or_else(|| {
                ChainError::InvalidInput(format!("expected a message or text, got {}", input))
            })?;
            let (_, cleaned) = extract_thinking(text);
            parse_json(&cleaned)
        })
    }
}

/// Split a `<think>...</think>` reasoning block off a reply.
///
/// Returns the reasoning (if non-empty) and the remaining text, trimmed.
/// Text without a complete block comes back untouched.
pub fn extract_thinking(text: &str) -> (Option<String>, String) {
    let Some((before, rest)) = text.split_once("<think>") else {
        return (None, text.to_string());
    };
    let Some((reasoning, after)) = rest.split_once("</think>") else {
        return (None, text.to_string());
    };
    let reasoning = reasoning.trim();
    let remaining = format!("{}{}", before, after).trim().to_string();
    ((!reasoning.is_empty()).then(|| reasoning.to_string()), remaining)
}

/// Parse model output text as `T`, tolerating prose and code fences.
///
/// Tries the whole text, then the first fenced block, then the span from the
/// first `{` or `[` to the last matching closer.
pub fn parse_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    let text = text.trim();
    let attempt = |candidate: &str| serde_json::from_str::<T>(candidate).ok();

    if let Some(parsed) = attempt(text) {
        return Ok(parsed);
    }
    if let Some(parsed) = extract_json_block(text).and_then(|body| attempt(&body)) {
        return Ok(parsed);
    }
    if let Some(idx) = text.find(|c: char| c == '{' || c == '[') {
        let tail = &text[idx..];
        let closer = if tail.starts_with('{') { '}' } else { ']' };
        let embedded = attempt(tail).or_else(|| {
            tail.rfind(closer).and_then(|end| attempt(&tail[..=end]))
        });
        if let Some(parsed) = embedded {
            return Ok(parsed);
        }
    }

    let preview: String = text.chars().take(200).collect();
    Err(ChainError::Parse(format!(
        "no JSON found in model output: {}",
        preview
    )))
}

/// Body of the first fenced code block, preferring `json` fences.
fn extract_json_block(text: &str) -> Option<String> {
    ["```json", "```JSON", "```"].into_iter().find_map(|fence| {
        let (_, rest) = text.split_once(fence)?;
        let (body, _) = rest.split_once("```")?;
        Some(body.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment;
    use serde_json::json;

    #[tokio::test]
    async fn test_str_parser_message() {
        let out = StrOutputParser
            .invoke(json!({"role": "assistant", "content": "芯擎科技"}))
            .await
            .unwrap();
        assert_eq!(out, json!("芯擎科技"));
    }

    #[tokio::test]
    async fn test_str_parser_passes_strings() {
        assert_eq!(StrOutputParser.invoke(json!("x")).await.unwrap(), json!("x"));
    }

    #[tokio::test]
    async fn test_str_parser_rejects_numbers() {
        assert!(StrOutputParser.invoke(json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_str_parser_transform_is_chunkwise() {
        let upstream = futures::stream::iter(vec![
            Ok(json!({"role": "assistant", "content": "Hel"})),
            Ok(json!({"content": "lo"})),
            Ok(json!({"usage": {"output_tokens": 2}})),
        ])
        .boxed();
        let chunks: Vec<Value> = Arc::new(StrOutputParser)
            .transform(upstream)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![json!("Hel"), json!("lo")]);
    }

    #[tokio::test]
    async fn test_str_parser_stream_rejects_what_invoke_rejects() {
        let chain = crate::pipeline::connect(
            crate::lambda::Lambda::new("number", |_| Ok(json!(42))),
            StrOutputParser,
        )
        .unwrap();

        let invoked = chain.invoke(json!(null)).await.unwrap_err();
        assert!(matches!(invoked.root_cause(), ChainError::InvalidInput(_)));

        let streamed = fragment::collect(chain.stream(json!(null)).await.unwrap())
            .await
            .unwrap_err();
        assert_eq!(streamed.stage(), Some("StrOutputParser"));
        assert!(matches!(streamed.root_cause(), ChainError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_str_parser_transform_forwards_errors() {
        let upstream = futures::stream::iter(vec![
            Ok(json!("a")),
            Err(ChainError::Other("cut off".into())),
        ])
        .boxed();
        let err = fragment::collect(Arc::new(StrOutputParser).transform(upstream))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cut off");
    }

    #[tokio::test]
    async fn test_json_parser_strips_thinking() {
        let msg = json!({
            "role": "assistant",
            "content": "<think>pick two</think>```json\n{\"pros\": [\"fast\"]}\n```"
        });
        let out = JsonOutputParser.invoke(msg).await.unwrap();
        assert_eq!(out, json!({"pros": ["fast"]}));
    }

    #[test]
    fn test_thinking_block_split_off() {
        let (reasoning, rest) =
            extract_thinking("Sure. <think>the user wants a GPU brand</think> NovaCore");
        assert_eq!(reasoning.as_deref(), Some("the user wants a GPU brand"));
        assert_eq!(rest, "Sure.  NovaCore");

        let (reasoning, rest) = extract_thinking("<think>\n\n</think>\n\nNovaCore");
        assert!(reasoning.is_none());
        assert_eq!(rest, "NovaCore");
    }

    #[test]
    fn test_unclosed_thinking_left_alone() {
        let (reasoning, rest) = extract_thinking("<think>still going");
        assert!(reasoning.is_none());
        assert_eq!(rest, "<think>still going");
    }

    #[test]
    fn test_parse_json_direct() {
        let v: Value = parse_json(r#"{"value": "hello"}"#).unwrap();
        assert_eq!(v["value"], "hello");
    }

    #[test]
    fn test_parse_json_embedded() {
        #[derive(serde::Deserialize)]
        struct Company {
            name: String,
        }
        let company: Company =
            parse_json("Of course! {\"name\": \"QuantaCore\"} Anything else?").unwrap();
        assert_eq!(company.name, "QuantaCore");
    }

    #[test]
    fn test_parse_json_array_before_object() {
        let v: Value = parse_json("tags: [\"a\", {\"b\": 1}] done").unwrap();
        assert_eq!(v, json!(["a", {"b": 1}]));
    }

    #[test]
    fn test_parse_json_failure() {
        assert!(matches!(
            parse_json::<Value>("not json at all"),
            Err(ChainError::Parse(_))
        ));
    }

    #[test]
    fn test_fenced_block_bodies() {
        assert_eq!(
            extract_json_block("Here you go:\n```json\n{\"pros\": []}\n```"),
            Some("{\"pros\": []}".to_string())
        );
        assert_eq!(extract_json_block("```\n[1, 2]\n``` trailing"), Some("[1, 2]".to_string()));
        assert_eq!(extract_json_block("```json never closed"), None);
    }
}
