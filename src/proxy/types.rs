//! Client request view used for routing and prompt accounting.
//!
//! The request body itself is forwarded upstream untouched; these types only
//! read the fields the relay needs.

use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;
use crate::relay::{RelayMode, TokenCounter};

/// Framing overhead per chat message.
const TOKENS_PER_MESSAGE: u32 = 3;
/// Extra token when a message carries a `name`.
const TOKENS_PER_NAME: u32 = 1;
/// Every reply is primed with `<|start|>assistant<|message|>`.
const REPLY_PRIMING_TOKENS: u32 = 3;

/// The fields of a completion request the relay inspects.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestView {
    pub model: String,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
    /// Legacy completions prompt: a string or an array of strings.
    #[serde(default)]
    pub prompt: Value,
}

/// A chat message as sent by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptMessage {
    #[serde(default)]
    pub role: String,
    /// A string, or an array of content parts.
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub name: Option<String>,
}

impl PromptMessage {
    /// Text of the message; non-text content parts are ignored.
    pub fn text(&self) -> String {
        text_of(&self.content)
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.as_str()),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect(),
        _ => String::new(),
    }
}

impl RequestView {
    /// Read the view out of a parsed request body.
    pub fn deserialize_from(payload: &Value) -> Result<Self, Error> {
        Self::deserialize(payload)
            .map_err(|e| Error::BadRequest(format!("Invalid completion request: {}", e)))
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Tokens the upstream will bill for the prompt.
    pub fn prompt_tokens(&self, mode: RelayMode, counter: &dyn TokenCounter) -> u32 {
        match mode {
            RelayMode::ChatCompletions => {
                let messages = self.messages.iter().map(|m| {
                    let mut tokens = TOKENS_PER_MESSAGE
                        .saturating_add(counter.count_tokens(&m.role, &self.model))
                        .saturating_add(counter.count_tokens(&m.text(), &self.model));
                    if let Some(name) = &m.name {
                        tokens = tokens
                            .saturating_add(counter.count_tokens(name, &self.model))
                            .saturating_add(TOKENS_PER_NAME);
                    }
                    tokens
                });
                messages.fold(REPLY_PRIMING_TOKENS, u32::saturating_add)
            }
            RelayMode::Completions => counter.count_tokens(&text_of(&self.prompt), &self.model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(text: &str, _model: &str) -> u32 {
        text.chars().count() as u32
    }

    fn view(body: Value) -> RequestView {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn parses_minimal_chat_request() {
        let request = view(serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.2
        }));
        assert_eq!(request.model, "gpt-4o");
        assert!(!request.is_streaming());
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn missing_model_is_bad_request() {
        let err = RequestView::deserialize_from(&serde_json::json!({"messages": []})).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert!(err.to_string().contains("model"), "{}", err);
    }

    #[test]
    fn chat_prompt_tokens_include_framing() {
        let request = view(serde_json::json!({
            "model": "m",
            "stream": true,
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi", "name": "bob"}
            ]
        }));
        assert!(request.is_streaming());
        // (3 + 6 + 8) + (3 + 4 + 2 + 3 + 1) + 3
        assert_eq!(request.prompt_tokens(RelayMode::ChatCompletions, &chars), 33);
    }

    #[test]
    fn content_parts_count_text_only() {
        let request = view(serde_json::json!({
            "model": "m",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "https://x/y.png"}},
                {"type": "text", "text": "here"}
            ]}]
        }));
        assert_eq!(request.messages[0].text(), "lookhere");
    }

    #[test]
    fn completions_prompt_string_or_array() {
        let request = view(serde_json::json!({"model": "m", "prompt": "abc"}));
        assert_eq!(request.prompt_tokens(RelayMode::Completions, &chars), 3);

        let request = view(serde_json::json!({"model": "m", "prompt": ["ab", "cd"]}));
        assert_eq!(request.prompt_tokens(RelayMode::Completions, &chars), 4);

        let request = view(serde_json::json!({"model": "m"}));
        assert_eq!(request.prompt_tokens(RelayMode::Completions, &chars), 0);
    }
}
