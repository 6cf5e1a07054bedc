//! Wire types shared by the stream and full-body relay paths.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Selects which decode schema applies to an upstream response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// `/v1/chat/completions`: content lives in `choices[].delta.content`.
    ChatCompletions,
    /// `/v1/completions`: content lives in `choices[].text`.
    Completions,
}

impl RelayMode {
    /// Resolve the mode from a request path.
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            "/v1/chat/completions" => Some(RelayMode::ChatCompletions),
            "/v1/completions" => Some(RelayMode::Completions),
            _ => None,
        }
    }

    /// Upstream path suffix, relative to the provider base URL.
    pub fn upstream_path(&self) -> &'static str {
        match self {
            RelayMode::ChatCompletions => "chat/completions",
            RelayMode::Completions => "completions",
        }
    }

    /// JSON pointer to the first choice's content in a streamed chunk.
    pub(crate) fn content_pointer(&self) -> &'static str {
        match self {
            RelayMode::ChatCompletions => "/choices/0/delta/content",
            RelayMode::Completions => "/choices/0/text",
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_tokens: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completion_tokens: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tokens: u32,
}

/// OpenAI-compatible error envelope.
///
/// Upstreams embed this in an otherwise normal body; a non-empty `type`
/// marks the response as failed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OpenAiError {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub error_type: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub param: String,
    #[serde(default)]
    pub code: Value,
}

impl OpenAiError {
    /// Whether the envelope signals an upstream failure.
    pub fn is_set(&self) -> bool {
        !self.error_type.is_empty()
    }

    /// `code` rendered as text; providers send strings, numbers or null.
    pub fn code_str(&self) -> String {
        match &self.code {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Full (non-streaming) completion body, decoded only as far as the relay needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<TextChoice>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub usage: Usage,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error: OpenAiError,
}

/// A choice from a full completion body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u32,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Value,
}

impl TextChoice {
    /// Generated text: `message.content` for chat, `text` for legacy completions.
    pub fn content(&self) -> &str {
        match (&self.message, &self.text) {
            (Some(message), _) => &message.content,
            (None, Some(text)) => text,
            (None, None) => "",
        }
    }
}

/// A chat message.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Message {
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
}

/// One decoded streaming chunk.
///
/// Keeps the original JSON object alongside the typed view so the chunk can
/// be re-serialized with only its content changed.
#[derive(Debug, Clone)]
pub struct DeltaChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<DeltaChoice>,
    pub usage: Option<Usage>,
    raw: Value,
}

/// A streaming choice with its content resolved for the active [`RelayMode`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaChoice {
    pub index: u32,
    pub finish_reason: Value,
    pub content: String,
    pub content_filter_results: Value,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    object: Option<String>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    index: u32,
    #[serde(default)]
    finish_reason: Value,
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content_filter_results: Value,
}

#[derive(Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

impl DeltaChunk {
    /// Decode a data-line payload (marker already stripped) for `mode`.
    pub fn decode(payload: impl AsRef<[u8]>, mode: RelayMode) -> serde_json::Result<Self> {
        let raw: Value = serde_json::from_slice(payload.as_ref())?;
        if !raw.is_object() {
            return Err(serde::de::Error::custom("stream chunk is not a JSON object"));
        }
        let wire = WireChunk::deserialize(&raw)?;

        let choices = wire
            .choices
            .into_iter()
            .map(|c| {
                let content = match mode {
                    RelayMode::ChatCompletions => c.delta.and_then(|d| d.content),
                    RelayMode::Completions => c.text,
                };
                DeltaChoice {
                    index: c.index,
                    finish_reason: c.finish_reason,
                    content: content.unwrap_or_default(),
                    content_filter_results: c.content_filter_results,
                }
            })
            .collect();

        Ok(Self {
            id: wire.id.unwrap_or_default(),
            object: wire.object.unwrap_or_default(),
            created: wire.created.unwrap_or_default(),
            model: wire.model.unwrap_or_default(),
            choices,
            usage: wire.usage,
            raw,
        })
    }

    /// Content of the first choice, if any choice exists.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.content.as_str())
    }

    /// Append every choice's content to `buf`, in choice order.
    pub fn append_text(&self, buf: &mut String) {
        for choice in &self.choices {
            buf.push_str(&choice.content);
        }
    }

    /// The chunk exactly as decoded.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// Treat an explicit JSON `null` like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
