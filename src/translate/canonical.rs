//! Dialect-neutral representation of a chat exchange.
//!
//! Every conversion pivots through these types: a source dialect is ingested
//! into a [`ChatRequest`] / [`ChatResponse`] / [`StreamFragment`], then emitted
//! in the destination dialect. Wire-level field names never appear here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One vendor's wire schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// OpenAI Chat Completions.
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic Messages.
    Anthropic,
    /// Google Gemini `generateContent`.
    Gemini,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::OpenAi, Dialect::Anthropic, Dialect::Gemini];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::OpenAi => "openai",
            Dialect::Anthropic => "anthropic",
            Dialect::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Dialect::OpenAi),
            "anthropic" | "claude" => Ok(Dialect::Anthropic),
            "gemini" | "google" => Ok(Dialect::Gemini),
            other => Err(format!("unknown dialect '{other}'")),
        }
    }
}

/// Constants substituted when a destination needs a value the source omitted.
///
/// Built once from configuration and handed by reference into every converter call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionDefaults {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u64,
    /// Ceiling used instead of `max_output_tokens` when the destination is Gemini.
    #[serde(default = "default_large_max_output_tokens")]
    pub large_max_output_tokens: u64,
}

fn default_temperature() -> f64 {
    1.0
}

fn default_top_p() -> f64 {
    0.9
}

fn default_max_output_tokens() -> u64 {
    8192
}

fn default_large_max_output_tokens() -> u64 {
    65536
}

impl Default for ConversionDefaults {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            large_max_output_tokens: default_large_max_output_tokens(),
        }
    }
}

impl ConversionDefaults {
    /// Output-token ceiling to fill in for `dialect` when the request carries none.
    #[must_use]
    pub fn max_tokens_for(&self, dialect: Dialect) -> u64 {
        match dialect {
            Dialect::Gemini => self.large_max_output_tokens,
            Dialect::OpenAi | Dialect::Anthropic => self.max_output_tokens,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url {
        url: String,
        media_type: Option<String>,
    },
}

impl ImageSource {
    /// Parse an image reference. `data:` URIs are split into an embedded payload;
    /// a `data:` URI without a `,` separator yields `None`.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        let Some(rest) = uri.strip_prefix("data:") else {
            return Some(ImageSource::Url {
                url: uri.to_string(),
                media_type: None,
            });
        };
        let (header, data) = rest.split_once(',')?;
        let media_type = header.split(';').next().unwrap_or_default();
        Some(ImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        })
    }

    /// Render as a URI: a `data:` URI for embedded payloads, the reference otherwise.
    #[must_use]
    pub fn to_uri(&self) -> String {
        match self {
            ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
            ImageSource::Url { url, .. } => url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image(ImageSource),
    ToolInvocation {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        invocation_id: String,
        /// Function name, when the source dialect carries it.
        name: Option<String>,
        value: String,
        is_error: bool,
    },
    Reasoning {
        text: String,
        signature: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    /// Concatenation of the message's text parts.
    #[must_use]
    pub fn text(&self) -> String {
        join_text(&self.content, "")
    }
}

/// Join the text parts of `parts` with `sep`, ignoring every other part kind.
#[must_use]
pub fn join_text(parts: &[ContentPart], sep: &str) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(sep)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    Named(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParameters {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub max_output_tokens: Option<u64>,
    pub stop_sequences: Option<Vec<String>>,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParameters,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<ToolChoice>,
}

impl ChatRequest {
    /// All system text folded into one instruction, joined by newlines.
    #[must_use]
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<String> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(ChatMessage::text)
            .filter(|t| !t.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Messages other than system instructions, in order.
    pub fn conversation(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
}

/// Token accounting. The total is always derived from its two halves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    #[must_use]
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    /// Absent when the source dialect has no response-level id.
    pub id: Option<String>,
    pub model: String,
    pub content: Vec<ContentPart>,
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// One decoded unit of streamed output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFragment {
    /// The upstream opened the message.
    Start {
        id: Option<String>,
        input_tokens: Option<u64>,
    },
    Text(String),
    Reasoning(String),
    /// Partial tool call. `name` arrives once; `arguments` are string pieces.
    ToolCall {
        id: String,
        name: Option<String>,
        arguments: String,
    },
    /// Argument stream for the call is complete.
    ToolCallComplete { id: String },
    Finish {
        stop_reason: StopReason,
        usage: Option<Usage>,
    },
    /// Terminal sentinel.
    Done,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: String,
    /// Unix seconds.
    pub created: i64,
    pub owned_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_total_is_derived() {
        let usage = Usage::new(12, 30);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn test_image_source_from_data_uri() {
        let src = ImageSource::from_uri("data:image/png;base64,AAAA").unwrap();
        assert_eq!(
            src,
            ImageSource::Base64 {
                media_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            }
        );
        assert_eq!(src.to_uri(), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_image_source_rejects_unsplittable_data_uri() {
        assert!(ImageSource::from_uri("data:image/png;base64").is_none());
    }

    #[test]
    fn test_image_source_keeps_remote_reference() {
        let src = ImageSource::from_uri("https://example.com/cat.png").unwrap();
        assert!(matches!(src, ImageSource::Url { ref url, .. } if url == "https://example.com/cat.png"));
    }

    #[test]
    fn test_system_text_folds_with_newline() {
        let req = ChatRequest {
            model: "m".to_string(),
            messages: vec![
                ChatMessage::new(Role::System, vec![ContentPart::text("A")]),
                ChatMessage::new(Role::User, vec![ContentPart::text("hi")]),
                ChatMessage::new(Role::System, vec![ContentPart::text("B")]),
            ],
            params: GenerationParameters::default(),
            tools: None,
            tool_choice: None,
        };
        assert_eq!(req.system_text().as_deref(), Some("A\nB"));
        assert_eq!(req.conversation().count(), 1);
    }

    #[test]
    fn test_dialect_parsing() {
        assert_eq!("OpenAI".parse::<Dialect>(), Ok(Dialect::OpenAi));
        assert_eq!("claude".parse::<Dialect>(), Ok(Dialect::Anthropic));
        assert_eq!("gemini".parse::<Dialect>(), Ok(Dialect::Gemini));
        assert!("kiro".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_large_ceiling_only_for_gemini() {
        let defaults = ConversionDefaults::default();
        assert_eq!(defaults.max_tokens_for(Dialect::Anthropic), 8192);
        assert_eq!(defaults.max_tokens_for(Dialect::OpenAi), 8192);
        assert_eq!(defaults.max_tokens_for(Dialect::Gemini), 65536);
    }
}
