//! Request conversion.
//!
//! Every dialect is ingested into a [`ChatRequest`] and emitted from it. A single
//! source message can expand into several canonical messages: tool results always
//! travel in their own [`Role::Tool`] message so each destination can place them
//! where its schema wants them (separate `tool` messages, a user turn of
//! `tool_result` blocks, or a user turn of `functionResponse` parts).

use std::collections::{HashMap, VecDeque};

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::anthropic_types as an;
use super::canonical::{
    ChatMessage, ChatRequest, ContentPart, ConversionDefaults, Dialect, GenerationParameters,
    ImageSource, Role, ToolChoice, ToolDefinition, join_text,
};
use super::dispatch::{DialectRequest, GeminiRequest};
use super::gemini_types as gm;
use super::openai_types as oa;
use crate::error::ConvertError;

/// Parse a tool-call argument string. Empty text becomes `{}`; text that is
/// not valid JSON is kept as a string value.
pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(error = %e, "Tool arguments are not valid JSON, keeping the raw text");
        Value::String(raw.to_string())
    })
}

/// Anthropic `input` and Gemini `args` must be objects.
pub(crate) fn object_or_empty(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        Value::Null => json!({}),
        other => {
            warn!(arguments = %other, "Tool arguments are not an object, sending an empty one");
            json!({})
        }
    }
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

fn log_loss(err: &ConvertError) {
    warn!(error = %err, "Dropping content part");
}

/// Append `part` to the last message when it has the same role, else open a new one.
fn push_grouped(out: &mut Vec<ChatMessage>, role: Role, part: ContentPart) {
    match out.last_mut() {
        Some(last) if last.role == role => last.content.push(part),
        _ => out.push(ChatMessage::new(role, vec![part])),
    }
}

pub fn ingest(req: DialectRequest) -> ChatRequest {
    match req {
        DialectRequest::OpenAi(r) => from_openai(r),
        DialectRequest::Anthropic(r) => from_anthropic(r),
        DialectRequest::Gemini(r) => from_gemini(r),
    }
}

pub fn emit(req: ChatRequest, to: Dialect, defaults: &ConversionDefaults) -> DialectRequest {
    match to {
        Dialect::OpenAi => DialectRequest::OpenAi(to_openai(req, defaults)),
        Dialect::Anthropic => DialectRequest::Anthropic(to_anthropic(req, defaults)),
        Dialect::Gemini => DialectRequest::Gemini(to_gemini(req, defaults)),
    }
}

// ---------------------------------------------------------------------------
// OpenAI ingest
// ---------------------------------------------------------------------------

fn from_openai(req: oa::ChatCompletionRequest) -> ChatRequest {
    let messages = req.messages.into_iter().map(openai_message).collect();

    let tools = req.tools.map(|tools| {
        tools
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.function.name,
                description: t.function.description,
                parameters: t.function.parameters.unwrap_or_else(empty_schema),
            })
            .collect()
    });

    let tool_choice = req.tool_choice.map(|tc| match tc {
        oa::ChatToolChoice::Mode(s) => match s.as_str() {
            "required" => ToolChoice::Required,
            "none" => ToolChoice::None,
            _ => ToolChoice::Auto,
        },
        oa::ChatToolChoice::Named(s) => ToolChoice::Named(s.function.name),
    });

    ChatRequest {
        model: req.model,
        messages,
        params: GenerationParameters {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: None,
            max_output_tokens: req.max_completion_tokens.or(req.max_tokens),
            stop_sequences: req.stop.map(oa::Stop::into_vec),
            stream: req.stream.unwrap_or(false),
        },
        tools,
        tool_choice,
    }
}

fn openai_message(msg: oa::ChatMessage) -> ChatMessage {
    let role = match msg.role.as_str() {
        "system" | "developer" => Role::System,
        "assistant" => Role::Assistant,
        "tool" | "function" => Role::Tool,
        _ => Role::User,
    };

    if role == Role::Tool {
        let value = msg
            .content
            .map(|c| join_text(&openai_parts(c), "\n"))
            .unwrap_or_default();
        return ChatMessage::new(
            Role::Tool,
            vec![ContentPart::ToolResult {
                invocation_id: msg.tool_call_id.unwrap_or_default(),
                name: msg.name,
                value,
                is_error: false,
            }],
        );
    }

    let mut content = Vec::new();
    if let Some(text) = msg.reasoning_content.filter(|r| !r.is_empty()) {
        content.push(ContentPart::Reasoning {
            text,
            signature: None,
        });
    }
    if let Some(c) = msg.content {
        content.extend(openai_parts(c));
    }
    for call in msg.tool_calls.into_iter().flatten() {
        content.push(ContentPart::ToolInvocation {
            id: call.id,
            name: call.function.name,
            arguments: parse_arguments(&call.function.arguments),
        });
    }

    ChatMessage::new(role, content)
}

fn openai_parts(content: oa::ChatContent) -> Vec<ContentPart> {
    match content {
        oa::ChatContent::Text(text) if text.is_empty() => Vec::new(),
        oa::ChatContent::Text(text) => vec![ContentPart::Text { text }],
        oa::ChatContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                oa::ContentPart::Text { text } if text.is_empty() => None,
                oa::ContentPart::Text { text } => Some(ContentPart::Text { text }),
                oa::ContentPart::ImageUrl { image_url } => {
                    match ImageSource::from_uri(&image_url.url) {
                        Some(src) => Some(ContentPart::Image(src)),
                        None => {
                            log_loss(&ConvertError::content_loss(
                                Dialect::OpenAi,
                                "image data URI has no payload separator",
                            ));
                            None
                        }
                    }
                }
                oa::ContentPart::Unsupported => {
                    log_loss(&ConvertError::content_loss(
                        Dialect::OpenAi,
                        "unsupported content part type",
                    ));
                    None
                }
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Anthropic ingest
// ---------------------------------------------------------------------------

fn from_anthropic(req: an::MessagesRequest) -> ChatRequest {
    let mut messages = Vec::new();

    if let Some(system) = req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(ChatMessage::new(Role::System, vec![ContentPart::text(text)]));
        }
    }

    for msg in req.messages {
        let role = match msg.role {
            an::Role::User => Role::User,
            an::Role::Assistant => Role::Assistant,
        };
        let mut expanded = Vec::new();
        for part in msg.content.into_blocks().into_iter().filter_map(anthropic_part) {
            let part_role = if matches!(part, ContentPart::ToolResult { .. }) {
                Role::Tool
            } else {
                role
            };
            push_grouped(&mut expanded, part_role, part);
        }
        messages.append(&mut expanded);
    }

    let tools = req.tools.map(|tools| {
        tools
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name,
                description: t.description,
                parameters: t.input_schema,
            })
            .collect()
    });

    let tool_choice = req.tool_choice.map(|tc| match tc {
        an::ToolChoice::Auto => ToolChoice::Auto,
        an::ToolChoice::Any => ToolChoice::Required,
        an::ToolChoice::None => ToolChoice::None,
        an::ToolChoice::Tool { name } => ToolChoice::Named(name),
    });

    ChatRequest {
        model: req.model,
        messages,
        params: GenerationParameters {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            max_output_tokens: Some(req.max_tokens),
            stop_sequences: req.stop_sequences,
            stream: req.stream.unwrap_or(false),
        },
        tools,
        tool_choice,
    }
}

fn anthropic_part(block: an::ContentBlock) -> Option<ContentPart> {
    match block {
        an::ContentBlock::Text { text } if text.is_empty() => None,
        an::ContentBlock::Text { text } => Some(ContentPart::Text { text }),
        an::ContentBlock::Image { source } => Some(ContentPart::Image(match source {
            an::ImageSource::Base64 { media_type, data } => {
                ImageSource::Base64 { media_type, data }
            }
            an::ImageSource::Url { url } => ImageSource::Url {
                url,
                media_type: None,
            },
        })),
        an::ContentBlock::ToolUse { id, name, input } => Some(ContentPart::ToolInvocation {
            id,
            name,
            arguments: input,
        }),
        an::ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(ContentPart::ToolResult {
            invocation_id: tool_use_id,
            name: None,
            value: tool_result_text(content),
            is_error: is_error.unwrap_or(false),
        }),
        an::ContentBlock::Thinking {
            thinking,
            signature,
        } => Some(ContentPart::Reasoning {
            text: thinking,
            signature,
        }),
        an::ContentBlock::Unsupported => {
            log_loss(&ConvertError::content_loss(
                Dialect::Anthropic,
                "unsupported content block type",
            ));
            None
        }
    }
}

fn tool_result_text(content: Option<an::ToolResultContent>) -> String {
    match content {
        Some(an::ToolResultContent::Text(t)) => t,
        Some(an::ToolResultContent::Blocks(blocks)) => blocks
            .into_iter()
            .filter_map(|b| match b {
                an::ContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Gemini ingest
// ---------------------------------------------------------------------------

/// Assigns ids to Gemini function calls that arrive without one and pairs
/// each function response with the oldest unanswered call of the same name.
#[derive(Debug, Default)]
pub(crate) struct CallIds {
    counters: HashMap<String, usize>,
    pending: HashMap<String, VecDeque<String>>,
}

impl CallIds {
    pub(crate) fn invocation(&mut self, name: &str, id: Option<String>) -> String {
        let id = id.unwrap_or_else(|| {
            let n = self.counters.entry(name.to_string()).or_insert(0);
            *n += 1;
            format!("call_{name}_{n}")
        });
        self.pending
            .entry(name.to_string())
            .or_default()
            .push_back(id.clone());
        id
    }

    fn result(&mut self, name: &str, id: Option<String>) -> String {
        let queued = self.pending.get_mut(name).and_then(VecDeque::pop_front);
        id.or(queued).unwrap_or_else(|| format!("call_{name}"))
    }
}

fn from_gemini(req: GeminiRequest) -> ChatRequest {
    let GeminiRequest { model, stream, body } = req;
    let mut messages = Vec::new();

    if let Some(system) = body.system_instruction {
        let text = system
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            messages.push(ChatMessage::new(Role::System, vec![ContentPart::text(text)]));
        }
    }

    let mut ids = CallIds::default();
    for content in body.contents {
        let role = match content.role.as_deref() {
            Some("model") => Role::Assistant,
            _ => Role::User,
        };
        let mut expanded = Vec::new();
        for part in content.parts {
            if let Some(part) = gemini_part(part, &mut ids) {
                let part_role = if matches!(part, ContentPart::ToolResult { .. }) {
                    Role::Tool
                } else {
                    role
                };
                push_grouped(&mut expanded, part_role, part);
            }
        }
        messages.append(&mut expanded);
    }

    let tools: Vec<ToolDefinition> = body
        .tools
        .into_iter()
        .flatten()
        .flat_map(|t| t.function_declarations)
        .map(|f| ToolDefinition {
            name: f.name,
            description: f.description,
            parameters: f.parameters.unwrap_or_else(empty_schema),
        })
        .collect();

    let tool_choice = body.tool_config.map(|tc| {
        let cfg = tc.function_calling_config;
        match cfg.mode.to_uppercase().as_str() {
            "NONE" => ToolChoice::None,
            "ANY" => match cfg.allowed_function_names.as_deref() {
                Some([only]) => ToolChoice::Named(only.clone()),
                _ => ToolChoice::Required,
            },
            _ => ToolChoice::Auto,
        }
    });

    let config = body.generation_config.unwrap_or_default();
    ChatRequest {
        model,
        messages,
        params: GenerationParameters {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
            stop_sequences: config.stop_sequences,
            stream,
        },
        tools: (!tools.is_empty()).then_some(tools),
        tool_choice,
    }
}

fn gemini_part(part: gm::Part, ids: &mut CallIds) -> Option<ContentPart> {
    if let Some(call) = part.function_call {
        let id = ids.invocation(&call.name, call.id);
        return Some(ContentPart::ToolInvocation {
            id,
            name: call.name,
            arguments: object_or_empty(call.args),
        });
    }
    if let Some(resp) = part.function_response {
        let invocation_id = ids.result(&resp.name, resp.id);
        let (value, is_error) = gemini_result_value(resp.response);
        return Some(ContentPart::ToolResult {
            invocation_id,
            name: Some(resp.name),
            value,
            is_error,
        });
    }
    if let Some(blob) = part.inline_data {
        return Some(ContentPart::Image(ImageSource::Base64 {
            media_type: blob.mime_type,
            data: blob.data,
        }));
    }
    if let Some(file) = part.file_data {
        return Some(ContentPart::Image(ImageSource::Url {
            url: file.file_uri,
            media_type: Some(file.mime_type).filter(|m| !m.is_empty()),
        }));
    }
    let is_thought = part.thought.unwrap_or(false);
    match part.text {
        Some(text) if text.is_empty() => None,
        Some(text) if is_thought => Some(ContentPart::Reasoning {
            text,
            signature: part.thought_signature,
        }),
        Some(text) => Some(ContentPart::Text { text }),
        None => None,
    }
}

/// `{"result": "..."}` and `{"error": "..."}` unwrap to their string; any
/// other response object is kept as serialized JSON.
fn gemini_result_value(response: Value) -> (String, bool) {
    if let Value::Object(map) = &response {
        if map.len() == 1 {
            if let Some(Value::String(s)) = map.get("result") {
                return (s.clone(), false);
            }
            if let Some(Value::String(s)) = map.get("error") {
                return (s.clone(), true);
            }
        }
    }
    match response {
        Value::Null => (String::new(), false),
        other => (other.to_string(), false),
    }
}

// ---------------------------------------------------------------------------
// OpenAI emit
// ---------------------------------------------------------------------------

fn to_openai(req: ChatRequest, defaults: &ConversionDefaults) -> oa::ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = req.system_text() {
        messages.push(oa::ChatMessage::new(
            "system",
            Some(oa::ChatContent::Text(system)),
        ));
    }

    for msg in req.messages {
        match msg.role {
            // Hoisted above.
            Role::System => {}
            Role::Assistant => messages.push(openai_assistant_message(msg.content)),
            Role::User | Role::Tool => openai_user_messages(msg.content, &mut messages),
        }
    }

    let tools = req.tools.map(|tools| {
        tools
            .into_iter()
            .map(|t| {
                oa::ChatTool::function(oa::FunctionDef {
                    name: t.name,
                    description: t.description,
                    parameters: Some(t.parameters),
                })
            })
            .collect()
    });

    let tool_choice = req.tool_choice.map(|tc| match tc {
        ToolChoice::Auto => oa::ChatToolChoice::Mode("auto".to_string()),
        ToolChoice::Required => oa::ChatToolChoice::Mode("required".to_string()),
        ToolChoice::None => oa::ChatToolChoice::Mode("none".to_string()),
        ToolChoice::Named(name) => oa::ChatToolChoice::named(name),
    });

    let params = req.params;
    let stream_options = params.stream.then_some(oa::StreamOptions {
        include_usage: true,
    });

    oa::ChatCompletionRequest {
        model: req.model,
        messages,
        max_tokens: Some(
            params
                .max_output_tokens
                .unwrap_or_else(|| defaults.max_tokens_for(Dialect::OpenAi)),
        ),
        max_completion_tokens: None,
        temperature: Some(params.temperature.unwrap_or(defaults.temperature)),
        top_p: Some(params.top_p.unwrap_or(defaults.top_p)),
        stream: params.stream.then_some(true),
        stream_options,
        tools,
        tool_choice,
        stop: params.stop_sequences.map(oa::Stop::Many),
        user: None,
    }
}

fn openai_user_messages(content: Vec<ContentPart>, out: &mut Vec<oa::ChatMessage>) {
    let mut parts: Vec<oa::ContentPart> = Vec::new();

    for part in content {
        match part {
            ContentPart::Text { text } => parts.push(oa::ContentPart::Text { text }),
            ContentPart::Image(src) => parts.push(oa::ContentPart::ImageUrl {
                image_url: oa::ImageUrl {
                    url: src.to_uri(),
                    detail: None,
                },
            }),
            ContentPart::ToolResult {
                invocation_id,
                value,
                is_error,
                ..
            } => {
                if !parts.is_empty() {
                    out.push(openai_user_message(std::mem::take(&mut parts)));
                }
                let text = if is_error {
                    format!("ERROR: {value}")
                } else {
                    value
                };
                let mut msg = oa::ChatMessage::new("tool", Some(oa::ChatContent::Text(text)));
                msg.tool_call_id = Some(invocation_id);
                out.push(msg);
            }
            ContentPart::ToolInvocation { .. } | ContentPart::Reasoning { .. } => {}
        }
    }

    if !parts.is_empty() {
        out.push(openai_user_message(parts));
    }
}

fn openai_user_message(parts: Vec<oa::ContentPart>) -> oa::ChatMessage {
    let content = match parts.as_slice() {
        [oa::ContentPart::Text { text }] => oa::ChatContent::Text(text.clone()),
        _ => oa::ChatContent::Parts(parts),
    };
    oa::ChatMessage::new("user", Some(content))
}

fn openai_assistant_message(content: Vec<ContentPart>) -> oa::ChatMessage {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in content {
        match part {
            ContentPart::Text { text: t } => text.push_str(&t),
            ContentPart::ToolInvocation {
                id,
                name,
                arguments,
            } => tool_calls.push(oa::ChatToolCall::function(id, name, &arguments)),
            ContentPart::Reasoning { .. } | ContentPart::Image(_) | ContentPart::ToolResult { .. } => {}
        }
    }

    let mut msg = oa::ChatMessage::new(
        "assistant",
        (!text.is_empty()).then(|| oa::ChatContent::Text(text)),
    );
    msg.tool_calls = (!tool_calls.is_empty()).then_some(tool_calls);
    msg
}

// ---------------------------------------------------------------------------
// Anthropic emit
// ---------------------------------------------------------------------------

fn to_anthropic(req: ChatRequest, defaults: &ConversionDefaults) -> an::MessagesRequest {
    let system = req.system_text().map(an::SystemContent::Text);
    let mut messages: Vec<an::Message> = Vec::new();

    for msg in req.messages {
        let role = match msg.role {
            Role::System => continue,
            Role::Assistant => an::Role::Assistant,
            Role::User | Role::Tool => an::Role::User,
        };
        let blocks: Vec<an::ContentBlock> = msg
            .content
            .into_iter()
            .filter_map(|p| anthropic_block(p, role))
            .collect();
        if blocks.is_empty() {
            continue;
        }
        // Consecutive same-role turns are merged.
        match messages.last_mut() {
            Some(an::Message {
                role: last_role,
                content: an::MessageContent::Blocks(existing),
            }) if *last_role == role => existing.extend(blocks),
            _ => messages.push(an::Message {
                role,
                content: an::MessageContent::Blocks(blocks),
            }),
        }
    }

    let tools = req.tools.map(|tools| {
        tools
            .into_iter()
            .map(|t| an::Tool {
                name: t.name,
                description: t.description,
                input_schema: t.parameters,
            })
            .collect()
    });

    let tool_choice = req.tool_choice.map(|tc| match tc {
        ToolChoice::Auto => an::ToolChoice::Auto,
        ToolChoice::Required => an::ToolChoice::Any,
        ToolChoice::None => an::ToolChoice::None,
        ToolChoice::Named(name) => an::ToolChoice::Tool { name },
    });

    let params = req.params;
    an::MessagesRequest {
        model: req.model,
        max_tokens: params
            .max_output_tokens
            .unwrap_or_else(|| defaults.max_tokens_for(Dialect::Anthropic)),
        messages,
        system,
        stream: params.stream.then_some(true),
        temperature: Some(params.temperature.unwrap_or(defaults.temperature)),
        top_p: Some(params.top_p.unwrap_or(defaults.top_p)),
        top_k: params.top_k,
        tools,
        tool_choice,
        metadata: None,
        stop_sequences: params.stop_sequences,
        thinking: None,
        extra: HashMap::new(),
    }
}

fn anthropic_block(part: ContentPart, role: an::Role) -> Option<an::ContentBlock> {
    match part {
        ContentPart::Text { text } => Some(an::ContentBlock::Text { text }),
        ContentPart::Image(ImageSource::Base64 { media_type, data }) => {
            Some(an::ContentBlock::Image {
                source: an::ImageSource::Base64 { media_type, data },
            })
        }
        ContentPart::Image(ImageSource::Url { url, .. }) => Some(an::ContentBlock::Image {
            source: an::ImageSource::Url { url },
        }),
        ContentPart::ToolInvocation {
            id,
            name,
            arguments,
        } => Some(an::ContentBlock::ToolUse {
            id,
            name,
            input: object_or_empty(arguments),
        }),
        ContentPart::ToolResult {
            invocation_id,
            value,
            is_error,
            ..
        } => Some(an::ContentBlock::ToolResult {
            tool_use_id: invocation_id,
            content: Some(an::ToolResultContent::Text(value)),
            is_error: is_error.then_some(true),
        }),
        ContentPart::Reasoning {
            text,
            signature: Some(signature),
        } if role == an::Role::Assistant => Some(an::ContentBlock::Thinking {
            thinking: text,
            signature: Some(signature),
        }),
        ContentPart::Reasoning { .. } => {
            debug!("Dropping unsigned reasoning from request");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Gemini emit
// ---------------------------------------------------------------------------

fn to_gemini(req: ChatRequest, defaults: &ConversionDefaults) -> GeminiRequest {
    let system_instruction = req.system_text().map(|text| gm::Content {
        role: None,
        parts: vec![gm::Part::text(text)],
    });

    // Gemini addresses function responses by name, not by call id.
    let mut call_names: HashMap<String, String> = HashMap::new();
    let mut contents: Vec<gm::Content> = Vec::new();

    for msg in req.messages {
        let role = match msg.role {
            Role::System => continue,
            Role::Assistant => "model",
            Role::User | Role::Tool => "user",
        };
        let parts: Vec<gm::Part> = msg
            .content
            .into_iter()
            .filter_map(|p| gemini_out_part(p, &mut call_names))
            .collect();
        if parts.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
            _ => contents.push(gm::Content::new(role, parts)),
        }
    }

    let tools = req.tools.filter(|t| !t.is_empty()).map(|tools| {
        vec![gm::Tool {
            function_declarations: tools
                .into_iter()
                .map(|t| gm::FunctionDeclaration {
                    name: t.name,
                    description: t.description,
                    parameters: Some(gemini_schema(t.parameters)),
                })
                .collect(),
        }]
    });

    let tool_config = req.tool_choice.map(|tc| {
        let (mode, allowed) = match tc {
            ToolChoice::Auto => ("AUTO", None),
            ToolChoice::Required => ("ANY", None),
            ToolChoice::None => ("NONE", None),
            ToolChoice::Named(name) => ("ANY", Some(vec![name])),
        };
        gm::ToolConfig {
            function_calling_config: gm::FunctionCallingConfig {
                mode: mode.to_string(),
                allowed_function_names: allowed,
            },
        }
    });

    let params = req.params;
    let generation_config = gm::GenerationConfig {
        temperature: Some(params.temperature.unwrap_or(defaults.temperature)),
        top_p: Some(params.top_p.unwrap_or(defaults.top_p)),
        top_k: params.top_k,
        max_output_tokens: Some(
            params
                .max_output_tokens
                .unwrap_or_else(|| defaults.max_tokens_for(Dialect::Gemini)),
        ),
        stop_sequences: params.stop_sequences,
        candidate_count: None,
    };

    GeminiRequest {
        model: req.model,
        stream: params.stream,
        body: gm::GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: Some(generation_config),
            tools,
            tool_config,
            safety_settings: None,
        },
    }
}

fn gemini_out_part(part: ContentPart, call_names: &mut HashMap<String, String>) -> Option<gm::Part> {
    match part {
        ContentPart::Text { text } => Some(gm::Part::text(text)),
        ContentPart::Image(src) => gemini_image(src),
        ContentPart::ToolInvocation {
            id,
            name,
            arguments,
        } => {
            call_names.insert(id, name.clone());
            Some(gm::Part {
                function_call: Some(gm::FunctionCall {
                    id: None,
                    name,
                    args: object_or_empty(arguments),
                }),
                ..Default::default()
            })
        }
        ContentPart::ToolResult {
            invocation_id,
            name,
            value,
            is_error,
        } => {
            let name = name
                .or_else(|| call_names.get(&invocation_id).cloned())
                .unwrap_or_else(|| {
                    warn!(invocation_id = %invocation_id, "No function name for tool result, using call id");
                    invocation_id
                });
            Some(gm::Part {
                function_response: Some(gm::FunctionResponse {
                    id: None,
                    name,
                    response: gemini_response_value(&value, is_error),
                }),
                ..Default::default()
            })
        }
        ContentPart::Reasoning { .. } => {
            debug!("Dropping reasoning from request");
            None
        }
    }
}

/// JSON objects are sent as-is; anything else is wrapped under `result` (or `error`).
fn gemini_response_value(value: &str, is_error: bool) -> Value {
    if !is_error {
        if let Ok(obj @ Value::Object(_)) = serde_json::from_str::<Value>(value) {
            return obj;
        }
    }
    let key = if is_error { "error" } else { "result" };
    let mut map = Map::new();
    map.insert(key.to_string(), Value::String(value.to_string()));
    Value::Object(map)
}

fn gemini_image(src: ImageSource) -> Option<gm::Part> {
    match src {
        ImageSource::Base64 { media_type, data } => Some(gm::Part {
            inline_data: Some(gm::Blob {
                mime_type: media_type,
                data,
            }),
            ..Default::default()
        }),
        ImageSource::Url { url, media_type } if is_google_hosted(&url) => {
            let mime_type = media_type.unwrap_or_else(|| guess_mime(&url));
            Some(gm::Part {
                file_data: Some(gm::FileData {
                    mime_type,
                    file_uri: url,
                }),
                ..Default::default()
            })
        }
        ImageSource::Url { url, .. } => {
            log_loss(&ConvertError::content_loss(
                Dialect::Gemini,
                format!("remote image {url} is not fetched"),
            ));
            None
        }
    }
}

fn is_google_hosted(url: &str) -> bool {
    url.starts_with("gs://") || url.starts_with("https://generativelanguage.googleapis.com/")
}

fn guess_mime(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("image/jpeg")
        .to_string()
}

/// Remove JSON-schema keywords the Gemini function-declaration schema rejects.
fn gemini_schema(mut schema: Value) -> Value {
    strip_schema_keys(&mut schema);
    schema
}

fn strip_schema_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("$schema");
            map.remove("additionalProperties");
            map.values_mut().for_each(strip_schema_keys);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_schema_keys),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai(value: Value) -> DialectRequest {
        DialectRequest::OpenAi(serde_json::from_value(value).unwrap())
    }

    fn anthropic(value: Value) -> DialectRequest {
        DialectRequest::Anthropic(serde_json::from_value(value).unwrap())
    }

    fn gemini(value: Value) -> DialectRequest {
        DialectRequest::Gemini(GeminiRequest {
            model: "gemini-2.5-pro".to_string(),
            stream: false,
            body: serde_json::from_value(value).unwrap(),
        })
    }

    fn convert(req: DialectRequest, to: Dialect) -> DialectRequest {
        emit(ingest(req), to, &ConversionDefaults::default())
    }

    #[test]
    fn test_developer_role_is_system() {
        let req = openai(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "developer", "content": "Be brief"},
                {"role": "user", "content": "Hi"}
            ]
        }));
        let DialectRequest::Anthropic(out) = convert(req, Dialect::Anthropic) else {
            panic!("expected anthropic request");
        };
        assert_eq!(out.system.unwrap().as_text(), "Be brief");
        assert_eq!(out.messages.len(), 1);
    }

    #[test]
    fn test_max_completion_tokens_takes_precedence() {
        let req = openai(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Hi"}],
            "max_tokens": 100,
            "max_completion_tokens": 200,
            "stop": "END"
        }));
        let DialectRequest::Gemini(out) = convert(req, Dialect::Gemini) else {
            panic!("expected gemini request");
        };
        let config = out.body.generation_config.unwrap();
        assert_eq!(config.max_output_tokens, Some(200));
        assert_eq!(config.stop_sequences, Some(vec!["END".to_string()]));
    }

    #[test]
    fn test_openai_tool_messages_merge_into_one_anthropic_turn() {
        let req = openai(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "Weather?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"location\":\"Paris\"}"}},
                    {"id": "call_2", "type": "function", "function": {"name": "get_weather", "arguments": "{\"location\":\"Oslo\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "sunny"},
                {"role": "tool", "tool_call_id": "call_2", "content": "rain"}
            ]
        }));
        let DialectRequest::Anthropic(out) = convert(req, Dialect::Anthropic) else {
            panic!("expected anthropic request");
        };
        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[2].role, an::Role::User);
        let blocks = out.messages[2].content.clone().into_blocks();
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], an::ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call_1"));

        let blocks = out.messages[1].content.clone().into_blocks();
        let an::ContentBlock::ToolUse { input, .. } = &blocks[0] else {
            panic!("expected tool_use block");
        };
        assert_eq!(input["location"], "Paris");
    }

    #[test]
    fn test_anthropic_error_result_is_prefixed_for_openai() {
        let req = anthropic(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1024,
            "messages": [
                {"role": "assistant", "content": [{"type": "tool_use", "id": "toolu_1", "name": "ls", "input": {}}]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "denied", "is_error": true},
                    {"type": "text", "text": "Try again"}
                ]}
            ]
        }));
        let DialectRequest::OpenAi(out) = convert(req, Dialect::OpenAi) else {
            panic!("expected openai request");
        };
        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[1].role, "tool");
        assert_eq!(out.messages[1].tool_call_id.as_deref(), Some("toolu_1"));
        assert!(matches!(&out.messages[1].content, Some(oa::ChatContent::Text(t)) if t == "ERROR: denied"));
        assert_eq!(out.messages[2].role, "user");
    }

    #[test]
    fn test_function_response_name_recovered_for_gemini() {
        let req = anthropic(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1024,
            "messages": [
                {"role": "user", "content": "Weather in Paris?"},
                {"role": "assistant", "content": [{"type": "tool_use", "id": "toolu_9", "name": "get_weather", "input": {"location": "Paris"}}]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_9", "content": "{\"temp\":21}"}]}
            ]
        }));
        let DialectRequest::Gemini(out) = convert(req, Dialect::Gemini) else {
            panic!("expected gemini request");
        };
        let contents = &out.body.contents;
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].role.as_deref(), Some("model"));
        let resp = contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(resp.name, "get_weather");
        assert_eq!(resp.response, json!({"temp": 21}));
    }

    #[test]
    fn test_gemini_calls_get_paired_ids() {
        let req = gemini(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "Weather?"}]},
                {"role": "model", "parts": [
                    {"functionCall": {"name": "get_weather", "args": {"location": "Paris"}}},
                    {"functionCall": {"name": "get_weather", "args": {"location": "Oslo"}}}
                ]},
                {"role": "user", "parts": [
                    {"functionResponse": {"name": "get_weather", "response": {"result": "sunny"}}},
                    {"functionResponse": {"name": "get_weather", "response": {"result": "rain"}}}
                ]}
            ]
        }));
        let DialectRequest::OpenAi(out) = convert(req, Dialect::OpenAi) else {
            panic!("expected openai request");
        };
        let calls = out.messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_get_weather_1");
        assert_eq!(calls[1].id, "call_get_weather_2");
        assert_eq!(out.messages[2].tool_call_id.as_deref(), Some("call_get_weather_1"));
        assert_eq!(out.messages[3].tool_call_id.as_deref(), Some("call_get_weather_2"));
        assert!(matches!(&out.messages[3].content, Some(oa::ChatContent::Text(t)) if t == "rain"));
    }

    #[test]
    fn test_remote_image_dropped_toward_gemini() {
        let req = openai(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "What is this?"},
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
                {"type": "image_url", "image_url": {"url": "gs://bucket/dog.png"}}
            ]}]
        }));
        let DialectRequest::Gemini(out) = convert(req, Dialect::Gemini) else {
            panic!("expected gemini request");
        };
        let parts = &out.body.contents[0].parts;
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].text.as_deref(), Some("What is this?"));
        assert_eq!(parts[1].inline_data.as_ref().unwrap().mime_type, "image/png");
        let file = parts[2].file_data.as_ref().unwrap();
        assert_eq!(file.file_uri, "gs://bucket/dog.png");
        assert_eq!(file.mime_type, "image/png");
    }

    #[test]
    fn test_unsplittable_data_uri_is_dropped() {
        let req = openai(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64"}}
            ]}]
        }));
        let DialectRequest::Anthropic(out) = convert(req, Dialect::Anthropic) else {
            panic!("expected anthropic request");
        };
        let blocks = out.messages[0].content.clone().into_blocks();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], an::ContentBlock::Text { text } if text == "look"));
    }

    #[test]
    fn test_tool_choice_named_maps_to_allowed_functions() {
        let req = openai(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Hi"}],
            "tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "additionalProperties": false
            }}}],
            "tool_choice": {"type": "function", "function": {"name": "get_weather"}}
        }));
        let DialectRequest::Gemini(out) = convert(req, Dialect::Gemini) else {
            panic!("expected gemini request");
        };
        let cfg = out.body.tool_config.unwrap().function_calling_config;
        assert_eq!(cfg.mode, "ANY");
        assert_eq!(cfg.allowed_function_names, Some(vec!["get_weather".to_string()]));

        let decl = &out.body.tools.unwrap()[0].function_declarations[0];
        let params = decl.parameters.as_ref().unwrap();
        assert!(params.get("$schema").is_none());
        assert!(params.get("additionalProperties").is_none());
        assert_eq!(params["properties"]["location"]["type"], "string");
    }

    #[test]
    fn test_signed_thinking_survives_only_toward_anthropic() {
        let req = gemini(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "Hi"}]},
                {"role": "model", "parts": [
                    {"text": "pondering", "thought": true, "thoughtSignature": "sig"},
                    {"text": "Hello"}
                ]}
            ]
        }));
        let DialectRequest::Anthropic(out) = convert(req.clone(), Dialect::Anthropic) else {
            panic!("expected anthropic request");
        };
        let blocks = out.messages[1].content.clone().into_blocks();
        assert!(matches!(&blocks[0], an::ContentBlock::Thinking { signature: Some(s), .. } if s == "sig"));

        let DialectRequest::OpenAi(out) = convert(req, Dialect::OpenAi) else {
            panic!("expected openai request");
        };
        assert!(matches!(&out.messages[1].content, Some(oa::ChatContent::Text(t)) if t == "Hello"));
    }

    #[test]
    fn test_parse_arguments_tolerates_garbage() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("{\"a\":1"), json!("{\"a\":1"));
        assert_eq!(parse_arguments("{\"a\":1}"), json!({"a": 1}));
    }

    #[test]
    fn test_unparseable_arguments_keep_their_text() {
        let req: oa::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "Weather?"},
                {"role": "assistant", "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\": \"Par"}}
                ]}
            ]
        }))
        .unwrap();
        let canonical = ingest(DialectRequest::OpenAi(req));
        let DialectRequest::OpenAi(out) = emit(canonical.clone(), Dialect::OpenAi, &ConversionDefaults::default()) else {
            panic!("expected openai request");
        };
        let calls = out.messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, "{\"city\": \"Par");

        let DialectRequest::Anthropic(out) = emit(canonical, Dialect::Anthropic, &ConversionDefaults::default()) else {
            panic!("expected anthropic request");
        };
        let blocks = out.messages[1].content.clone().into_blocks();
        assert!(matches!(&blocks[0], an::ContentBlock::ToolUse { input, .. } if *input == json!({})));
    }
}
