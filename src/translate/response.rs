//! Non-streaming response conversion, plus the stop-reason vocabularies shared
//! with the stream converter.

use uuid::Uuid;

use super::anthropic_types as an;
use super::canonical::{ChatResponse, ContentPart, Dialect, StopReason, Usage};
use super::dispatch::DialectResponse;
use super::gemini_types as gm;
use super::openai_types as oa;
use super::request::{object_or_empty, parse_arguments, CallIds};

// ---------------------------------------------------------------------------
// Stop reasons
// ---------------------------------------------------------------------------

/// Map an OpenAI `finish_reason` into the canonical set.
pub fn openai_stop_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        // "stop", "content_filter" and anything new
        _ => StopReason::EndTurn,
    }
}

pub fn openai_finish_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence => "stop",
        StopReason::MaxTokens => "length",
        StopReason::ToolUse => "tool_calls",
    }
}

pub fn anthropic_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::MaxTokens,
        "tool_use" => StopReason::ToolUse,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

pub fn anthropic_stop_str(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "end_turn",
        StopReason::MaxTokens => "max_tokens",
        StopReason::ToolUse => "tool_use",
        StopReason::StopSequence => "stop_sequence",
    }
}

/// Gemini reports `STOP` even when the turn ends in function calls.
pub fn gemini_stop_reason(reason: &str, has_function_calls: bool) -> StopReason {
    match reason {
        "MAX_TOKENS" => StopReason::MaxTokens,
        _ if has_function_calls => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

pub fn gemini_finish_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::MaxTokens => "MAX_TOKENS",
        StopReason::EndTurn | StopReason::ToolUse | StopReason::StopSequence => "STOP",
    }
}

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

pub fn openai_id(source: Option<&str>) -> String {
    match source {
        Some(id) if id.starts_with("chatcmpl-") => id.to_string(),
        Some(id) => format!("chatcmpl-{}", id.trim_start_matches("msg_")),
        None => format!("chatcmpl-{}", Uuid::new_v4().simple()),
    }
}

pub fn anthropic_id(source: Option<&str>) -> String {
    match source {
        Some(id) if id.starts_with("msg_") => id.to_string(),
        Some(id) => format!("msg_{}", id.trim_start_matches("chatcmpl-")),
        None => format!("msg_{}", Uuid::new_v4().simple()),
    }
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

pub fn ingest(resp: DialectResponse) -> ChatResponse {
    match resp {
        DialectResponse::OpenAi(r) => from_openai(r),
        DialectResponse::Anthropic(r) => from_anthropic(r),
        DialectResponse::Gemini(r) => from_gemini(r),
    }
}

fn from_openai(resp: oa::ChatCompletionResponse) -> ChatResponse {
    let mut content = Vec::new();
    let mut stop_reason = StopReason::EndTurn;

    if let Some(choice) = resp.choices.into_iter().next() {
        let message = choice.message;
        if let Some(text) = message.reasoning_content.filter(|t| !t.is_empty()) {
            content.push(ContentPart::Reasoning {
                text,
                signature: None,
            });
        }
        if let Some(text) = message.content.filter(|t| !t.is_empty()) {
            content.push(ContentPart::Text { text });
        }
        for call in message.tool_calls.into_iter().flatten() {
            content.push(ContentPart::ToolInvocation {
                id: call.id,
                name: call.function.name,
                arguments: parse_arguments(&call.function.arguments),
            });
        }
        if let Some(reason) = choice.finish_reason.as_deref() {
            stop_reason = openai_stop_reason(reason);
        }
    }

    let usage = resp
        .usage
        .map_or_else(Usage::default, |u| Usage::new(u.prompt_tokens, u.completion_tokens));

    ChatResponse {
        id: Some(resp.id),
        model: resp.model,
        content,
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

fn from_anthropic(resp: an::MessagesResponse) -> ChatResponse {
    let content = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            an::ResponseContentBlock::Text { text } if text.is_empty() => None,
            an::ResponseContentBlock::Text { text } => Some(ContentPart::Text { text }),
            an::ResponseContentBlock::ToolUse { id, name, input } => {
                Some(ContentPart::ToolInvocation {
                    id,
                    name,
                    arguments: input,
                })
            }
            an::ResponseContentBlock::Thinking {
                thinking,
                signature,
            } => Some(ContentPart::Reasoning {
                text: thinking,
                signature,
            }),
        })
        .collect();

    ChatResponse {
        id: Some(resp.id),
        model: resp.model,
        content,
        stop_reason: resp
            .stop_reason
            .as_deref()
            .map_or(StopReason::EndTurn, anthropic_stop_reason),
        stop_sequence: resp.stop_sequence,
        usage: Usage::new(resp.usage.input_tokens, resp.usage.output_tokens),
    }
}

fn from_gemini(resp: gm::GenerateContentResponse) -> ChatResponse {
    let mut ids = CallIds::default();
    let mut content = Vec::new();
    let mut finish = None;

    if let Some(candidate) = resp.candidates.into_iter().next() {
        finish = candidate.finish_reason;
        for part in candidate.content.parts {
            let is_thought = part.is_thought();
            if let Some(call) = part.function_call {
                content.push(ContentPart::ToolInvocation {
                    id: ids.invocation(&call.name, call.id),
                    name: call.name,
                    arguments: object_or_empty(call.args),
                });
                continue;
            }
            match part.text {
                Some(text) if text.is_empty() => {}
                Some(text) if is_thought => content.push(ContentPart::Reasoning {
                    text,
                    signature: part.thought_signature,
                }),
                Some(text) => content.push(ContentPart::Text { text }),
                None => {}
            }
        }
    }

    let has_calls = content
        .iter()
        .any(|p| matches!(p, ContentPart::ToolInvocation { .. }));
    let stop_reason = gemini_stop_reason(finish.as_deref().unwrap_or("STOP"), has_calls);

    ChatResponse {
        id: resp.response_id,
        model: resp.model_version.unwrap_or_default(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: resp.usage_metadata.map_or_else(Usage::default, gemini_usage),
    }
}

pub(crate) fn gemini_usage(u: gm::UsageMetadata) -> Usage {
    Usage::new(
        u.prompt_token_count,
        u.candidates_token_count + u.thoughts_token_count.unwrap_or(0),
    )
}

// ---------------------------------------------------------------------------
// Emit
// ---------------------------------------------------------------------------

/// `model` replaces whatever model the upstream reported.
pub fn emit(resp: ChatResponse, to: Dialect, model: &str) -> DialectResponse {
    match to {
        Dialect::OpenAi => DialectResponse::OpenAi(to_openai(resp, model)),
        Dialect::Anthropic => DialectResponse::Anthropic(to_anthropic(resp, model)),
        Dialect::Gemini => DialectResponse::Gemini(to_gemini(resp, model)),
    }
}

fn to_openai(resp: ChatResponse, model: &str) -> oa::ChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for part in resp.content {
        match part {
            ContentPart::Text { text: t } => text.push_str(&t),
            ContentPart::Reasoning { text: t, .. } => reasoning.push_str(&t),
            ContentPart::ToolInvocation {
                id,
                name,
                arguments,
            } => tool_calls.push(oa::ChatToolCall::function(id, name, &arguments)),
            ContentPart::Image(_) | ContentPart::ToolResult { .. } => {}
        }
    }

    let usage = resp.usage;
    oa::ChatCompletionResponse {
        id: openai_id(resp.id.as_deref()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![oa::Choice {
            index: 0,
            message: oa::ChoiceMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(openai_finish_reason(resp.stop_reason).to_string()),
        }],
        usage: Some(oa::ChatUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
        }),
    }
}

fn to_anthropic(resp: ChatResponse, model: &str) -> an::MessagesResponse {
    let mut content: Vec<an::ResponseContentBlock> = resp
        .content
        .into_iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(an::ResponseContentBlock::Text { text }),
            ContentPart::ToolInvocation {
                id,
                name,
                arguments,
            } => Some(an::ResponseContentBlock::ToolUse {
                id,
                name,
                input: object_or_empty(arguments),
            }),
            ContentPart::Reasoning { text, signature } => {
                Some(an::ResponseContentBlock::Thinking {
                    thinking: text,
                    signature,
                })
            }
            ContentPart::Image(_) | ContentPart::ToolResult { .. } => None,
        })
        .collect();

    // Clients expect at least one block.
    if content.is_empty() {
        content.push(an::ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    an::MessagesResponse {
        id: anthropic_id(resp.id.as_deref()),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: Some(anthropic_stop_str(resp.stop_reason).to_string()),
        stop_sequence: resp.stop_sequence,
        usage: an::Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        },
    }
}

fn to_gemini(resp: ChatResponse, model: &str) -> gm::GenerateContentResponse {
    let parts = resp
        .content
        .into_iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(gm::Part::text(text)),
            ContentPart::Reasoning { text, signature } => Some(gm::Part {
                thought_signature: signature,
                ..gm::Part::thought(text)
            }),
            ContentPart::ToolInvocation {
                id,
                name,
                arguments,
            } => Some(gm::Part {
                function_call: Some(gm::FunctionCall {
                    id: Some(id),
                    name,
                    args: object_or_empty(arguments),
                }),
                ..Default::default()
            }),
            ContentPart::Image(_) | ContentPart::ToolResult { .. } => None,
        })
        .collect();

    let usage = resp.usage;
    gm::GenerateContentResponse {
        candidates: vec![gm::Candidate {
            content: gm::Content::new("model", parts),
            finish_reason: Some(gemini_finish_reason(resp.stop_reason).to_string()),
            index: 0,
        }],
        usage_metadata: Some(gm::UsageMetadata {
            prompt_token_count: usage.input_tokens,
            candidates_token_count: usage.output_tokens,
            total_token_count: usage.total_tokens,
            thoughts_token_count: None,
        }),
        model_version: Some(model.to_string()),
        response_id: resp.id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn openai_response(value: serde_json::Value) -> DialectResponse {
        DialectResponse::OpenAi(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn test_openai_text_to_anthropic() {
        let resp = openai_response(json!({
            "id": "chatcmpl-abc123",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 999}
        }));
        let DialectResponse::Anthropic(out) = emit(ingest(resp), Dialect::Anthropic, "claude-sonnet-4")
        else {
            panic!("expected anthropic response");
        };
        assert_eq!(out.id, "msg_abc123");
        assert_eq!(out.model, "claude-sonnet-4");
        assert_eq!(out.stop_reason.as_deref(), Some("end_turn"));
        assert!(matches!(&out.content[0], an::ResponseContentBlock::Text { text } if text == "Hello!"));
        assert_eq!(out.usage.input_tokens, 10);
        assert_eq!(out.usage.output_tokens, 20);
    }

    #[test]
    fn test_gemini_function_call_is_tool_use() {
        let resp = DialectResponse::Gemini(
            serde_json::from_value(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"functionCall": {"name": "get_weather", "args": {"location": "Tokyo"}}}
                    ]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 5, "totalTokenCount": 12}
            }))
            .unwrap(),
        );
        let DialectResponse::OpenAi(out) = emit(ingest(resp), Dialect::OpenAi, "gpt-4o") else {
            panic!("expected openai response");
        };
        assert!(out.id.starts_with("chatcmpl-"));
        let choice = &out.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert!(choice.message.content.is_none());
        let call = &choice.message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.name, "get_weather");
        assert_eq!(call.function.arguments, r#"{"location":"Tokyo"}"#);
        assert_eq!(out.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn test_anthropic_thinking_becomes_reasoning_content() {
        let resp = DialectResponse::Anthropic(
            serde_json::from_value(json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4",
                "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                    {"type": "text", "text": "Done"}
                ],
                "stop_reason": "max_tokens",
                "usage": {"input_tokens": 3, "output_tokens": 4}
            }))
            .unwrap(),
        );
        let DialectResponse::OpenAi(out) = emit(ingest(resp), Dialect::OpenAi, "gpt-4o") else {
            panic!("expected openai response");
        };
        let msg = &out.choices[0].message;
        assert_eq!(msg.reasoning_content.as_deref(), Some("hmm"));
        assert_eq!(msg.content.as_deref(), Some("Done"));
        assert_eq!(out.choices[0].finish_reason.as_deref(), Some("length"));
        assert_eq!(out.id, "chatcmpl-1");
    }

    #[test]
    fn test_empty_content_still_yields_a_block() {
        let resp = ChatResponse {
            id: None,
            model: String::new(),
            content: Vec::new(),
            stop_reason: StopReason::EndTurn,
            stop_sequence: None,
            usage: Usage::default(),
        };
        let DialectResponse::Anthropic(out) = emit(resp, Dialect::Anthropic, "m") else {
            panic!("expected anthropic response");
        };
        assert_eq!(out.content.len(), 1);
        assert!(out.id.starts_with("msg_"));
    }

    #[test]
    fn test_stop_reason_vocabularies() {
        assert_eq!(openai_stop_reason("length"), StopReason::MaxTokens);
        assert_eq!(gemini_finish_reason(StopReason::MaxTokens), "MAX_TOKENS");
        assert_eq!(gemini_stop_reason("SAFETY", false), StopReason::EndTurn);
        assert_eq!(anthropic_stop_str(StopReason::ToolUse), "tool_use");
        assert_eq!(openai_finish_reason(StopReason::StopSequence), "stop");
    }
}
