use dialect_proxy::translate::{
    Converter, Dialect, DialectRequest, DialectResponse, FragmentOutcome, GeminiRequest,
    Operation, RouteTable, SseFrame,
};
use dialect_proxy::ConvertError;
use serde_json::{json, Value};

fn openai_request(value: Value) -> DialectRequest {
    DialectRequest::OpenAi(serde_json::from_value(value).unwrap())
}

fn anthropic_request(value: Value) -> DialectRequest {
    DialectRequest::Anthropic(serde_json::from_value(value).unwrap())
}

fn gemini_request(model: &str, value: Value) -> DialectRequest {
    DialectRequest::Gemini(GeminiRequest {
        model: model.to_string(),
        stream: false,
        body: serde_json::from_value(value).unwrap(),
    })
}

fn request_json(req: &DialectRequest) -> Value {
    match req {
        DialectRequest::OpenAi(r) => serde_json::to_value(r).unwrap(),
        DialectRequest::Anthropic(r) => serde_json::to_value(r).unwrap(),
        DialectRequest::Gemini(r) => serde_json::to_value(&r.body).unwrap(),
    }
}

fn openai_response(value: Value) -> DialectResponse {
    DialectResponse::OpenAi(serde_json::from_value(value).unwrap())
}

fn sample_requests() -> Vec<DialectRequest> {
    vec![
        openai_request(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 7
        })),
        anthropic_request(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 7,
            "messages": [{"role": "user", "content": "hi"}]
        })),
        gemini_request(
            "gemini-2.5-pro",
            json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]}),
        ),
    ]
}

// ────────────────────────────────────────────────────────────────
// Identity
// ────────────────────────────────────────────────────────────────

#[test]
fn test_identity_conversion_is_unchanged() {
    let converter = Converter::default();
    for req in sample_requests() {
        let dialect = req.dialect();
        let before = request_json(&req);
        let after = converter.convert_request(req, dialect).unwrap();
        assert_eq!(request_json(&after), before, "identity changed a {dialect} request");
    }
}

fn sample_responses() -> Vec<DialectResponse> {
    vec![
        openai_response(json!({
            "id": "chatcmpl-upstream",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "call_1", "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"location\": \"Tokyo\"}"}
                }]},
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 99}
        })),
        DialectResponse::Anthropic(
            serde_json::from_value(json!({
                "id": "msg_upstream",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                    {"type": "text", "text": "Sunny."}
                ],
                "stop_reason": "end_turn",
                "stop_sequence": null,
                "usage": {"input_tokens": 10, "output_tokens": 4}
            }))
            .unwrap(),
        ),
        DialectResponse::Gemini(
            serde_json::from_value(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Sunny."}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 4, "totalTokenCount": 14},
                "modelVersion": "gemini-2.5-pro"
            }))
            .unwrap(),
        ),
    ]
}

#[test]
fn test_identity_response_is_unchanged() {
    let converter = Converter::default();
    for resp in sample_responses() {
        let dialect = resp.dialect();
        let before = resp.to_json().unwrap();
        let after = converter
            .convert_response(resp, dialect, "client-model")
            .unwrap();
        assert_eq!(after.dialect(), dialect);
        assert_eq!(after.to_json().unwrap(), before, "identity changed a {dialect} response");
    }
}

#[test]
fn test_identity_holds_even_with_empty_route_table() {
    let converter = Converter::new(RouteTable::empty(), Default::default());
    for req in sample_requests() {
        let dialect = req.dialect();
        assert!(converter.convert_request(req, dialect).is_ok());
    }
    for resp in sample_responses() {
        let dialect = resp.dialect();
        assert!(converter.convert_response(resp, dialect, "m").is_ok());
    }
    assert!(converter
        .stream_converter(Dialect::Gemini, Dialect::Gemini, "m")
        .is_ok());
}

// ────────────────────────────────────────────────────────────────
// Requests
// ────────────────────────────────────────────────────────────────

#[test]
fn test_system_messages_fold_with_newline() {
    let converter = Converter::default();
    let req = || {
        openai_request(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "A"},
                {"role": "system", "content": "B"},
                {"role": "user", "content": "hi"}
            ]
        }))
    };

    let DialectRequest::Anthropic(out) = converter.convert_request(req(), Dialect::Anthropic).unwrap()
    else {
        panic!("expected anthropic request");
    };
    assert_eq!(out.system.unwrap().as_text(), "A\nB");
    assert_eq!(out.messages.len(), 1);

    let DialectRequest::Gemini(out) = converter.convert_request(req(), Dialect::Gemini).unwrap()
    else {
        panic!("expected gemini request");
    };
    let system = out.body.system_instruction.unwrap();
    assert_eq!(system.parts[0].text.as_deref(), Some("A\nB"));
    assert_eq!(out.body.contents.len(), 1);
}

#[test]
fn test_defaults_fill_missing_parameters() {
    let converter = Converter::default();
    let req = || {
        openai_request(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
    };

    let DialectRequest::Anthropic(out) = converter.convert_request(req(), Dialect::Anthropic).unwrap()
    else {
        panic!("expected anthropic request");
    };
    assert_eq!(out.max_tokens, 8192);
    assert_eq!(out.temperature, Some(1.0));
    assert_eq!(out.top_p, Some(0.9));

    let DialectRequest::Gemini(out) = converter.convert_request(req(), Dialect::Gemini).unwrap()
    else {
        panic!("expected gemini request");
    };
    let config = out.body.generation_config.unwrap();
    assert_eq!(config.max_output_tokens, Some(65536));
    assert_eq!(config.temperature, Some(1.0));
}

#[test]
fn test_caller_values_beat_defaults() {
    let converter = Converter::default();
    let req = anthropic_request(json!({
        "model": "claude-sonnet-4",
        "max_tokens": 100,
        "temperature": 0.2,
        "messages": [{"role": "user", "content": "hi"}]
    }));
    let DialectRequest::Gemini(out) = converter.convert_request(req, Dialect::Gemini).unwrap() else {
        panic!("expected gemini request");
    };
    let config = out.body.generation_config.unwrap();
    assert_eq!(config.max_output_tokens, Some(100));
    assert_eq!(config.temperature, Some(0.2));
    assert_eq!(config.top_p, Some(0.9));
}

#[test]
fn test_get_weather_tool_round_trip() {
    let converter = Converter::default();
    let original = json!({
        "model": "gpt-4o",
        "max_tokens": 100,
        "messages": [
            {"role": "user", "content": "Weather in Tokyo?"},
            {"role": "assistant", "content": null, "tool_calls": [{
                "id": "call_abc",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"location\":\"Tokyo\"}"}
            }]},
            {"role": "tool", "tool_call_id": "call_abc", "content": "sunny, 22C"}
        ],
        "tools": [{"type": "function", "function": {
            "name": "get_weather",
            "parameters": {"type": "object", "properties": {"location": {"type": "string"}}}
        }}]
    });

    let anthropic = converter
        .convert_request(openai_request(original), Dialect::Anthropic)
        .unwrap();
    let back = converter.convert_request(anthropic, Dialect::OpenAi).unwrap();
    let DialectRequest::OpenAi(back) = back else {
        panic!("expected openai request");
    };

    let assistant = back.messages.iter().find(|m| m.role == "assistant").unwrap();
    let call = &assistant.tool_calls.as_ref().unwrap()[0];
    assert_eq!(call.id, "call_abc");
    assert_eq!(call.function.name, "get_weather");
    let args: Value = serde_json::from_str(&call.function.arguments).unwrap();
    assert_eq!(args, json!({"location": "Tokyo"}));

    let tool = back.messages.iter().find(|m| m.role == "tool").unwrap();
    assert_eq!(tool.tool_call_id.as_deref(), Some("call_abc"));

    let tools = back.tools.unwrap();
    assert_eq!(tools[0].function.name, "get_weather");
}

// ────────────────────────────────────────────────────────────────
// Responses
// ────────────────────────────────────────────────────────────────

#[test]
fn test_usage_total_is_input_plus_output() {
    let converter = Converter::default();
    let resp = openai_response(json!({
        "id": "chatcmpl-1", "object": "chat.completion", "created": 0, "model": "gpt-4o",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }));

    let anthropic = converter
        .convert_response(resp, Dialect::Anthropic, "claude-sonnet-4")
        .unwrap();
    let DialectResponse::Anthropic(ref a) = anthropic else {
        panic!("expected anthropic response");
    };
    assert_eq!(a.usage.input_tokens, 10);
    assert_eq!(a.usage.output_tokens, 5);

    let gemini = converter
        .convert_response(anthropic, Dialect::Gemini, "gemini-2.5-pro")
        .unwrap();
    let DialectResponse::Gemini(g) = gemini else {
        panic!("expected gemini response");
    };
    let usage = g.usage_metadata.unwrap();
    assert_eq!(usage.prompt_token_count, 10);
    assert_eq!(usage.candidates_token_count, 5);
    assert_eq!(usage.total_token_count, 15);
}

#[test]
fn test_length_maps_through_every_dialect() {
    let converter = Converter::default();
    let resp = openai_response(json!({
        "id": "chatcmpl-1", "object": "chat.completion", "created": 0, "model": "gpt-4o",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "trunc"}, "finish_reason": "length"}]
    }));

    let anthropic = converter
        .convert_response(resp, Dialect::Anthropic, "claude-sonnet-4")
        .unwrap();
    let DialectResponse::Anthropic(ref a) = anthropic else {
        panic!("expected anthropic response");
    };
    assert_eq!(a.stop_reason.as_deref(), Some("max_tokens"));

    let gemini = converter
        .convert_response(anthropic, Dialect::Gemini, "gemini-2.5-pro")
        .unwrap();
    let DialectResponse::Gemini(g) = gemini else {
        panic!("expected gemini response");
    };
    assert_eq!(g.candidates[0].finish_reason.as_deref(), Some("MAX_TOKENS"));
}

// ────────────────────────────────────────────────────────────────
// Streaming
// ────────────────────────────────────────────────────────────────

#[test]
fn test_streamed_tool_arguments_reassemble_toward_gemini() {
    let converter = Converter::default();
    let mut stream = converter
        .stream_converter(Dialect::OpenAi, Dialect::Gemini, "gemini-2.5-pro")
        .unwrap();

    let chunk = |delta: Value, finish: Option<&str>| {
        SseFrame::data(
            json!({
                "id": "chatcmpl-1", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
                "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
            })
            .to_string(),
        )
    };

    let pieces = [
        json!({"tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                               "function": {"name": "get_weather", "arguments": "{\"loc"}}]}),
        json!({"tool_calls": [{"index": 0, "function": {"arguments": "ation\":"}}]}),
        json!({"tool_calls": [{"index": 0, "function": {"arguments": "\"Tokyo\"}"}}]}),
    ];
    for piece in pieces {
        assert_eq!(stream.convert(&chunk(piece, None)), FragmentOutcome::Skip);
    }

    let FragmentOutcome::Emit(frames) = stream.convert(&chunk(json!({}), Some("tool_calls"))) else {
        panic!("expected the completed call");
    };
    assert_eq!(frames.len(), 1);
    let frame: Value = serde_json::from_str(&frames[0].data).unwrap();
    let call = &frame["candidates"][0]["content"]["parts"][0]["functionCall"];
    assert_eq!(call["name"], "get_weather");
    assert_eq!(call["args"], json!({"location": "Tokyo"}));

    let tail = stream.finish();
    let last: Value = serde_json::from_str(&tail.last().unwrap().data).unwrap();
    assert_eq!(last["candidates"][0]["finishReason"], "STOP");
}

// ────────────────────────────────────────────────────────────────
// Route table
// ────────────────────────────────────────────────────────────────

#[test]
fn test_denied_pair_names_both_dialects() {
    let converter = Converter::new(
        RouteTable::complete().without(Dialect::Gemini, Dialect::Anthropic),
        Default::default(),
    );
    let req = gemini_request(
        "gemini-2.5-pro",
        json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]}),
    );

    let err = converter.convert_request(req, Dialect::Anthropic).unwrap_err();
    assert_eq!(
        err,
        ConvertError::UnsupportedConversion {
            from: Dialect::Gemini,
            to: Dialect::Anthropic,
            operation: Operation::Request,
        }
    );
    let msg = err.to_string();
    assert!(msg.contains("gemini") && msg.contains("anthropic"));

    let err = converter
        .stream_converter(Dialect::Gemini, Dialect::Anthropic, "claude")
        .unwrap_err();
    assert!(matches!(err, ConvertError::UnsupportedConversion { .. }));

    // The reverse direction is still open.
    let req = anthropic_request(json!({
        "model": "claude-sonnet-4", "max_tokens": 5, "messages": [{"role": "user", "content": "hi"}]
    }));
    assert!(converter.convert_request(req, Dialect::Gemini).is_ok());
}
