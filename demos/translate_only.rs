//! Demonstrate the conversion layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use dialect_proxy::translate::{
    Converter, Dialect, DialectRequest, DialectResponse, FragmentOutcome, SseFrame,
};
use serde_json::json;

fn main() -> anyhow::Result<()> {
    let converter = Converter::default();

    // An Anthropic Messages request with a tool, headed for Gemini
    let anthropic_req: dialect_proxy::translate::anthropic_types::MessagesRequest =
        serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1024,
            "system": "You are a geography expert. Be concise.",
            "messages": [
                {"role": "user", "content": "What is the capital of France?"},
                {"role": "assistant", "content": "Paris."},
                {"role": "user", "content": "And what's the weather there?"}
            ],
            "tools": [{
                "name": "get_weather",
                "description": "Current weather for a city",
                "input_schema": {
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"],
                    "additionalProperties": false
                }
            }]
        }))?;

    let gemini = converter.convert_request(DialectRequest::Anthropic(anthropic_req), Dialect::Gemini)?;
    if let DialectRequest::Gemini(req) = &gemini {
        println!("=== Request (Gemini, model {}) ===", req.model);
        println!("{}", serde_json::to_string_pretty(&req.body)?);
    }

    // A Gemini reply that calls the tool, shown to an OpenAI client
    let gemini_resp = serde_json::from_value(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [
                {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}
            ]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 42, "candidatesTokenCount": 8, "totalTokenCount": 50}
    }))?;
    let openai = converter.convert_response(DialectResponse::Gemini(gemini_resp), Dialect::OpenAi, "gpt-4o")?;

    println!();
    println!("=== Response (OpenAI) ===");
    println!("{}", serde_json::to_string_pretty(&openai.to_json()?)?);

    // Streamed OpenAI chunks re-encoded as Anthropic events
    println!();
    println!("=== Streaming Demo ===");

    let mut stream = converter.stream_converter(Dialect::OpenAi, Dialect::Anthropic, "claude-sonnet-4")?;
    let pieces = ["The", " capital", " is Paris."];

    for (i, piece) in pieces.iter().enumerate() {
        let chunk = json!({
            "id": "chatcmpl-demo", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"content": piece}, "finish_reason": null}]
        });
        if let FragmentOutcome::Emit(frames) = stream.convert(&SseFrame::data(chunk.to_string())) {
            for frame in frames {
                println!("  chunk {} -> event: {}", i, frame.event.unwrap_or_default());
            }
        }
    }

    stream.convert(&SseFrame::data(
        json!({
            "id": "chatcmpl-demo", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        })
        .to_string(),
    ));
    for frame in stream.finish() {
        println!("  finish -> event: {}", frame.event.unwrap_or_default());
    }

    println!();
    println!("Done! The conversion layer works without any network calls.");
    Ok(())
}
