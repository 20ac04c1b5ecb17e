//! Streamed response conversion.
//!
//! A [`StreamConverter`] is bound to one in-flight exchange and runs every
//! upstream SSE frame through three stages:
//!
//! 1. a per-dialect decoder that turns the vendor's event taxonomy into
//!    [`StreamFragment`]s,
//! 2. a [`ToolCallAccumulator`] that buffers argument pieces per call id and
//!    releases each call once, on its completion signal,
//! 3. a per-dialect encoder that re-wraps the result in the client's envelope.
//!
//! Frames that cannot be parsed are skipped; the stream carries on.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::anthropic_types as an;
use super::canonical::{Dialect, StopReason, StreamFragment, Usage};
use super::gemini_types as gm;
use super::openai_types as oa;
use super::request::{object_or_empty, parse_arguments, CallIds};
use super::response::{
    anthropic_id, anthropic_stop_reason, anthropic_stop_str, gemini_finish_reason,
    gemini_stop_reason, gemini_usage, openai_finish_reason, openai_id, openai_stop_reason,
};
use crate::error::ConvertError;

/// One server-sent event. `event` is `None` for unnamed (`message`) events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    Emit(Vec<SseFrame>),
    Skip,
}

fn to_frame<T: Serialize>(event: Option<&str>, value: &T) -> Option<SseFrame> {
    match serde_json::to_string(value) {
        Ok(data) => Some(SseFrame {
            event: event.map(str::to_string),
            data,
        }),
        Err(e) => {
            warn!(error = %e, "Failed to serialize stream frame");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct StreamConverter {
    from: Dialect,
    to: Dialect,
    decoder: Decoder,
    calls: ToolCallAccumulator,
    encoder: Encoder,
}

impl StreamConverter {
    pub fn new(from: Dialect, to: Dialect, model: &str) -> Self {
        Self {
            from,
            to,
            decoder: Decoder::new(from),
            calls: ToolCallAccumulator::default(),
            encoder: Encoder::new(to, model),
        }
    }

    fn is_passthrough(&self) -> bool {
        self.from == self.to
    }

    /// Convert one upstream frame.
    pub fn convert(&mut self, frame: &SseFrame) -> FragmentOutcome {
        if self.is_passthrough() {
            return FragmentOutcome::Emit(vec![frame.clone()]);
        }

        let fragments = match self.decoder.decode(frame) {
            Ok(fragments) => fragments,
            Err(err) => {
                warn!(error = %err, data = %frame.data, "Skipping stream fragment");
                return FragmentOutcome::Skip;
            }
        };

        let out = self.pipe(fragments);
        if out.is_empty() {
            FragmentOutcome::Skip
        } else {
            FragmentOutcome::Emit(out)
        }
    }

    /// Call once the upstream transport closes. Emits whatever the client's
    /// dialect needs to see a properly terminated stream.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.is_passthrough() {
            return Vec::new();
        }
        let fragments = self.decoder.finish();
        let mut out = self.pipe(fragments);
        out.extend(self.encoder.finish());
        out
    }

    fn pipe(&mut self, fragments: Vec<StreamFragment>) -> Vec<SseFrame> {
        let mut out = Vec::new();
        for fragment in fragments {
            for event in self.calls.accept(fragment) {
                out.extend(self.encoder.encode(event));
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tool-call reassembly
// ---------------------------------------------------------------------------

/// Encoder input: a fragment with tool calls already reassembled.
#[derive(Debug, Clone, PartialEq)]
enum Event {
    Start {
        id: Option<String>,
        input_tokens: Option<u64>,
    },
    Text(String),
    Reasoning(String),
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    Finish {
        stop_reason: StopReason,
        usage: Option<Usage>,
    },
    Done,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Buffers argument fragments per call id, in order of first appearance.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    pending: Vec<PendingCall>,
}

impl ToolCallAccumulator {
    fn accept(&mut self, fragment: StreamFragment) -> Vec<Event> {
        match fragment {
            StreamFragment::Start { id, input_tokens } => vec![Event::Start { id, input_tokens }],
            StreamFragment::Text(text) => vec![Event::Text(text)],
            StreamFragment::Reasoning(text) => vec![Event::Reasoning(text)],
            StreamFragment::ToolCall {
                id,
                name,
                arguments,
            } => {
                let call = match self.pending.iter().position(|c| c.id == id) {
                    Some(i) => &mut self.pending[i],
                    None => {
                        self.pending.push(PendingCall {
                            id,
                            ..Default::default()
                        });
                        let last = self.pending.len() - 1;
                        &mut self.pending[last]
                    }
                };
                if let Some(name) = name {
                    call.name = name;
                }
                call.arguments.push_str(&arguments);
                Vec::new()
            }
            StreamFragment::ToolCallComplete { id } => {
                match self.pending.iter().position(|c| c.id == id) {
                    Some(i) => vec![Self::release(self.pending.remove(i))],
                    None => {
                        debug!(call_id = %id, "Completion for unknown tool call");
                        Vec::new()
                    }
                }
            }
            StreamFragment::Finish { stop_reason, usage } => {
                let mut events = self.flush();
                events.push(Event::Finish { stop_reason, usage });
                events
            }
            StreamFragment::Done => {
                let mut events = self.flush();
                events.push(Event::Done);
                events
            }
        }
    }

    /// Release calls that never saw a completion signal.
    fn flush(&mut self) -> Vec<Event> {
        self.pending.drain(..).map(Self::release).collect()
    }

    fn release(call: PendingCall) -> Event {
        Event::ToolCall {
            arguments: parse_arguments(&call.arguments),
            id: call.id,
            name: call.name,
        }
    }
}

// ---------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Decoder {
    OpenAi(OpenAiDecoder),
    Anthropic(AnthropicDecoder),
    Gemini(GeminiDecoder),
}

impl Decoder {
    fn new(dialect: Dialect) -> Self {
        match dialect {
            Dialect::OpenAi => Decoder::OpenAi(OpenAiDecoder::default()),
            Dialect::Anthropic => Decoder::Anthropic(AnthropicDecoder::default()),
            Dialect::Gemini => Decoder::Gemini(GeminiDecoder::default()),
        }
    }

    fn decode(&mut self, frame: &SseFrame) -> Result<Vec<StreamFragment>, ConvertError> {
        match self {
            Decoder::OpenAi(d) => d.decode(frame),
            Decoder::Anthropic(d) => d.decode(frame),
            Decoder::Gemini(d) => d.decode(frame),
        }
    }

    fn finish(&mut self) -> Vec<StreamFragment> {
        match self {
            Decoder::OpenAi(d) => d.finish(),
            Decoder::Anthropic(d) => d.finish(),
            Decoder::Gemini(d) => d.finish(),
        }
    }
}

/// OpenAI chunks. Tool calls are keyed by `index`; only the first piece of a
/// call carries its id. All open calls complete when `finish_reason` arrives.
/// With `include_usage`, usage comes in a trailing chunk with no choices, so
/// the finish is held back until usage or `[DONE]` is seen.
#[derive(Debug, Default)]
struct OpenAiDecoder {
    started: bool,
    done: bool,
    call_ids: HashMap<u64, String>,
    open_calls: Vec<String>,
    pending_stop: Option<StopReason>,
    usage: Option<Usage>,
}

impl OpenAiDecoder {
    fn decode(&mut self, frame: &SseFrame) -> Result<Vec<StreamFragment>, ConvertError> {
        if self.done {
            return Ok(Vec::new());
        }
        let data = frame.data.trim();
        if data == "[DONE]" {
            return Ok(self.finish());
        }

        let chunk: oa::ChatCompletionChunk = serde_json::from_str(data)
            .map_err(|e| ConvertError::malformed(Dialect::OpenAi, e.to_string()))?;

        let mut out = Vec::new();
        if !self.started {
            self.started = true;
            out.push(StreamFragment::Start {
                id: Some(chunk.id.clone()),
                input_tokens: None,
            });
        }

        if let Some(u) = &chunk.usage {
            self.usage = Some(Usage::new(u.prompt_tokens, u.completion_tokens));
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            let delta = choice.delta;
            if let Some(text) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                out.push(StreamFragment::Reasoning(text));
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                out.push(StreamFragment::Text(text));
            }
            for tc in delta.tool_calls.into_iter().flatten() {
                let id = match tc.id {
                    Some(id) => {
                        self.call_ids.insert(tc.index, id.clone());
                        self.open_calls.push(id.clone());
                        id
                    }
                    None => match self.call_ids.get(&tc.index) {
                        Some(id) => id.clone(),
                        None => {
                            warn!(index = tc.index, "Tool call piece without a known id");
                            continue;
                        }
                    },
                };
                let (name, arguments) = tc
                    .function
                    .map(|f| (f.name, f.arguments.unwrap_or_default()))
                    .unwrap_or_default();
                out.push(StreamFragment::ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                out.extend(
                    self.open_calls
                        .drain(..)
                        .map(|id| StreamFragment::ToolCallComplete { id }),
                );
                self.pending_stop = Some(openai_stop_reason(reason));
            }
        }

        if self.usage.is_some() {
            if let Some(stop_reason) = self.pending_stop.take() {
                out.push(StreamFragment::Finish {
                    stop_reason,
                    usage: self.usage,
                });
            }
        }

        Ok(out)
    }

    fn finish(&mut self) -> Vec<StreamFragment> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        let mut out: Vec<StreamFragment> = self
            .open_calls
            .drain(..)
            .map(|id| StreamFragment::ToolCallComplete { id })
            .collect();
        if let Some(stop_reason) = self.pending_stop.take() {
            out.push(StreamFragment::Finish {
                stop_reason,
                usage: self.usage,
            });
        }
        out.push(StreamFragment::Done);
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
enum AnthropicBlock {
    Text,
    Thinking,
    ToolUse { id: String },
}

/// Anthropic's typed event stream. Content blocks are tracked by index so
/// `input_json_delta` pieces can be routed to their call id and
/// `content_block_stop` can complete the call.
#[derive(Debug, Default)]
struct AnthropicDecoder {
    done: bool,
    input_tokens: u64,
    blocks: HashMap<usize, AnthropicBlock>,
}

impl AnthropicDecoder {
    fn decode(&mut self, frame: &SseFrame) -> Result<Vec<StreamFragment>, ConvertError> {
        if self.done {
            return Ok(Vec::new());
        }
        let event: an::StreamEvent = serde_json::from_str(&frame.data)
            .map_err(|e| ConvertError::malformed(Dialect::Anthropic, e.to_string()))?;

        let fragments = match event {
            an::StreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.input_tokens;
                vec![StreamFragment::Start {
                    id: Some(message.id),
                    input_tokens: Some(message.usage.input_tokens),
                }]
            }
            an::StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                an::ResponseContentBlock::Text { text } => {
                    self.blocks.insert(index, AnthropicBlock::Text);
                    non_empty(text, StreamFragment::Text)
                }
                an::ResponseContentBlock::Thinking { thinking, .. } => {
                    self.blocks.insert(index, AnthropicBlock::Thinking);
                    non_empty(thinking, StreamFragment::Reasoning)
                }
                an::ResponseContentBlock::ToolUse { id, name, input } => {
                    self.blocks
                        .insert(index, AnthropicBlock::ToolUse { id: id.clone() });
                    // The opening block carries `{}`; real input streams as deltas.
                    let arguments = match input {
                        Value::Object(ref map) if map.is_empty() => String::new(),
                        other => other.to_string(),
                    };
                    vec![StreamFragment::ToolCall {
                        id,
                        name: Some(name),
                        arguments,
                    }]
                }
            },
            an::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                an::Delta::TextDelta { text } => non_empty(text, StreamFragment::Text),
                an::Delta::ThinkingDelta { thinking } => {
                    non_empty(thinking, StreamFragment::Reasoning)
                }
                an::Delta::InputJsonDelta { partial_json } => match self.blocks.get(&index) {
                    Some(AnthropicBlock::ToolUse { id }) => vec![StreamFragment::ToolCall {
                        id: id.clone(),
                        name: None,
                        arguments: partial_json,
                    }],
                    _ => {
                        return Err(ConvertError::malformed(
                            Dialect::Anthropic,
                            format!("input_json_delta for non-tool block {index}"),
                        ))
                    }
                },
                an::Delta::SignatureDelta { .. } => Vec::new(),
            },
            an::StreamEvent::ContentBlockStop { index } => match self.blocks.remove(&index) {
                Some(AnthropicBlock::ToolUse { id }) => {
                    vec![StreamFragment::ToolCallComplete { id }]
                }
                Some(AnthropicBlock::Text | AnthropicBlock::Thinking) | None => Vec::new(),
            },
            an::StreamEvent::MessageDelta { delta, usage } => vec![StreamFragment::Finish {
                stop_reason: delta
                    .stop_reason
                    .as_deref()
                    .map_or(StopReason::EndTurn, anthropic_stop_reason),
                usage: Some(Usage::new(
                    usage.input_tokens.unwrap_or(self.input_tokens),
                    usage.output_tokens,
                )),
            }],
            an::StreamEvent::MessageStop => {
                self.done = true;
                vec![StreamFragment::Done]
            }
            an::StreamEvent::Ping => Vec::new(),
            an::StreamEvent::Error { error } => {
                warn!(error_type = %error.error_type, message = %error.message, "Upstream stream error");
                Vec::new()
            }
        };
        Ok(fragments)
    }

    fn finish(&mut self) -> Vec<StreamFragment> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        vec![StreamFragment::Done]
    }
}

fn non_empty(text: String, wrap: fn(String) -> StreamFragment) -> Vec<StreamFragment> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![wrap(text)]
    }
}

/// Gemini streams whole `GenerateContentResponse` objects. Function calls
/// arrive complete in a single frame; the stream ends when the transport closes.
#[derive(Debug, Default)]
struct GeminiDecoder {
    started: bool,
    done: bool,
    saw_calls: bool,
    ids: CallIds,
}

impl GeminiDecoder {
    fn decode(&mut self, frame: &SseFrame) -> Result<Vec<StreamFragment>, ConvertError> {
        if self.done {
            return Ok(Vec::new());
        }
        let resp: gm::GenerateContentResponse = serde_json::from_str(&frame.data)
            .map_err(|e| ConvertError::malformed(Dialect::Gemini, e.to_string()))?;

        let mut out = Vec::new();
        if !self.started {
            self.started = true;
            out.push(StreamFragment::Start {
                id: resp.response_id.clone(),
                input_tokens: resp.usage_metadata.as_ref().map(|u| u.prompt_token_count),
            });
        }

        let Some(candidate) = resp.candidates.into_iter().next() else {
            return Ok(out);
        };

        for part in candidate.content.parts {
            let is_thought = part.is_thought();
            if let Some(call) = part.function_call {
                self.saw_calls = true;
                let id = self.ids.invocation(&call.name, call.id);
                out.push(StreamFragment::ToolCall {
                    id: id.clone(),
                    name: Some(call.name),
                    arguments: call.args.to_string(),
                });
                out.push(StreamFragment::ToolCallComplete { id });
                continue;
            }
            match part.text {
                Some(text) if text.is_empty() => {}
                Some(text) if is_thought => out.push(StreamFragment::Reasoning(text)),
                Some(text) => out.push(StreamFragment::Text(text)),
                None => {}
            }
        }

        if let Some(reason) = candidate.finish_reason.as_deref() {
            out.push(StreamFragment::Finish {
                stop_reason: gemini_stop_reason(reason, self.saw_calls),
                usage: resp.usage_metadata.map(gemini_usage),
            });
        }

        Ok(out)
    }

    fn finish(&mut self) -> Vec<StreamFragment> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        vec![StreamFragment::Done]
    }
}

// ---------------------------------------------------------------------------
// Encoders
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Encoder {
    OpenAi(OpenAiEncoder),
    Anthropic(AnthropicEncoder),
    Gemini(GeminiEncoder),
}

impl Encoder {
    fn new(dialect: Dialect, model: &str) -> Self {
        match dialect {
            Dialect::OpenAi => Encoder::OpenAi(OpenAiEncoder::new(model)),
            Dialect::Anthropic => Encoder::Anthropic(AnthropicEncoder::new(model)),
            Dialect::Gemini => Encoder::Gemini(GeminiEncoder::new(model)),
        }
    }

    fn encode(&mut self, event: Event) -> Vec<SseFrame> {
        match self {
            Encoder::OpenAi(e) => e.encode(event),
            Encoder::Anthropic(e) => e.encode(event),
            Encoder::Gemini(e) => e.encode(event),
        }
    }

    fn finish(&mut self) -> Vec<SseFrame> {
        match self {
            Encoder::OpenAi(e) => e.encode(Event::Done),
            Encoder::Anthropic(e) => e.encode(Event::Done),
            Encoder::Gemini(e) => e.encode(Event::Done),
        }
    }
}

/// Emits `chat.completion.chunk` objects and the `[DONE]` sentinel.
#[derive(Debug)]
struct OpenAiEncoder {
    id: Option<String>,
    model: String,
    created: i64,
    sent_role: bool,
    tool_index: u64,
    finished: bool,
    done: bool,
}

impl OpenAiEncoder {
    fn new(model: &str) -> Self {
        Self {
            id: None,
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            sent_role: false,
            tool_index: 0,
            finished: false,
            done: false,
        }
    }

    fn chunk(&mut self, mut delta: oa::ChunkDelta, finish_reason: Option<&str>) -> Option<SseFrame> {
        if !self.sent_role {
            self.sent_role = true;
            delta.role = Some("assistant".to_string());
        }
        let id = self.id.get_or_insert_with(|| openai_id(None)).clone();
        to_frame(
            None,
            &oa::ChatCompletionChunk {
                id,
                object: "chat.completion.chunk".to_string(),
                created: self.created,
                model: self.model.clone(),
                choices: vec![oa::ChunkChoice {
                    index: 0,
                    delta,
                    finish_reason: finish_reason.map(str::to_string),
                }],
                usage: None,
            },
        )
    }

    fn encode(&mut self, event: Event) -> Vec<SseFrame> {
        if self.done {
            return Vec::new();
        }
        let mut out = Vec::new();
        match event {
            Event::Start { id, .. } => {
                if self.id.is_none() {
                    self.id = Some(openai_id(id.as_deref()));
                }
                out.extend(self.chunk(
                    oa::ChunkDelta {
                        content: Some(String::new()),
                        ..Default::default()
                    },
                    None,
                ));
            }
            Event::Text(text) => out.extend(self.chunk(
                oa::ChunkDelta {
                    content: Some(text),
                    ..Default::default()
                },
                None,
            )),
            Event::Reasoning(text) => out.extend(self.chunk(
                oa::ChunkDelta {
                    reasoning_content: Some(text),
                    ..Default::default()
                },
                None,
            )),
            Event::ToolCall {
                id,
                name,
                arguments,
            } => {
                let index = self.tool_index;
                self.tool_index += 1;
                out.extend(self.chunk(
                    oa::ChunkDelta {
                        tool_calls: Some(vec![oa::ChunkToolCall {
                            index,
                            id: Some(id),
                            kind: Some("function".to_string()),
                            function: Some(oa::FunctionCallDelta {
                                name: Some(name),
                                arguments: Some(oa::arguments_text(&arguments)),
                            }),
                        }]),
                        ..Default::default()
                    },
                    None,
                ));
            }
            Event::Finish { stop_reason, usage } => {
                if self.finished {
                    return out;
                }
                self.finished = true;
                out.extend(self.chunk(
                    oa::ChunkDelta::default(),
                    Some(openai_finish_reason(stop_reason)),
                ));
                if let Some(usage) = usage {
                    out.extend(to_frame(
                        None,
                        &oa::ChatCompletionChunk {
                            id: self.id.clone().unwrap_or_default(),
                            object: "chat.completion.chunk".to_string(),
                            created: self.created,
                            model: self.model.clone(),
                            choices: Vec::new(),
                            usage: Some(oa::ChatUsage {
                                prompt_tokens: usage.input_tokens,
                                completion_tokens: usage.output_tokens,
                                total_tokens: usage.total_tokens,
                            }),
                        },
                    ));
                }
            }
            Event::Done => {
                if !self.finished {
                    out.extend(self.encode(Event::Finish {
                        stop_reason: StopReason::EndTurn,
                        usage: None,
                    }));
                }
                self.done = true;
                out.push(SseFrame::data("[DONE]"));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
}

/// Emits Anthropic's block-structured event stream: `message_start`, one
/// start/delta/stop group per content block, `message_delta`, `message_stop`.
#[derive(Debug)]
struct AnthropicEncoder {
    msg_id: Option<String>,
    model: String,
    started: bool,
    delta_sent: bool,
    done: bool,
    block_index: usize,
    open_block: Option<OpenBlock>,
    input_tokens: u64,
}

impl AnthropicEncoder {
    fn new(model: &str) -> Self {
        Self {
            msg_id: None,
            model: model.to_string(),
            started: false,
            delta_sent: false,
            done: false,
            block_index: 0,
            open_block: None,
            input_tokens: 0,
        }
    }

    fn push(out: &mut Vec<SseFrame>, event: &an::StreamEvent) {
        out.extend(to_frame(Some(event.event_name()), event));
    }

    fn ensure_started(&mut self, out: &mut Vec<SseFrame>) {
        if self.started {
            return;
        }
        self.started = true;
        let id = anthropic_id(self.msg_id.as_deref());
        Self::push(
            out,
            &an::StreamEvent::MessageStart {
                message: an::MessagesResponse {
                    id,
                    kind: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: an::Usage {
                        input_tokens: self.input_tokens,
                        ..Default::default()
                    },
                },
            },
        );
        Self::push(out, &an::StreamEvent::Ping);
    }

    fn close_block(&mut self, out: &mut Vec<SseFrame>) {
        if self.open_block.take().is_some() {
            Self::push(
                out,
                &an::StreamEvent::ContentBlockStop {
                    index: self.block_index,
                },
            );
            self.block_index += 1;
        }
    }

    fn open_block(&mut self, kind: OpenBlock, out: &mut Vec<SseFrame>) {
        if self.open_block == Some(kind) {
            return;
        }
        self.close_block(out);
        let content_block = match kind {
            OpenBlock::Text => an::ResponseContentBlock::Text {
                text: String::new(),
            },
            OpenBlock::Thinking => an::ResponseContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
        };
        Self::push(
            out,
            &an::StreamEvent::ContentBlockStart {
                index: self.block_index,
                content_block,
            },
        );
        self.open_block = Some(kind);
    }

    fn encode(&mut self, event: Event) -> Vec<SseFrame> {
        if self.done {
            return Vec::new();
        }
        let mut out = Vec::new();
        match event {
            Event::Start { id, input_tokens } => {
                if !self.started {
                    self.msg_id = id;
                    self.input_tokens = input_tokens.unwrap_or(0);
                }
                self.ensure_started(&mut out);
            }
            Event::Text(text) => {
                self.ensure_started(&mut out);
                self.open_block(OpenBlock::Text, &mut out);
                Self::push(
                    &mut out,
                    &an::StreamEvent::ContentBlockDelta {
                        index: self.block_index,
                        delta: an::Delta::TextDelta { text },
                    },
                );
            }
            Event::Reasoning(thinking) => {
                self.ensure_started(&mut out);
                self.open_block(OpenBlock::Thinking, &mut out);
                Self::push(
                    &mut out,
                    &an::StreamEvent::ContentBlockDelta {
                        index: self.block_index,
                        delta: an::Delta::ThinkingDelta { thinking },
                    },
                );
            }
            Event::ToolCall {
                id,
                name,
                arguments,
            } => {
                self.ensure_started(&mut out);
                self.close_block(&mut out);
                let index = self.block_index;
                Self::push(
                    &mut out,
                    &an::StreamEvent::ContentBlockStart {
                        index,
                        content_block: an::ResponseContentBlock::ToolUse {
                            id,
                            name,
                            input: Value::Object(serde_json::Map::new()),
                        },
                    },
                );
                Self::push(
                    &mut out,
                    &an::StreamEvent::ContentBlockDelta {
                        index,
                        delta: an::Delta::InputJsonDelta {
                            partial_json: object_or_empty(arguments).to_string(),
                        },
                    },
                );
                Self::push(&mut out, &an::StreamEvent::ContentBlockStop { index });
                self.block_index += 1;
            }
            Event::Finish { stop_reason, usage } => {
                if self.delta_sent {
                    return out;
                }
                self.ensure_started(&mut out);
                self.close_block(&mut out);
                self.delta_sent = true;
                Self::push(
                    &mut out,
                    &an::StreamEvent::MessageDelta {
                        delta: an::MessageDeltaBody {
                            stop_reason: Some(anthropic_stop_str(stop_reason).to_string()),
                            stop_sequence: None,
                        },
                        // Only when it differs from what message_start reported
                        usage: an::DeltaUsage {
                            input_tokens: usage
                                .map(|u| u.input_tokens)
                                .filter(|&n| n != self.input_tokens),
                            output_tokens: usage.map_or(0, |u| u.output_tokens),
                        },
                    },
                );
            }
            Event::Done => {
                if !self.delta_sent {
                    out.extend(self.encode(Event::Finish {
                        stop_reason: StopReason::EndTurn,
                        usage: None,
                    }));
                }
                self.done = true;
                Self::push(&mut out, &an::StreamEvent::MessageStop);
            }
        }
        out
    }
}

/// Emits one `GenerateContentResponse` per event. Termination is the
/// transport closing, so `Done` produces nothing.
#[derive(Debug)]
struct GeminiEncoder {
    model: String,
    response_id: Option<String>,
}

impl GeminiEncoder {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_id: None,
        }
    }

    fn frame(&self, parts: Vec<gm::Part>, finish_reason: Option<&str>, usage: Option<Usage>) -> Option<SseFrame> {
        to_frame(
            None,
            &gm::GenerateContentResponse {
                candidates: vec![gm::Candidate {
                    content: gm::Content::new("model", parts),
                    finish_reason: finish_reason.map(str::to_string),
                    index: 0,
                }],
                usage_metadata: usage.map(|u| gm::UsageMetadata {
                    prompt_token_count: u.input_tokens,
                    candidates_token_count: u.output_tokens,
                    total_token_count: u.total_tokens,
                    thoughts_token_count: None,
                }),
                model_version: Some(self.model.clone()),
                response_id: self.response_id.clone(),
            },
        )
    }

    fn encode(&mut self, event: Event) -> Vec<SseFrame> {
        let frame = match event {
            Event::Start { id, .. } => {
                self.response_id = id;
                None
            }
            Event::Text(text) => self.frame(vec![gm::Part::text(text)], None, None),
            Event::Reasoning(text) => self.frame(vec![gm::Part::thought(text)], None, None),
            Event::ToolCall {
                id,
                name,
                arguments,
            } => self.frame(
                vec![gm::Part {
                    function_call: Some(gm::FunctionCall {
                        id: Some(id),
                        name,
                        args: object_or_empty(arguments),
                    }),
                    ..Default::default()
                }],
                None,
                None,
            ),
            Event::Finish { stop_reason, usage } => {
                self.frame(Vec::new(), Some(gemini_finish_reason(stop_reason)), usage)
            }
            Event::Done => None,
        };
        frame.into_iter().collect()
    }
}
