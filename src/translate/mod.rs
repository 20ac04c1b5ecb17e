//! Dialect translation between OpenAI, Anthropic and Gemini.
//!
//! Every conversion goes through the canonical model in [`canonical`]: the
//! source dialect is ingested, then the target dialect is emitted. Nothing in
//! this module performs I/O.

pub mod anthropic_types;
pub mod canonical;
pub mod catalog;
pub mod dispatch;
pub mod error_body;
pub mod gemini_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;

pub use canonical::{ConversionDefaults, Dialect};
pub use dispatch::{
    Converter, DialectModelList, DialectRequest, DialectResponse, GeminiRequest, Operation,
    RouteTable,
};
pub use streaming::{FragmentOutcome, SseFrame, StreamConverter};
