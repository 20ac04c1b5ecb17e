//! Dispatch layer: picks the conversion rule for a `(from, to, operation)`
//! triple and runs it through the canonical pivot.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use super::anthropic_types::{MessagesRequest, MessagesResponse, ModelList as AnthropicModelList};
use super::canonical::{ConversionDefaults, Dialect};
use super::gemini_types::{
    GenerateContentRequest, GenerateContentResponse, ModelList as GeminiModelList,
};
use super::openai_types::{ChatCompletionRequest, ChatCompletionResponse, ModelList as OpenAiModelList};
use super::streaming::StreamConverter;
use super::{catalog, request, response};
use crate::error::ConvertError;

/// The four conversion kinds a route can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Request,
    Response,
    StreamFragment,
    ModelList,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Request,
        Operation::Response,
        Operation::StreamFragment,
        Operation::ModelList,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Request => "request",
            Operation::Response => "response",
            Operation::StreamFragment => "stream fragment",
            Operation::ModelList => "model list",
        })
    }
}

// ---------------------------------------------------------------------------
// Dialect-tagged payloads
// ---------------------------------------------------------------------------

/// A Gemini request. The model and the streaming flag live in the URL, so
/// they travel beside the body.
#[derive(Debug, Clone)]
pub struct GeminiRequest {
    pub model: String,
    pub stream: bool,
    pub body: GenerateContentRequest,
}

#[derive(Debug, Clone)]
pub enum DialectRequest {
    OpenAi(ChatCompletionRequest),
    Anthropic(MessagesRequest),
    Gemini(GeminiRequest),
}

impl DialectRequest {
    pub fn dialect(&self) -> Dialect {
        match self {
            DialectRequest::OpenAi(_) => Dialect::OpenAi,
            DialectRequest::Anthropic(_) => Dialect::Anthropic,
            DialectRequest::Gemini(_) => Dialect::Gemini,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            DialectRequest::OpenAi(r) => &r.model,
            DialectRequest::Anthropic(r) => &r.model,
            DialectRequest::Gemini(r) => &r.model,
        }
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        match self {
            DialectRequest::OpenAi(r) => r.model = model,
            DialectRequest::Anthropic(r) => r.model = model,
            DialectRequest::Gemini(r) => r.model = model,
        }
    }

    pub fn is_stream(&self) -> bool {
        match self {
            DialectRequest::OpenAi(r) => r.stream.unwrap_or(false),
            DialectRequest::Anthropic(r) => r.stream.unwrap_or(false),
            DialectRequest::Gemini(r) => r.stream,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DialectResponse {
    OpenAi(ChatCompletionResponse),
    Anthropic(MessagesResponse),
    Gemini(GenerateContentResponse),
}

impl DialectResponse {
    pub fn dialect(&self) -> Dialect {
        match self {
            DialectResponse::OpenAi(_) => Dialect::OpenAi,
            DialectResponse::Anthropic(_) => Dialect::Anthropic,
            DialectResponse::Gemini(_) => Dialect::Gemini,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            DialectResponse::OpenAi(r) => serde_json::to_value(r),
            DialectResponse::Anthropic(r) => serde_json::to_value(r),
            DialectResponse::Gemini(r) => serde_json::to_value(r),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DialectModelList {
    OpenAi(OpenAiModelList),
    Anthropic(AnthropicModelList),
    Gemini(GeminiModelList),
}

impl DialectModelList {
    pub fn dialect(&self) -> Dialect {
        match self {
            DialectModelList::OpenAi(_) => Dialect::OpenAi,
            DialectModelList::Anthropic(_) => Dialect::Anthropic,
            DialectModelList::Gemini(_) => Dialect::Gemini,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            DialectModelList::OpenAi(l) => serde_json::to_value(l),
            DialectModelList::Anthropic(l) => serde_json::to_value(l),
            DialectModelList::Gemini(l) => serde_json::to_value(l),
        }
    }
}

// ---------------------------------------------------------------------------
// Route table
// ---------------------------------------------------------------------------

/// The set of cross-dialect rules the converter is allowed to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    rules: HashSet<(Dialect, Dialect, Operation)>,
}

impl RouteTable {
    /// No cross-dialect rules at all; only identity conversions succeed.
    pub fn empty() -> Self {
        Self {
            rules: HashSet::new(),
        }
    }

    /// Every directed pair for every operation.
    pub fn complete() -> Self {
        let mut rules = HashSet::new();
        for from in Dialect::ALL {
            for to in Dialect::ALL {
                if from == to {
                    continue;
                }
                for op in Operation::ALL {
                    rules.insert((from, to, op));
                }
            }
        }
        Self { rules }
    }

    /// Drop every operation for the directed pair `from -> to`.
    #[must_use]
    pub fn without(mut self, from: Dialect, to: Dialect) -> Self {
        self.rules.retain(|&(f, t, _)| !(f == from && t == to));
        self
    }

    #[must_use]
    pub fn with(mut self, from: Dialect, to: Dialect, op: Operation) -> Self {
        if from != to {
            self.rules.insert((from, to, op));
        }
        self
    }

    /// Build the complete table minus the pairs listed as `"from->to"`.
    pub fn complete_except<S: AsRef<str>>(deny: &[S]) -> Result<Self, String> {
        let mut table = Self::complete();
        for entry in deny {
            let (from, to) = parse_pair(entry.as_ref())?;
            table = table.without(from, to);
        }
        Ok(table)
    }

    pub fn supports(&self, from: Dialect, to: Dialect, op: Operation) -> bool {
        from == to || self.rules.contains(&(from, to, op))
    }

    fn check(&self, from: Dialect, to: Dialect, op: Operation) -> Result<(), ConvertError> {
        if self.supports(from, to, op) {
            Ok(())
        } else {
            Err(ConvertError::unsupported(from, to, op))
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::complete()
    }
}

fn parse_pair(entry: &str) -> Result<(Dialect, Dialect), String> {
    let (from, to) = entry
        .split_once("->")
        .ok_or_else(|| format!("route '{entry}' must look like 'from->to'"))?;
    Ok((from.parse()?, to.parse()?))
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Entry point for every conversion. Cheap to share: `Send + Sync`, no interior state.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    table: RouteTable,
    defaults: ConversionDefaults,
}

impl Converter {
    pub fn new(table: RouteTable, defaults: ConversionDefaults) -> Self {
        Self { table, defaults }
    }

    pub fn convert_request(
        &self,
        req: DialectRequest,
        to: Dialect,
    ) -> Result<DialectRequest, ConvertError> {
        let from = req.dialect();
        if from == to {
            return Ok(req);
        }
        self.table.check(from, to, Operation::Request)?;
        debug!(%from, %to, model = req.model(), "Converting request");

        let canonical = request::ingest(req);
        Ok(request::emit(canonical, to, &self.defaults))
    }

    /// Convert a complete response. `model` is the id the client asked for.
    pub fn convert_response(
        &self,
        resp: DialectResponse,
        to: Dialect,
        model: &str,
    ) -> Result<DialectResponse, ConvertError> {
        let from = resp.dialect();
        if from == to {
            return Ok(resp);
        }
        self.table.check(from, to, Operation::Response)?;
        debug!(%from, %to, model, "Converting response");

        let canonical = response::ingest(resp);
        Ok(response::emit(canonical, to, model))
    }

    /// Build the per-exchange converter for a streamed response.
    pub fn stream_converter(
        &self,
        from: Dialect,
        to: Dialect,
        model: &str,
    ) -> Result<StreamConverter, ConvertError> {
        self.table.check(from, to, Operation::StreamFragment)?;
        Ok(StreamConverter::new(from, to, model))
    }

    pub fn convert_model_list(
        &self,
        list: DialectModelList,
        to: Dialect,
    ) -> Result<DialectModelList, ConvertError> {
        let from = list.dialect();
        if from == to {
            return Ok(list);
        }
        self.table.check(from, to, Operation::ModelList)?;

        let models = catalog::ingest(list);
        Ok(catalog::emit(models, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_table_has_every_cross_pair() {
        let table = RouteTable::complete();
        for from in Dialect::ALL {
            for to in Dialect::ALL {
                for op in Operation::ALL {
                    assert!(table.supports(from, to, op), "{from}->{to} {op}");
                }
            }
        }
    }

    #[test]
    fn test_denied_pair_is_directional() {
        let table = RouteTable::complete_except(&["anthropic->gemini"]).unwrap();
        assert!(!table.supports(Dialect::Anthropic, Dialect::Gemini, Operation::Request));
        assert!(table.supports(Dialect::Gemini, Dialect::Anthropic, Operation::Request));
    }

    #[test]
    fn test_empty_table_still_allows_identity() {
        let table = RouteTable::empty();
        assert!(table.supports(Dialect::Gemini, Dialect::Gemini, Operation::Response));
        assert!(!table.supports(Dialect::OpenAi, Dialect::Gemini, Operation::Response));
    }

    #[test]
    fn test_bad_deny_entry_is_rejected() {
        assert!(RouteTable::complete_except(&["openai=>gemini"]).is_err());
        assert!(RouteTable::complete_except(&["openai->kiro"]).is_err());
    }

    #[test]
    fn test_stream_converter_respects_table() {
        let converter = Converter::new(
            RouteTable::empty().with(Dialect::OpenAi, Dialect::Anthropic, Operation::StreamFragment),
            ConversionDefaults::default(),
        );
        assert!(converter
            .stream_converter(Dialect::OpenAi, Dialect::Anthropic, "m")
            .is_ok());
        let err = converter
            .stream_converter(Dialect::Anthropic, Dialect::OpenAi, "m")
            .unwrap_err();
        assert_eq!(
            err,
            ConvertError::unsupported(Dialect::Anthropic, Dialect::OpenAi, Operation::StreamFragment)
        );
    }
}
