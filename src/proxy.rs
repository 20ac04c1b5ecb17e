//! Request forwarding: client dialect in, upstream dialect out, and back.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::Stream;
use futures::StreamExt;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::map_model;
use crate::error::{ProxyError, Result};
use crate::translate::error_body::{parse_error_body, render_error};
use crate::translate::{
    Converter, Dialect, DialectRequest, FragmentOutcome, SseFrame, StreamConverter,
};
use crate::upstream::{FrameStream, Upstream};

/// Converted SSE frames ready for the client.
pub type SseStream = Pin<Box<dyn Stream<Item = SseFrame> + Send>>;

/// Outcome of proxying one call.
pub enum ProxyResult {
    Json(Value),
    Stream(SseStream),
    /// Upstream error already rendered in the client's dialect.
    Error(Value, u16),
}

#[derive(Clone)]
pub struct Proxy {
    converter: Converter,
    upstream: Arc<dyn Upstream>,
    models: HashMap<String, String>,
}

impl Proxy {
    pub fn new(
        converter: Converter,
        upstream: Arc<dyn Upstream>,
        models: HashMap<String, String>,
    ) -> Self {
        Self {
            converter,
            upstream,
            models,
        }
    }

    pub fn upstream_dialect(&self) -> Dialect {
        self.upstream.dialect()
    }

    pub fn upstream_healthy(&self) -> bool {
        self.upstream.is_healthy()
    }

    /// Forward a chat request in any client dialect.
    pub async fn forward(&self, request: DialectRequest) -> Result<ProxyResult> {
        let client_dialect = request.dialect();
        let upstream_dialect = self.upstream.dialect();
        let client_model = request.model().to_string();
        let streaming = request.is_stream();

        let mut upstream_req = self.converter.convert_request(request, upstream_dialect)?;
        upstream_req.set_model(map_model(&self.models, &client_model));

        info!(
            client = %client_dialect,
            upstream = %upstream_dialect,
            model = %client_model,
            upstream_model = upstream_req.model(),
            streaming,
            "Forwarding request"
        );

        if streaming {
            // Fail before any bytes go out if the route is denied.
            let converter =
                self.converter
                    .stream_converter(upstream_dialect, client_dialect, &client_model)?;
            match self.upstream.generate_streaming(&upstream_req).await {
                Ok(frames) => Ok(ProxyResult::Stream(Box::pin(convert_stream(frames, converter)))),
                Err(e) => upstream_error(e, upstream_dialect, client_dialect),
            }
        } else {
            let response = match self.upstream.generate(&upstream_req).await {
                Ok(r) => r,
                Err(e) => return upstream_error(e, upstream_dialect, client_dialect),
            };
            let converted = self
                .converter
                .convert_response(response, client_dialect, &client_model)?;
            Ok(ProxyResult::Json(converted.to_json()?))
        }
    }

    /// Fetch the upstream catalog and render it for `client_dialect`.
    pub async fn list_models(&self, client_dialect: Dialect) -> Result<ProxyResult> {
        let upstream_dialect = self.upstream.dialect();
        let list = match self.upstream.list_models().await {
            Ok(l) => l,
            Err(e) => return upstream_error(e, upstream_dialect, client_dialect),
        };
        let converted = self.converter.convert_model_list(list, client_dialect)?;
        Ok(ProxyResult::Json(converted.to_json()?))
    }
}

/// Upstream error statuses become an error body in the client's dialect;
/// everything else stays an error for the caller.
fn upstream_error(err: ProxyError, upstream: Dialect, client: Dialect) -> Result<ProxyResult> {
    match err {
        ProxyError::UpstreamStatus { status, body } => {
            let info = parse_error_body(upstream, status, &body);
            warn!(status, message = %info.message, "Provider error");
            Ok(ProxyResult::Error(render_error(client, &info), status))
        }
        other => Err(other),
    }
}

fn convert_stream(
    mut frames: FrameStream,
    mut converter: StreamConverter,
) -> impl Stream<Item = SseFrame> + Send + 'static {
    async_stream::stream! {
        let mut forwarded = 0usize;

        while let Some(item) = frames.next().await {
            let frame = match item {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "Upstream stream ended with an error");
                    break;
                }
            };

            if let FragmentOutcome::Emit(out) = converter.convert(&frame) {
                for f in out {
                    forwarded += 1;
                    yield f;
                }
            }
        }

        // Close the client's stream even if the upstream never sent its terminator.
        for f in converter.finish() {
            forwarded += 1;
            yield f;
        }

        info!(frames = forwarded, "Stream completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::{DialectModelList, DialectResponse};
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::json;

    /// Anthropic upstream that replays canned frames and fails everything else.
    struct ScriptedUpstream {
        frames: Vec<SseFrame>,
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        fn dialect(&self) -> Dialect {
            Dialect::Anthropic
        }

        async fn generate(&self, _request: &DialectRequest) -> Result<DialectResponse> {
            Err(ProxyError::UpstreamStatus {
                status: 529,
                body: r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
                    .to_string(),
            })
        }

        async fn generate_streaming(&self, _request: &DialectRequest) -> Result<FrameStream> {
            Ok(Box::pin(stream::iter(self.frames.clone().into_iter().map(Ok))))
        }

        async fn list_models(&self) -> Result<DialectModelList> {
            Err(ProxyError::provider("no catalog"))
        }

        fn is_healthy(&self) -> bool {
            true
        }
    }

    fn proxy(frames: Vec<SseFrame>) -> Proxy {
        Proxy::new(
            Converter::default(),
            Arc::new(ScriptedUpstream { frames }),
            HashMap::new(),
        )
    }

    fn openai_request(stream: bool) -> DialectRequest {
        DialectRequest::OpenAi(
            serde_json::from_value(json!({
                "model": "gpt-4o",
                "stream": stream,
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_truncated_upstream_stream_is_still_terminated() {
        let frames = vec![
            SseFrame::named(
                "message_start",
                json!({"type": "message_start", "message": {"id": "msg_1", "type": "message", "role": "assistant",
                       "content": [], "model": "claude", "usage": {"input_tokens": 3, "output_tokens": 0}}})
                .to_string(),
            ),
            SseFrame::named(
                "content_block_start",
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})
                    .to_string(),
            ),
            SseFrame::named(
                "content_block_delta",
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "partial"}})
                    .to_string(),
            ),
        ];

        let out: Vec<SseFrame> = tokio_test::block_on(async {
            let Ok(ProxyResult::Stream(s)) = proxy(frames).forward(openai_request(true)).await else {
                panic!("expected a stream");
            };
            s.collect().await
        });

        assert_eq!(out.last().unwrap().data, "[DONE]");
        let finish: Value = serde_json::from_str(&out[out.len() - 2].data).unwrap();
        assert_eq!(finish["choices"][0]["finish_reason"], "stop");
        assert!(out.iter().any(|f| f.data.contains("partial")));
    }

    #[test]
    fn test_upstream_status_becomes_client_error_body() {
        let result = tokio_test::block_on(proxy(Vec::new()).forward(openai_request(false)));
        let Ok(ProxyResult::Error(body, status)) = result else {
            panic!("expected a rendered error");
        };
        assert_eq!(status, 529);
        assert_eq!(body["error"]["type"], "server_error");
        assert_eq!(body["error"]["message"], "Overloaded");
    }

    #[test]
    fn test_transport_failure_stays_an_error() {
        let result = tokio_test::block_on(proxy(Vec::new()).list_models(Dialect::Gemini));
        assert!(matches!(result, Err(ProxyError::Provider { .. })));
    }
}
