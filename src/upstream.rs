//! The upstream model host.
//!
//! [`Upstream`] is the seam between the HTTP surface and the vendor: it sends
//! a request already in the upstream's dialect and hands back the raw payload,
//! still in that dialect. Conversion happens on either side of it.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::translate::{Dialect, DialectModelList, DialectRequest, DialectResponse, SseFrame};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame>> + Send>>;

#[async_trait]
pub trait Upstream: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Send a non-streaming request. Status codes >= 400 come back as
    /// [`ProxyError::UpstreamStatus`] carrying the raw body.
    async fn generate(&self, request: &DialectRequest) -> Result<DialectResponse>;

    /// Send a streaming request and yield the upstream's SSE frames in order.
    async fn generate_streaming(&self, request: &DialectRequest) -> Result<FrameStream>;

    async fn list_models(&self) -> Result<DialectModelList>;

    /// False after the last call failed at the transport level or with a 5xx.
    fn is_healthy(&self) -> bool;
}

/// Upstream reached over HTTPS with the vendor's own endpoints and auth.
pub struct HttpUpstream {
    dialect: Dialect,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    healthy: AtomicBool,
}

impl HttpUpstream {
    pub fn new(
        dialect: Dialect,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            dialect,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            healthy: AtomicBool::new(true),
        }
    }

    pub fn from_config(config: &ProxyConfig, client: reqwest::Client) -> Result<Self> {
        Ok(Self::new(
            config.upstream_dialect()?,
            config.effective_base_url()?,
            config.resolve_api_key()?,
            client,
        ))
    }

    fn generate_url(&self, request: &DialectRequest) -> String {
        let base = &self.base_url;
        match request {
            DialectRequest::OpenAi(_) => format!("{base}/chat/completions"),
            DialectRequest::Anthropic(_) => format!("{base}/v1/messages"),
            DialectRequest::Gemini(r) if r.stream => {
                format!("{base}/v1beta/models/{}:streamGenerateContent?alt=sse", r.model)
            }
            DialectRequest::Gemini(r) => {
                format!("{base}/v1beta/models/{}:generateContent", r.model)
            }
        }
    }

    fn models_url(&self) -> String {
        let base = &self.base_url;
        match self.dialect {
            Dialect::OpenAi => format!("{base}/models"),
            Dialect::Anthropic => format!("{base}/v1/models"),
            Dialect::Gemini => format!("{base}/v1beta/models"),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.dialect {
            Dialect::OpenAi => builder.bearer_auth(&self.api_key),
            Dialect::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            Dialect::Gemini => builder.header("x-goog-api-key", &self.api_key),
        }
    }

    fn post(&self, request: &DialectRequest) -> Result<reqwest::RequestBuilder> {
        if request.dialect() != self.dialect {
            return Err(ProxyError::provider(format!(
                "{} upstream cannot send a {} request",
                self.dialect,
                request.dialect()
            )));
        }
        let url = self.generate_url(request);
        info!(%url, model = request.model(), stream = request.is_stream(), "POST upstream");

        let builder = self.authorize(self.client.post(&url));
        Ok(match request {
            DialectRequest::OpenAi(r) => builder.json(r),
            DialectRequest::Anthropic(r) => builder.json(r),
            DialectRequest::Gemini(r) => builder.json(&r.body),
        })
    }

    /// Send and split off error statuses, tracking health as a side effect.
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                return Err(ProxyError::provider(format!("Request failed: {e}")));
            }
        };

        let status = response.status().as_u16();
        self.healthy.store(status < 500, Ordering::Relaxed);
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body_len = body.len(), "Upstream returned an error");
            return Err(ProxyError::UpstreamStatus { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn generate(&self, request: &DialectRequest) -> Result<DialectResponse> {
        let response = self.send(self.post(request)?).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::provider(format!("Failed to read response body: {e}")))?;
        debug!(body_len = body.len(), "Upstream response");

        Ok(match self.dialect {
            Dialect::OpenAi => DialectResponse::OpenAi(serde_json::from_slice(&body)?),
            Dialect::Anthropic => DialectResponse::Anthropic(serde_json::from_slice(&body)?),
            Dialect::Gemini => DialectResponse::Gemini(serde_json::from_slice(&body)?),
        })
    }

    async fn generate_streaming(&self, request: &DialectRequest) -> Result<FrameStream> {
        let response = self.send(self.post(request)?).await?;

        let frames = response.bytes_stream().eventsource().filter_map(|result| async move {
            match result {
                Ok(event) if event.data.trim().is_empty() => None,
                Ok(event) => {
                    let name = (!event.event.is_empty() && event.event != "message")
                        .then_some(event.event);
                    Some(Ok(SseFrame {
                        event: name,
                        data: event.data,
                    }))
                }
                Err(e) => Some(Err(ProxyError::provider(format!("Stream error: {e}")))),
            }
        });

        Ok(Box::pin(frames))
    }

    async fn list_models(&self) -> Result<DialectModelList> {
        let url = self.models_url();
        info!(%url, "GET upstream models");
        let response = self.send(self.authorize(self.client.get(&url))).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::provider(format!("Failed to read models body: {e}")))?;

        Ok(match self.dialect {
            Dialect::OpenAi => DialectModelList::OpenAi(serde_json::from_slice(&body)?),
            Dialect::Anthropic => DialectModelList::Anthropic(serde_json::from_slice(&body)?),
            Dialect::Gemini => DialectModelList::Gemini(serde_json::from_slice(&body)?),
        })
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::gemini_types::GenerateContentRequest;
    use crate::translate::GeminiRequest;

    fn upstream(dialect: Dialect) -> HttpUpstream {
        HttpUpstream::new(dialect, "https://host.example/", "k", reqwest::Client::new())
    }

    #[test]
    fn test_gemini_urls_carry_model_and_mode() {
        let up = upstream(Dialect::Gemini);
        let mut req = GeminiRequest {
            model: "gemini-2.5-pro".to_string(),
            stream: false,
            body: GenerateContentRequest::default(),
        };
        assert_eq!(
            up.generate_url(&DialectRequest::Gemini(req.clone())),
            "https://host.example/v1beta/models/gemini-2.5-pro:generateContent"
        );
        req.stream = true;
        assert_eq!(
            up.generate_url(&DialectRequest::Gemini(req)),
            "https://host.example/v1beta/models/gemini-2.5-pro:streamGenerateContent?alt=sse"
        );
        assert_eq!(up.models_url(), "https://host.example/v1beta/models");
    }

    #[test]
    fn test_models_url_per_dialect() {
        assert_eq!(upstream(Dialect::OpenAi).models_url(), "https://host.example/models");
        assert_eq!(
            upstream(Dialect::Anthropic).models_url(),
            "https://host.example/v1/models"
        );
    }

    #[test]
    fn test_rejects_request_in_foreign_dialect() {
        let up = upstream(Dialect::Anthropic);
        let req = DialectRequest::Gemini(GeminiRequest {
            model: "m".to_string(),
            stream: false,
            body: GenerateContentRequest::default(),
        });
        assert!(matches!(up.post(&req), Err(ProxyError::Provider { .. })));
        assert!(up.is_healthy());
    }
}
