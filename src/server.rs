use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::proxy::{Proxy, ProxyResult};
use crate::translate::error_body::{render_error, ErrorInfo, ErrorKind};
use crate::translate::{Dialect, DialectRequest, GeminiRequest, SseFrame};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub proxy: Proxy,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/messages", post(handle_messages))
        .route("/v1beta/models/:model_action", post(handle_generate_content))
        .route("/v1/models", get(handle_models))
        .route("/v1beta/models", get(handle_gemini_models))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match parse_body(Dialect::OpenAi, &body) {
        Ok(req) => forward(&state, DialectRequest::OpenAi(req)).await,
        Err(resp) => resp,
    }
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match parse_body(Dialect::Anthropic, &body) {
        Ok(req) => forward(&state, DialectRequest::Anthropic(req)).await,
        Err(resp) => resp,
    }
}

/// `POST /v1beta/models/{model}:generateContent` and `...:streamGenerateContent`.
async fn handle_generate_content(
    State(state): State<Arc<AppState>>,
    Path(model_action): Path<String>,
    body: Bytes,
) -> Response {
    let stream = match model_action.rsplit_once(':') {
        Some((_, "generateContent")) => false,
        Some((_, "streamGenerateContent")) => true,
        _ => {
            let info = ErrorInfo::new(
                ErrorKind::NotFound,
                format!("unknown method '{model_action}'"),
            );
            return error_response(Dialect::Gemini, &info, StatusCode::NOT_FOUND);
        }
    };
    let model = model_action
        .rsplit_once(':')
        .map_or(model_action.as_str(), |(m, _)| m)
        .to_string();

    match parse_body(Dialect::Gemini, &body) {
        Ok(body) => {
            let req = GeminiRequest {
                model,
                stream,
                body,
            };
            forward(&state, DialectRequest::Gemini(req)).await
        }
        Err(resp) => resp,
    }
}

/// OpenAI-shaped catalog, or Anthropic-shaped when the client sends `anthropic-version`.
async fn handle_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let dialect = if headers.contains_key("anthropic-version") {
        Dialect::Anthropic
    } else {
        Dialect::OpenAi
    };
    reply(dialect, state.proxy.list_models(dialect).await)
}

async fn handle_gemini_models(State(state): State<Arc<AppState>>) -> Response {
    reply(Dialect::Gemini, state.proxy.list_models(Dialect::Gemini).await)
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "upstream": state.config.upstream.name,
        "upstream_dialect": state.proxy.upstream_dialect(),
        "upstream_healthy": state.proxy.upstream_healthy(),
    }))
}

async fn forward(state: &AppState, req: DialectRequest) -> Response {
    let dialect = req.dialect();
    reply(dialect, state.proxy.forward(req).await)
}

fn parse_body<T: DeserializeOwned>(dialect: Dialect, body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(%dialect, error = %e, "Failed to parse request");
        let info = ErrorInfo::new(
            ErrorKind::InvalidRequest,
            format!("Invalid request body: {e}"),
        );
        error_response(dialect, &info, StatusCode::BAD_REQUEST)
    })
}

fn reply(dialect: Dialect, result: crate::error::Result<ProxyResult>) -> Response {
    match result {
        Ok(ProxyResult::Json(body)) => Json(body).into_response(),
        Ok(ProxyResult::Stream(frames)) => {
            let events = frames.map(|frame| Ok::<_, Infallible>(to_event(frame)));
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Ok(ProxyResult::Error(body, status)) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(body)).into_response()
        }
        Err(e) => {
            error!(%dialect, error = %e, "Proxy error");
            let (kind, status) = match &e {
                ProxyError::Convert(_) => (ErrorKind::InvalidRequest, StatusCode::BAD_REQUEST),
                ProxyError::Config { .. } => {
                    (ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR)
                }
                _ => (ErrorKind::Internal, StatusCode::BAD_GATEWAY),
            };
            error_response(dialect, &ErrorInfo::new(kind, e.to_string()), status)
        }
    }
}

fn error_response(dialect: Dialect, info: &ErrorInfo, status: StatusCode) -> Response {
    (status, Json(render_error(dialect, info))).into_response()
}

fn to_event(frame: SseFrame) -> Event {
    let event = Event::default().data(frame.data);
    match frame.event {
        Some(name) => event.event(name),
        None => event,
    }
}
