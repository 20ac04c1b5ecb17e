//! Error bodies in each dialect's shape.
//!
//! Upstream failures are parsed in the upstream's dialect and re-rendered in the
//! client's, so a client never sees a foreign error schema.

use serde_json::Value;

use super::anthropic_types as an;
use super::canonical::Dialect;
use super::gemini_types as gm;
use super::openai_types as oa;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Authentication,
    PermissionDenied,
    NotFound,
    RateLimited,
    Overloaded,
    Internal,
}

impl ErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 413 | 422 => ErrorKind::InvalidRequest,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::PermissionDenied,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited,
            503 | 529 => ErrorKind::Overloaded,
            _ => ErrorKind::Internal,
        }
    }

    pub fn status(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimited => 429,
            ErrorKind::Overloaded => 503,
            ErrorKind::Internal => 500,
        }
    }

    fn openai_type(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::PermissionDenied => "permission_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::RateLimited => "rate_limit_error",
            ErrorKind::Overloaded | ErrorKind::Internal => "server_error",
        }
    }

    fn anthropic_type(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::PermissionDenied => "permission_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::RateLimited => "rate_limit_error",
            ErrorKind::Overloaded => "overloaded_error",
            ErrorKind::Internal => "api_error",
        }
    }

    fn gemini_status(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "INVALID_ARGUMENT",
            ErrorKind::Authentication => "UNAUTHENTICATED",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::RateLimited => "RESOURCE_EXHAUSTED",
            ErrorKind::Overloaded => "UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Pull the message out of an upstream error body. Unknown shapes keep the raw body.
pub fn parse_error_body(dialect: Dialect, status: u16, body: &str) -> ErrorInfo {
    let message = match dialect {
        Dialect::OpenAi => serde_json::from_str::<oa::ChatErrorResponse>(body)
            .ok()
            .map(|e| e.error.message),
        Dialect::Anthropic => serde_json::from_str::<an::ErrorResponse>(body)
            .ok()
            .map(|e| e.error.message),
        Dialect::Gemini => serde_json::from_str::<gm::ErrorResponse>(body)
            .ok()
            .map(|e| e.error.message),
    };

    let message = message.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            format!("upstream returned status {status}")
        } else {
            trimmed.to_string()
        }
    });

    ErrorInfo::new(ErrorKind::from_status(status), message)
}

pub fn render_error(dialect: Dialect, info: &ErrorInfo) -> Value {
    let rendered = match dialect {
        Dialect::OpenAi => serde_json::to_value(oa::ChatErrorResponse {
            error: oa::ChatError {
                message: info.message.clone(),
                error_type: info.kind.openai_type().to_string(),
                code: None,
            },
        }),
        Dialect::Anthropic => serde_json::to_value(an::ErrorResponse::new(
            info.kind.anthropic_type(),
            info.message.clone(),
        )),
        Dialect::Gemini => serde_json::to_value(gm::ErrorResponse::new(
            info.kind.status(),
            info.kind.gemini_status(),
            info.message.clone(),
        )),
    };
    rendered.unwrap_or(Value::Null)
}
