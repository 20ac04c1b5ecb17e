//! Error types for the proxy and the converter core.

use thiserror::Error;

use crate::translate::canonical::Dialect;
use crate::translate::dispatch::Operation;

/// Failures raised by the protocol converter.
///
/// Only [`ConvertError::UnsupportedConversion`] is ever returned to a caller.
/// The other two variants describe losses the converter recovers from; they are
/// constructed so the loss can be logged with a uniform message and then dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConvertError {
    #[error("unsupported {operation} conversion from {from} to {to}")]
    UnsupportedConversion {
        from: Dialect,
        to: Dialect,
        operation: Operation,
    },

    #[error("malformed {dialect} stream fragment: {reason}")]
    MalformedFragment { dialect: Dialect, reason: String },

    #[error("content part cannot be represented in {dialect}: {detail}")]
    PartialContentLoss { dialect: Dialect, detail: String },
}

impl ConvertError {
    pub fn unsupported(from: Dialect, to: Dialect, operation: Operation) -> Self {
        Self::UnsupportedConversion {
            from,
            to,
            operation,
        }
    }

    pub fn malformed(dialect: Dialect, reason: impl Into<String>) -> Self {
        Self::MalformedFragment {
            dialect,
            reason: reason.into(),
        }
    }

    pub fn content_loss(dialect: Dialect, detail: impl Into<String>) -> Self {
        Self::PartialContentLoss {
            dialect,
            detail: detail.into(),
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Upstream returned status {status}")]
    UpstreamStatus { status: u16, body: String },

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
