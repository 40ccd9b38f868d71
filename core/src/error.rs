//! Error types for the call lifecycle.
//!
//! # Design
//! Everything that can go wrong once a call is in flight collapses into a
//! single `RequestError`: the classified kind, the HTTP status the caller
//! sees, and a human-readable message. The raw signal string and any
//! response text the transport still had are kept alongside for debugging.
//!
//! Failures that happen before the transport is touched (an unencodable
//! query, a config that does not parse) are `BuildError`s and are returned
//! synchronously from `Client::submit`.

use thiserror::Error;

use crate::classify::{classify, Classified};

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transport timed out, or the call was cancelled.
    Timeout,

    /// The transport could not decode a streamed message.
    ParseError,

    /// The transport reported `Bad Request`.
    BadRequest,

    /// Fallback for any other transport signal, including none at all.
    NotFound,

    /// The call completed with a non-2xx status and no transport signal.
    Status,
}

/// Terminal error delivered to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RequestError {
    pub kind: ErrorKind,
    pub http_status: u16,
    pub message: String,

    /// The raw transport signal this error was classified from, if any.
    pub code: Option<String>,

    /// Response text the transport held when the error was recorded.
    pub raw_response: Option<String>,
}

impl RequestError {
    /// Classify a raw transport signal.
    pub fn from_signal(raw: Option<&str>) -> Self {
        let code = raw.filter(|s| !s.is_empty()).map(str::to_string);
        let Classified {
            kind,
            http_status,
            message,
        } = classify(raw);
        Self {
            kind,
            http_status,
            message,
            code,
            raw_response: None,
        }
    }

    /// The error a cancelled call resolves with.
    pub fn timeout() -> Self {
        Self::from_signal(Some(crate::classify::TIMEOUT_SIGNAL))
    }

    /// Error for a call that completed with a non-2xx status but no signal.
    pub fn from_status(status: u16) -> Self {
        let message = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}"));
        Self {
            kind: ErrorKind::Status,
            http_status: status,
            message,
            code: None,
            raw_response: None,
        }
    }

    pub fn with_raw_response(mut self, raw: Option<String>) -> Self {
        self.raw_response = raw;
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

/// Errors raised while turning a `RequestSpec` into a transport call.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Neither the request nor the client config named a host.
    #[error("request has no hostname")]
    MissingHostname,

    /// A structured query could not be form-encoded.
    #[error("query encoding failed: {0}")]
    Query(#[source] serde_urlencoded::ser::Error),

    /// A structured body could not be form-encoded.
    #[error("body encoding failed: {0}")]
    Body(#[source] serde_urlencoded::ser::Error),

    /// A JSON client config or request document could not be parsed.
    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}
