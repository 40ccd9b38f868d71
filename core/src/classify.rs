//! Maps raw transport failure signals to a classified outcome.

use crate::error::ErrorKind;

/// Signal a transport raises when its socket timeout fires.
pub const TIMEOUT_SIGNAL: &str = "ETIMEDOUT";

/// Signal a streaming transport raises when a message fails to decode.
pub const PARSE_ERROR_SIGNAL: &str = "parsererror";

/// Signal a transport raises for a `400 Bad Request` response.
pub const BAD_REQUEST_SIGNAL: &str = "Bad Request";

const DEFAULT_MESSAGE: &str = "Resource not found";

/// Result of classifying a transport signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: ErrorKind,
    pub http_status: u16,
    pub message: String,
}

/// Classify a raw transport signal. Total: every input maps to an outcome,
/// and an empty string is treated the same as no signal.
pub fn classify(raw: Option<&str>) -> Classified {
    let raw = raw.filter(|s| !s.is_empty());
    let (kind, http_status, message) = match raw {
        Some(TIMEOUT_SIGNAL) => (ErrorKind::Timeout, 408, "Connection timeout"),
        Some(PARSE_ERROR_SIGNAL) => (ErrorKind::ParseError, 500, PARSE_ERROR_SIGNAL),
        Some(BAD_REQUEST_SIGNAL) => (ErrorKind::BadRequest, 400, BAD_REQUEST_SIGNAL),
        Some(other) => (ErrorKind::NotFound, 404, other),
        None => (ErrorKind::NotFound, 404, DEFAULT_MESSAGE),
    };
    Classified {
        kind,
        http_status,
        message: message.to_string(),
    }
}
