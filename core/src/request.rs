//! Request description and the helpers that shape it for a transport.
//!
//! # Design
//! A `RequestSpec` names the target by parts (protocol, host, port, base
//! path, path, search) rather than by URL, so a `ClientConfig` can pin
//! endpoint parts once and every request fills in the rest. Values set in
//! the config take precedence; headers merge per name with the config entry
//! winning. Structured queries and bodies are form-urlencoded.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::BuildError;
use crate::http::{HttpMethod, Headers};

const DEFAULT_PROTOCOL: &str = "http:";

/// Marker header sent with every call so servers can tell these requests
/// apart from page navigations.
pub const REQUESTED_WITH: (&str, &str) = ("X-Requested-With", "XMLHttpRequest");

/// Query string for a request: either pre-encoded or a flat object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Query {
    Raw(String),
    Structured(Value),
}

/// Request body: either sent as-is or a flat object to form-encode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Body {
    Text(String),
    Structured(Value),
}

/// Endpoint defaults shared by every request a `Client` submits.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub protocol: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub basepath: Option<String>,
    pub path: Option<String>,
    pub method: Option<HttpMethod>,
    pub headers: Headers,
    pub socket_timeout_ms: Option<u64>,
    pub delimiter: Option<String>,
    pub with_credentials: Option<bool>,
}

impl ClientConfig {
    pub fn from_json(raw: &str) -> Result<Self, BuildError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Caller-supplied description of one call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestSpec {
    pub method: Option<HttpMethod>,
    pub protocol: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub basepath: Option<String>,
    pub path: Option<String>,
    pub search: Option<Query>,
    pub headers: Headers,
    pub body: Option<Body>,
    pub socket_timeout_ms: Option<u64>,
    pub delimiter: Option<String>,
    pub with_credentials: Option<bool>,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            method: Some(method),
            path: Some(path.to_string()),
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, BuildError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_search(mut self, search: Query) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_delimiter(mut self, delimiter: &str) -> Self {
        self.delimiter = Some(delimiter.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Apply `config` on top of this request. Any value the config sets
    /// replaces the request's; the request keeps whatever the config leaves
    /// unset.
    pub fn merged_with(mut self, config: &ClientConfig) -> Self {
        pin(&mut self.protocol, &config.protocol);
        pin(&mut self.hostname, &config.hostname);
        pin(&mut self.port, &config.port);
        pin(&mut self.basepath, &config.basepath);
        pin(&mut self.path, &config.path);
        pin(&mut self.method, &config.method);
        pin(&mut self.socket_timeout_ms, &config.socket_timeout_ms);
        pin(&mut self.delimiter, &config.delimiter);
        pin(&mut self.with_credentials, &config.with_credentials);
        for (name, value) in config.headers.iter() {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method.unwrap_or_default()
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        self.socket_timeout_ms.map(Duration::from_millis)
    }

    /// Assemble `protocol//host[:port][/basepath][/path][?search]`.
    pub fn to_url(&self) -> Result<String, BuildError> {
        let hostname = self
            .hostname
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or(BuildError::MissingHostname)?;

        let mut url = self.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL).to_string();
        if !url.ends_with(':') {
            url.push(':');
        }
        url.push_str("//");
        url.push_str(hostname);
        if let Some(port) = self.port {
            url.push_str(&format!(":{port}"));
        }
        for segment in [&self.basepath, &self.path].into_iter().flatten() {
            if !segment.is_empty() {
                url.push('/');
                url.push_str(unslash(segment));
            }
        }

        let search = match &self.search {
            None => None,
            Some(Query::Raw(raw)) => Some(raw.clone()),
            Some(Query::Structured(value)) => {
                Some(serde_urlencoded::to_string(value).map_err(BuildError::Query)?)
            }
        };
        if let Some(search) = search.filter(|s| !s.is_empty()) {
            url.push('?');
            url.push_str(&search);
        }
        Ok(url)
    }

    /// Encode the body into the string a transport sends.
    pub fn encode_body(&self) -> Result<Option<String>, BuildError> {
        match &self.body {
            None => Ok(None),
            Some(Body::Text(text)) => Ok(Some(text.clone())),
            Some(Body::Structured(value)) => serde_urlencoded::to_string(value)
                .map(Some)
                .map_err(BuildError::Body),
        }
    }

    /// Request headers plus the `X-Requested-With` marker, which always
    /// overrides a caller-supplied value.
    pub fn outbound_headers(&self) -> Headers {
        let mut headers = self.headers.clone();
        headers.insert(REQUESTED_WITH.0, REQUESTED_WITH.1);
        headers
    }
}

fn pin<T: Clone>(target: &mut Option<T>, pinned: &Option<T>) {
    if pinned.is_some() {
        target.clone_from(pinned);
    }
}

/// Strip a single slash: the leading one if present, otherwise a trailing
/// one. `"/api/"` becomes `"api/"`.
fn unslash(segment: &str) -> &str {
    segment
        .strip_prefix('/')
        .or_else(|| segment.strip_suffix('/'))
        .unwrap_or(segment)
}
