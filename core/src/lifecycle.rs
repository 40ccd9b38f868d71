//! Per-call state machine that folds transport signals into notifications.
//!
//! # Design
//! ```text
//!   Pending ──data──▶ Receiving ──┐
//!      │                 │        │
//!    error             error   complete
//!      ▼                 ▼        │
//!   Errored ◀────────────┘        │
//!      │                          │
//!   complete ────────────────▶ Terminal
//! ```
//!
//! Every transition method returns the notifications it produced instead of
//! invoking a callback, so the controller decides when to deliver them and
//! the machine can be driven directly in tests. Cancellation is
//! `force_timeout` followed by `on_stream_end`.
//!
//! Latches: the first error wins; `is_chunked` never resets; nothing is
//! produced once the machine is `Terminal`.

use serde_json::Value;
use tracing::trace;

use crate::error::RequestError;
use crate::http::{deserialize_headers, Headers, Response};
use crate::transport::TransportHandle;

/// A single delivery to the completion callback.
pub type Settlement = Result<Response, RequestError>;

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Pending,
    Receiving,
    Errored(RequestError),
    Terminal,
}

#[derive(Debug)]
pub struct Lifecycle {
    phase: Phase,
    has_errored: bool,
    is_chunked: bool,
    probed: bool,
    cached_headers: Option<String>,
    delivered: usize,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: Phase::Pending,
            has_errored: false,
            is_chunked: false,
            probed: false,
            cached_headers: None,
            delivered: 0,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn has_errored(&self) -> bool {
        self.has_errored
    }

    pub fn has_completed(&self) -> bool {
        self.phase == Phase::Terminal
    }

    pub fn is_chunked(&self) -> bool {
        self.is_chunked
    }

    /// Number of notifications produced so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// A decoded message arrived. Dropped after an error or completion.
    pub fn on_data(
        &mut self,
        payload: Value,
        handle: &dyn TransportHandle,
        probe: &dyn Fn(&dyn TransportHandle) -> bool,
    ) -> Option<Settlement> {
        match self.phase {
            Phase::Pending | Phase::Receiving => {}
            Phase::Errored(_) | Phase::Terminal => {
                trace!(phase = ?self.phase, "dropping data signal");
                return None;
            }
        }
        self.phase = Phase::Receiving;

        if !self.probed {
            self.probed = true;
            self.is_chunked = probe(handle);
            trace!(is_chunked = self.is_chunked, "probed transport");
        }

        let headers = self.snapshot_headers(handle);
        self.delivered += 1;
        Some(Ok(Response {
            status: 200,
            headers,
            body: Some(payload),
        }))
    }

    /// The transport failed. Only the first error is recorded. Returns
    /// whether this signal was recorded.
    pub fn on_error(&mut self, signal: Option<&str>, handle: &dyn TransportHandle) -> bool {
        match self.phase {
            Phase::Pending | Phase::Receiving => {}
            Phase::Errored(_) | Phase::Terminal => {
                trace!(?signal, "dropping repeated error signal");
                return false;
            }
        }
        let err = RequestError::from_signal(signal);
        let err = if err.is_timeout() {
            err
        } else {
            err.with_raw_response(handle.response_text())
        };
        trace!(kind = ?err.kind, status = err.http_status, "error latched");
        self.latch_error(err);
        true
    }

    /// Replace any pending outcome with a timeout. Returns false if the call
    /// already completed.
    pub fn force_timeout(&mut self) -> bool {
        if self.has_completed() {
            trace!("dropping cancel after completion");
            return false;
        }
        self.latch_error(RequestError::timeout());
        true
    }

    /// The transport finished. Produces the terminal notifications; a no-op
    /// after the first call.
    pub fn on_stream_end(&mut self, handle: &dyn TransportHandle) -> Vec<Settlement> {
        let settled = match std::mem::replace(&mut self.phase, Phase::Terminal) {
            Phase::Terminal => {
                trace!("dropping repeated completion signal");
                return Vec::new();
            }
            Phase::Errored(err) => vec![Err(err)],
            Phase::Pending | Phase::Receiving => self.complete_without_error(handle),
        };
        self.delivered += settled.len();
        settled
    }

    fn complete_without_error(&mut self, handle: &dyn TransportHandle) -> Vec<Settlement> {
        let mut settled = Vec::new();
        match handle.status() {
            200 => {}
            status @ 201..=299 => settled.push(Ok(self.bodyless(status, handle))),
            status => {
                self.has_errored = true;
                let err = RequestError::from_status(status).with_raw_response(handle.response_text());
                return vec![Err(err)];
            }
        }

        if self.is_chunked || (self.delivered == 0 && settled.is_empty()) {
            settled.push(Ok(self.bodyless(200, handle)));
        }
        settled
    }

    fn latch_error(&mut self, err: RequestError) {
        self.has_errored = true;
        self.phase = Phase::Errored(err);
    }

    fn bodyless(&mut self, status: u16, handle: &dyn TransportHandle) -> Response {
        Response {
            status,
            headers: self.snapshot_headers(handle),
            body: None,
        }
    }

    fn snapshot_headers(&mut self, handle: &dyn TransportHandle) -> Headers {
        let raw = self
            .cached_headers
            .get_or_insert_with(|| handle.all_headers().unwrap_or_default());
        deserialize_headers(raw)
    }
}
