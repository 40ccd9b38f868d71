//! The seam between the controller and whatever performs the network I/O.
//!
//! # Design
//! A `Transport` starts one call and hands back a `TransportHandle` the
//! controller can query for status and headers and ask to abort. Decoded
//! messages, failures and end-of-stream flow back through the `Signals`
//! carried in the `TransportConfig`. A transport may raise these signals in
//! any order and any number of times; the controller sorts that out.
//!
//! `Signals` keep the call alive until it settles, so a call whose `Handle`
//! was dropped still resolves. Once the terminal notification is delivered,
//! every further signal is silently discarded.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

use crate::controller::Exchange;
use crate::http::{HttpMethod, Headers};

/// Starts outbound calls.
pub trait Transport {
    fn start(&self, url: &str, config: TransportConfig) -> Box<dyn TransportHandle>;
}

impl<T: Transport + ?Sized> Transport for Rc<T> {
    fn start(&self, url: &str, config: TransportConfig) -> Box<dyn TransportHandle> {
        (**self).start(url, config)
    }
}

/// A call in flight, as seen by the controller.
pub trait TransportHandle {
    /// Best-effort request to stop all I/O for this call.
    fn abort(&self);

    /// Response status, or 0 if none has been received.
    fn status(&self) -> u16;

    /// Raw `Name: Value` header block, one header per line.
    fn all_headers(&self) -> Option<String>;

    fn header(&self, name: &str) -> Option<String>;

    /// Whatever response text the transport has buffered.
    fn response_text(&self) -> Option<String> {
        None
    }
}

/// Decides whether a call is a long-lived stream. Called once, on the first
/// decoded message.
pub type ChunkProbe = Rc<dyn Fn(&dyn TransportHandle) -> bool>;

/// Default probe: a `Transfer-Encoding: chunked` response, or one the
/// transport marked as multiplexed via `X-Firefox-Spdy`.
pub fn header_chunk_probe(handle: &dyn TransportHandle) -> bool {
    let chunked = handle
        .header("Transfer-Encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
    chunked || handle.header("X-Firefox-Spdy").is_some_and(|v| !v.is_empty())
}

/// Everything a transport needs to run one call.
#[derive(Debug)]
pub struct TransportConfig {
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: Option<String>,
    pub timeout: Option<Duration>,

    /// Token separating messages in a streamed body.
    pub delimiter: Option<String>,
    pub with_credentials: bool,
    pub signals: Signals,
}

/// Signal sink a transport reports into.
///
/// Every clone shares one link to the call. The link is cut when the call
/// settles or is discarded, after which signals are silently ignored.
#[derive(Clone)]
pub struct Signals {
    link: Rc<RefCell<Option<Rc<Exchange>>>>,
}

impl Signals {
    pub(crate) fn new(exchange: Rc<Exchange>) -> Self {
        Self {
            link: Rc::new(RefCell::new(Some(exchange))),
        }
    }

    fn exchange(&self) -> Option<Rc<Exchange>> {
        self.link.borrow().clone()
    }

    /// Cut the link to the call.
    pub(crate) fn release(&self) {
        let exchange = self.link.borrow_mut().take();
        drop(exchange);
    }

    /// One decoded message arrived.
    pub fn data(&self, payload: Value) {
        if let Some(exchange) = self.exchange() {
            exchange.data(payload);
        }
    }

    /// The transport failed. `signal` is the raw failure string, such as
    /// `ETIMEDOUT` or `parsererror`.
    pub fn error(&self, signal: Option<&str>) {
        if let Some(exchange) = self.exchange() {
            exchange.error(signal);
        }
    }

    /// The transport finished, successfully or not.
    pub fn complete(&self) {
        if let Some(exchange) = self.exchange() {
            exchange.complete();
        }
    }

    /// False once the call has settled or was discarded.
    pub fn is_attached(&self) -> bool {
        self.link.borrow().is_some()
    }
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signals")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Stand-in for a handle the transport has not returned yet.
pub(crate) struct Detached;

impl TransportHandle for Detached {
    fn abort(&self) {}

    fn status(&self) -> u16 {
        0
    }

    fn all_headers(&self) -> Option<String> {
        None
    }

    fn header(&self, _name: &str) -> Option<String> {
        None
    }
}
