//! Submits calls and delivers their notifications to the caller.
//!
//! # Design
//! `Client::submit` shapes a `RequestSpec` into a transport call and wires
//! the transport's signals to a per-call `Exchange`. The exchange owns the
//! `Lifecycle` machine and the caller's callback. Everything is
//! single-threaded: signals arrive on the same thread that owns the
//! `Handle`, so shared state lives in `RefCell`s.
//!
//! Notifications go through a queue. If the callback re-enters the exchange
//! (for example by cancelling from inside `on_settle`), the resulting
//! notifications are queued and delivered after the current callback
//! returns, which keeps delivery strictly ordered.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::BuildError;
use crate::lifecycle::{Lifecycle, Settlement};
use crate::request::{ClientConfig, RequestSpec};
use crate::transport::{
    header_chunk_probe, ChunkProbe, Detached, Signals, Transport, TransportConfig, TransportHandle,
};

type OnSettle = Box<dyn FnMut(Settlement)>;

/// Issues calls over a `Transport`.
pub struct Client<T> {
    transport: T,
    config: ClientConfig,
    probe: ChunkProbe,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    pub fn with_config(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            probe: Rc::new(header_chunk_probe),
        }
    }

    /// Replace the check that decides whether a call is a long-lived stream.
    pub fn with_chunk_probe(mut self, probe: impl Fn(&dyn TransportHandle) -> bool + 'static) -> Self {
        self.probe = Rc::new(probe);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start one call.
    ///
    /// `on_settle` receives every decoded message as `Ok`, followed by at
    /// most one terminal notification: an `Err`, a status-only `Ok`, and for
    /// streamed responses a trailing body-less `Ok` marking the end of the
    /// stream. It is called at least once per call, even if the returned
    /// `Handle` is dropped; use `Handle::discard` to silence it.
    pub fn submit<F>(&self, spec: RequestSpec, on_settle: F) -> Result<Handle, BuildError>
    where
        F: FnMut(Settlement) + 'static,
    {
        let spec = spec.merged_with(&self.config);
        let url = spec.to_url()?;
        let body = spec.encode_body()?;

        let exchange = Rc::new(Exchange::new(url, Rc::clone(&self.probe), Box::new(on_settle)));
        let signals = Signals::new(Rc::clone(&exchange));
        *exchange.signals.borrow_mut() = Some(signals.clone());
        let config = TransportConfig {
            method: spec.method(),
            headers: spec.outbound_headers(),
            body,
            timeout: spec.socket_timeout(),
            delimiter: spec.delimiter.clone(),
            with_credentials: spec.with_credentials.unwrap_or(false),
            signals,
        };

        debug!(url = %exchange.url, method = %config.method, timeout = ?config.timeout, "submitting call");
        let handle = self.transport.start(&exchange.url, config);
        exchange.attach(Rc::from(handle));
        Ok(Handle { exchange })
    }
}

impl<T: fmt::Debug> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Caller-side handle to one call in flight.
#[must_use = "without the handle the call can no longer be cancelled or discarded"]
pub struct Handle {
    exchange: Rc<Exchange>,
}

impl Handle {
    /// Abort the call and resolve it with a timeout. A no-op once the call
    /// has settled.
    pub fn cancel(&self) {
        self.exchange.cancel();
    }

    /// Abort the call and drop its callback without notifying it.
    pub fn discard(self) {
        self.exchange.discard();
    }

    /// True once the terminal notification has been produced.
    pub fn is_settled(&self) -> bool {
        self.exchange.lifecycle.borrow().has_completed()
    }

    pub fn url(&self) -> &str {
        &self.exchange.url
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("url", &self.exchange.url)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// A transport signal raised before `start` returned its handle.
enum Early {
    Data(Value),
    Error(Option<String>),
    Complete,
}

/// Clears the delivering flag even if the callback unwinds.
struct Delivering<'a>(&'a Cell<bool>);

impl Drop for Delivering<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// State shared between a `Handle` and the `Signals` its transport holds.
///
/// The exchange and its signals reference each other until the call
/// settles; `finish` breaks the cycle.
pub(crate) struct Exchange {
    url: String,
    lifecycle: RefCell<Lifecycle>,
    handle: RefCell<Option<Rc<dyn TransportHandle>>>,
    signals: RefCell<Option<Signals>>,
    early: RefCell<Option<Vec<Early>>>,
    probe: ChunkProbe,
    on_settle: RefCell<Option<OnSettle>>,
    queue: RefCell<VecDeque<Settlement>>,
    delivering: Cell<bool>,
    finished: Cell<bool>,
}

impl Exchange {
    fn new(url: String, probe: ChunkProbe, on_settle: OnSettle) -> Self {
        Self {
            url,
            lifecycle: RefCell::new(Lifecycle::new()),
            handle: RefCell::new(None),
            signals: RefCell::new(None),
            early: RefCell::new(Some(Vec::new())),
            probe,
            on_settle: RefCell::new(Some(on_settle)),
            queue: RefCell::new(VecDeque::new()),
            delivering: Cell::new(false),
            finished: Cell::new(false),
        }
    }

    /// Install the transport handle, then replay any signals the transport
    /// raised from inside `start`.
    fn attach(&self, handle: Rc<dyn TransportHandle>) {
        *self.handle.borrow_mut() = Some(handle);
        let early = self.early.borrow_mut().take().unwrap_or_default();
        if !early.is_empty() {
            trace!(url = %self.url, count = early.len(), "replaying early signals");
        }
        for signal in early {
            match signal {
                Early::Data(payload) => self.data(payload),
                Early::Error(signal) => self.error(signal.as_deref()),
                Early::Complete => self.complete(),
            }
        }
    }

    fn current_handle(&self) -> Rc<dyn TransportHandle> {
        let handle = self.handle.borrow().clone();
        handle.unwrap_or_else(|| Rc::new(Detached) as Rc<dyn TransportHandle>)
    }

    pub(crate) fn data(&self, payload: Value) {
        trace!(url = %self.url, "data signal");
        if let Some(early) = self.early.borrow_mut().as_mut() {
            early.push(Early::Data(payload));
            return;
        }
        let handle = self.current_handle();
        let settled = self
            .lifecycle
            .borrow_mut()
            .on_data(payload, handle.as_ref(), self.probe.as_ref());
        self.deliver(settled.into_iter().collect());
    }

    pub(crate) fn error(&self, signal: Option<&str>) {
        trace!(url = %self.url, ?signal, "error signal");
        if let Some(early) = self.early.borrow_mut().as_mut() {
            early.push(Early::Error(signal.map(str::to_string)));
            return;
        }
        let handle = self.current_handle();
        self.lifecycle.borrow_mut().on_error(signal, handle.as_ref());
    }

    pub(crate) fn complete(&self) {
        trace!(url = %self.url, "complete signal");
        if let Some(early) = self.early.borrow_mut().as_mut() {
            early.push(Early::Complete);
            return;
        }
        let handle = self.current_handle();
        let settled = self.lifecycle.borrow_mut().on_stream_end(handle.as_ref());
        self.deliver(settled);
    }

    fn cancel(&self) {
        if !self.lifecycle.borrow_mut().force_timeout() {
            return;
        }
        debug!(url = %self.url, "cancelling call");
        let handle = self.handle.borrow().clone();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.complete();
    }

    fn discard(&self) {
        if self.finished.get() {
            return;
        }
        debug!(url = %self.url, "discarding call");
        let handle = self.handle.borrow().clone();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.finish();
    }

    fn deliver(&self, settled: Vec<Settlement>) {
        self.queue.borrow_mut().extend(settled);
        if self.delivering.replace(true) {
            return;
        }

        {
            let _guard = Delivering(&self.delivering);
            while !self.finished.get() {
                let next = self.queue.borrow_mut().pop_front();
                let Some(settlement) = next else {
                    break;
                };
                let callback = self.on_settle.borrow_mut().take();
                if let Some(mut callback) = callback {
                    callback(settlement);
                    if !self.finished.get() {
                        *self.on_settle.borrow_mut() = Some(callback);
                    }
                }
            }
        }

        let lifecycle = self.lifecycle.borrow();
        if lifecycle.has_completed() && !self.finished.get() {
            debug!(
                url = %self.url,
                delivered = lifecycle.delivered(),
                errored = lifecycle.has_errored(),
                chunked = lifecycle.is_chunked(),
                "call settled"
            );
            drop(lifecycle);
            self.finish();
        }
    }

    /// Drop the callback and the transport handle, and cut the signals'
    /// link to this exchange.
    fn finish(&self) {
        self.finished.set(true);
        self.on_settle.borrow_mut().take();
        self.handle.borrow_mut().take();
        self.queue.borrow_mut().clear();
        let signals = self.signals.borrow_mut().take();
        if let Some(signals) = signals {
            signals.release();
        }
    }
}
