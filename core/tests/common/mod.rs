//! Scripted in-memory transport shared by the integration tests.
//!
//! `FakeTransport` records every call it is asked to start and lets the test
//! play the server: set a status and header block, push decoded messages,
//! raise failure strings and complete, in any order and any number of
//! times. `FakeCall::respond` mimics a streaming JSON transport end to end.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use pipecall_core::{
    HttpMethod, Headers, Settlement, Signals, Transport, TransportConfig, TransportHandle,
};

const DEFAULT_DELIMITER: &str = "\n\n";

#[derive(Default)]
pub struct FakeTransport {
    calls: RefCell<Vec<Rc<FakeCall>>>,
}

impl FakeTransport {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn last(&self) -> Rc<FakeCall> {
        Rc::clone(self.calls.borrow().last().expect("no call started"))
    }

    pub fn started(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Transport for FakeTransport {
    fn start(&self, url: &str, config: TransportConfig) -> Box<dyn TransportHandle> {
        let call = Rc::new(FakeCall {
            url: url.to_string(),
            method: config.method,
            headers: config.headers,
            body: config.body,
            timeout: config.timeout,
            delimiter: config.delimiter,
            signals: config.signals,
            status: Cell::new(0),
            raw_headers: RefCell::new(String::new()),
            text: RefCell::new(None),
            aborted: Cell::new(false),
        });
        self.calls.borrow_mut().push(Rc::clone(&call));
        Box::new(FakeHandle(call))
    }
}

pub struct FakeCall {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
    pub delimiter: Option<String>,
    signals: Signals,
    status: Cell<u16>,
    raw_headers: RefCell<String>,
    text: RefCell<Option<String>>,
    aborted: Cell<bool>,
}

impl FakeCall {
    pub fn set_response(&self, status: u16, headers: &str) {
        self.status.set(status);
        *self.raw_headers.borrow_mut() = headers.to_string();
    }

    pub fn set_text(&self, text: &str) {
        *self.text.borrow_mut() = Some(text.to_string());
    }

    pub fn data(&self, payload: serde_json::Value) {
        self.signals.data(payload);
    }

    pub fn error(&self, signal: Option<&str>) {
        self.signals.error(signal);
    }

    pub fn complete(&self) {
        self.signals.complete();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }

    pub fn is_attached(&self) -> bool {
        self.signals.is_attached()
    }

    /// Play a whole response the way a streaming JSON transport would:
    /// split a 2xx body on the delimiter and decode each message, stopping at
    /// the first undecodable one; report any other status by its reason
    /// phrase; then complete.
    pub fn respond(&self, status: u16, headers: &str, body: &str) {
        self.set_response(status, headers);
        self.set_text(body);

        if (200..300).contains(&status) {
            let delimiter = self.delimiter.as_deref().unwrap_or(DEFAULT_DELIMITER);
            for message in body.split(delimiter).filter(|m| !m.trim().is_empty()) {
                match serde_json::from_str(message) {
                    Ok(payload) => self.data(payload),
                    Err(_) => {
                        self.error(Some("parsererror"));
                        break;
                    }
                }
            }
        } else {
            let reason = http_reason(status);
            self.error(reason.as_deref());
        }
        self.complete();
    }
}

struct FakeHandle(Rc<FakeCall>);

impl TransportHandle for FakeHandle {
    fn abort(&self) {
        self.0.aborted.set(true);
    }

    fn status(&self) -> u16 {
        self.0.status.get()
    }

    fn all_headers(&self) -> Option<String> {
        Some(self.0.raw_headers.borrow().clone())
    }

    fn header(&self, name: &str) -> Option<String> {
        pipecall_core::deserialize_headers(&self.0.raw_headers.borrow())
            .get(name)
            .map(str::to_string)
    }

    fn response_text(&self) -> Option<String> {
        self.0.text.borrow().clone()
    }
}

fn http_reason(status: u16) -> Option<String> {
    match status {
        400 => Some("Bad Request".to_string()),
        404 => Some("Not Found".to_string()),
        500 => Some("Internal Server Error".to_string()),
        _ => None,
    }
}

/// Callback that records every notification it receives.
pub fn recorder() -> (Rc<RefCell<Vec<Settlement>>>, impl FnMut(Settlement) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    (seen, move |s| sink.borrow_mut().push(s))
}

pub const CHUNKED: &str = "Content-Type: application/json\nTransfer-Encoding: chunked";
pub const JSON: &str = "Content-Type: application/json";
