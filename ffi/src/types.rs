//! `#[repr(C)]` types for the FFI boundary, plus the host-side transport.
//!
//! # Design
//! The C host owns the network. `HostTransport` never performs I/O: `start`
//! parks the outbound call in a `HostCall` that the host reads through
//! `pipecall_call_request` and feeds signals into through the
//! `pipecall_call_*` functions. Conversion helpers live here to keep
//! `lib.rs` focused on the `extern "C"` surface.

use std::cell::{Cell, RefCell};
use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::rc::Rc;
use std::time::Duration;

use pipecall_core::{
    Client, ErrorKind, Handle, Headers, HttpMethod, Settlement, Signals, Transport,
    TransportConfig, TransportHandle,
};

/// Opaque handle to a `Client`. C callers receive a pointer to this and pass
/// it back into `pipecall_submit`.
pub struct FfiClient {
    pub(crate) inner: Client<Rc<HostTransport>>,
}

/// Opaque handle to one submitted call.
pub struct FfiCall {
    pub(crate) handle: Handle,
    pub(crate) host: Rc<HostCall>,
}

// ---------------------------------------------------------------------------
// Host transport
// ---------------------------------------------------------------------------

/// Transport whose I/O is performed by the C host.
#[derive(Default)]
pub(crate) struct HostTransport {
    started: RefCell<Option<Rc<HostCall>>>,
}

impl HostTransport {
    /// The call most recently passed to `start`.
    pub(crate) fn take_started(&self) -> Option<Rc<HostCall>> {
        self.started.borrow_mut().take()
    }
}

impl Transport for HostTransport {
    fn start(&self, url: &str, config: TransportConfig) -> Box<dyn TransportHandle> {
        let call = Rc::new(HostCall {
            url: url.to_string(),
            method: config.method,
            headers: config.headers,
            body: config.body,
            timeout: config.timeout,
            delimiter: config.delimiter,
            signals: config.signals,
            status: Cell::new(0),
            raw_headers: RefCell::new(None),
            text: RefCell::new(None),
            aborted: Cell::new(false),
        });
        *self.started.borrow_mut() = Some(Rc::clone(&call));
        Box::new(HostHandle(call))
    }
}

/// Outbound request and response state for one host-driven call.
pub(crate) struct HostCall {
    pub(crate) url: String,
    pub(crate) method: HttpMethod,
    pub(crate) headers: Headers,
    pub(crate) body: Option<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) delimiter: Option<String>,
    pub(crate) signals: Signals,
    pub(crate) status: Cell<u16>,
    pub(crate) raw_headers: RefCell<Option<String>>,
    pub(crate) text: RefCell<Option<String>>,
    pub(crate) aborted: Cell<bool>,
}

struct HostHandle(Rc<HostCall>);

impl TransportHandle for HostHandle {
    fn abort(&self) {
        self.0.aborted.set(true);
    }

    fn status(&self) -> u16 {
        self.0.status.get()
    }

    fn all_headers(&self) -> Option<String> {
        self.0.raw_headers.borrow().clone()
    }

    fn header(&self, name: &str) -> Option<String> {
        let raw = self.0.raw_headers.borrow();
        let headers = pipecall_core::deserialize_headers(raw.as_deref()?);
        headers.get(name).map(str::to_string)
    }

    fn response_text(&self) -> Option<String> {
        self.0.text.borrow().clone()
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// HTTP method as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Patch = 3,
    Delete = 4,
    Head = 5,
    Options = 6,
}

impl From<HttpMethod> for FfiHttpMethod {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => FfiHttpMethod::Get,
            HttpMethod::Post => FfiHttpMethod::Post,
            HttpMethod::Put => FfiHttpMethod::Put,
            HttpMethod::Patch => FfiHttpMethod::Patch,
            HttpMethod::Delete => FfiHttpMethod::Delete,
            HttpMethod::Head => FfiHttpMethod::Head,
            HttpMethod::Options => FfiHttpMethod::Options,
        }
    }
}

/// A single HTTP header as a key-value pair of C strings.
#[repr(C)]
pub struct FfiHeader {
    pub key: *mut c_char,
    pub value: *mut c_char,
}

/// The request the host must execute for a call.
///
/// `timeout_ms` is 0 when no socket timeout applies. `body` and `delimiter`
/// are null when absent; a null delimiter means `"\n\n"`.
#[repr(C)]
pub struct FfiHttpRequest {
    pub url: *mut c_char,
    pub method: FfiHttpMethod,
    pub headers: *mut FfiHeader,
    pub headers_len: u32,
    pub body: *mut c_char,
    pub timeout_ms: u64,
    pub delimiter: *mut c_char,
}

impl FfiHttpRequest {
    /// Copy a call's outbound request into a heap-allocated `FfiHttpRequest`.
    ///
    /// Returns null if any string contains an interior NUL.
    pub(crate) fn from_call(call: &HostCall) -> *mut Self {
        let Ok(url) = CString::new(call.url.as_str()) else {
            return std::ptr::null_mut();
        };
        let Ok(body) = optional_c_string(call.body.as_deref()) else {
            return std::ptr::null_mut();
        };
        let Ok(delimiter) = optional_c_string(call.delimiter.as_deref()) else {
            return std::ptr::null_mut();
        };
        let pairs: Result<Vec<(CString, CString)>, _> = call
            .headers
            .iter()
            .map(|(k, v)| Ok::<_, std::ffi::NulError>((CString::new(k)?, CString::new(v)?)))
            .collect();
        let Ok(pairs) = pairs else {
            return std::ptr::null_mut();
        };

        let headers_len = pairs.len() as u32;
        let headers = if pairs.is_empty() {
            std::ptr::null_mut()
        } else {
            let ffi_headers: Box<[FfiHeader]> = pairs
                .into_iter()
                .map(|(k, v)| FfiHeader {
                    key: k.into_raw(),
                    value: v.into_raw(),
                })
                .collect();
            Box::into_raw(ffi_headers) as *mut FfiHeader
        };

        let timeout_ms = call
            .timeout
            .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));

        Box::into_raw(Box::new(FfiHttpRequest {
            url: url.into_raw(),
            method: call.method.into(),
            headers,
            headers_len,
            body: into_raw_or_null(body),
            timeout_ms,
            delimiter: into_raw_or_null(delimiter),
        }))
    }
}

fn optional_c_string(s: Option<&str>) -> Result<Option<CString>, std::ffi::NulError> {
    s.map(CString::new).transpose()
}

fn into_raw_or_null(s: Option<CString>) -> *mut c_char {
    s.map_or(std::ptr::null_mut(), CString::into_raw)
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Outcome category reported in `FfiSettlement`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    Timeout = 1,
    ParseError = 2,
    BadRequest = 3,
    NotFound = 4,
    Status = 5,
}

impl From<ErrorKind> for FfiErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Timeout => FfiErrorCode::Timeout,
            ErrorKind::ParseError => FfiErrorCode::ParseError,
            ErrorKind::BadRequest => FfiErrorCode::BadRequest,
            ErrorKind::NotFound => FfiErrorCode::NotFound,
            ErrorKind::Status => FfiErrorCode::Status,
        }
    }
}

/// One notification, borrowed by the C callback.
///
/// Every pointer is valid only for the duration of the callback. On success
/// `message` is null and `body` is the decoded message as JSON, or null for
/// a status-only or end-of-stream notification. On failure `message` is the
/// classified message and `body` is the raw response text, if any.
/// `headers` is a JSON object of response headers, or null.
#[repr(C)]
pub struct FfiSettlement {
    pub error_code: FfiErrorCode,
    pub http_status: u16,
    pub message: *const c_char,
    pub body: *const c_char,
    pub headers: *const c_char,
}

/// Completion callback. `user_data` is passed back untouched.
pub type FfiSettleFn = extern "C" fn(settlement: *const FfiSettlement, user_data: *mut c_void);

/// Owned strings backing one `FfiSettlement`.
pub(crate) struct SettlementStrings {
    error_code: FfiErrorCode,
    http_status: u16,
    message: Option<CString>,
    body: Option<CString>,
    headers: Option<CString>,
}

impl SettlementStrings {
    pub(crate) fn new(settled: &Settlement) -> Self {
        match settled {
            Ok(res) => Self {
                error_code: FfiErrorCode::Ok,
                http_status: res.status,
                message: None,
                body: res
                    .body
                    .as_ref()
                    .and_then(|b| serde_json::to_string(b).ok())
                    .and_then(|s| CString::new(s).ok()),
                headers: headers_json(&res.headers),
            },
            Err(err) => Self {
                error_code: err.kind.into(),
                http_status: err.http_status,
                message: CString::new(err.message.as_str()).ok(),
                body: err
                    .raw_response
                    .as_deref()
                    .and_then(|s| CString::new(s).ok()),
                headers: None,
            },
        }
    }

    /// View borrowing `self`; must not outlive it.
    pub(crate) fn as_ffi(&self) -> FfiSettlement {
        FfiSettlement {
            error_code: self.error_code,
            http_status: self.http_status,
            message: borrow_or_null(&self.message),
            body: borrow_or_null(&self.body),
            headers: borrow_or_null(&self.headers),
        }
    }
}

fn borrow_or_null(s: &Option<CString>) -> *const c_char {
    s.as_ref().map_or(std::ptr::null(), |s| s.as_ptr())
}

fn headers_json(headers: &Headers) -> Option<CString> {
    if headers.is_empty() {
        return None;
    }
    let map: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::from(v)))
        .collect();
    let json = serde_json::to_string(&map).ok()?;
    CString::new(json).ok()
}
