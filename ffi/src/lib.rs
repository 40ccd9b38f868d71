//! C-ABI wrapper around `pipecall-core`.
//!
//! # Overview
//! Exposes the call lifecycle controller through `extern "C"` functions so
//! a host that owns the network (any language with a C FFI) gets the same
//! ordered, at-most-once notification protocol without reimplementing it.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - `pipecall_submit` returns a call object. The host reads the outbound
//!   request from it, performs the I/O, and reports status, headers,
//!   decoded messages, failures and completion back through the
//!   `pipecall_call_*` functions.
//! - Notifications reach C as a borrowed `FfiSettlement`, valid only for
//!   the duration of the callback.
//! - The C caller owns all returned pointers and must call the matching
//!   `pipecall_*_free` function to release them.
//! - Calls are single-threaded: every function taking a call must run on
//!   the thread that submitted it.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use pipecall_core::{Client, ClientConfig, RequestSpec, Settlement};

use types::*;

fn str_arg<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a new client from a JSON `ClientConfig`.
///
/// A null `config_json` means no endpoint defaults. Returns null if the
/// config does not parse or an internal panic occurs.
/// The caller must free the returned pointer with `pipecall_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_client_new(config_json: *const c_char) -> *mut FfiClient {
    catch_unwind(|| {
        let config = if config_json.is_null() {
            ClientConfig::default()
        } else {
            let Some(raw) = str_arg(config_json) else {
                return std::ptr::null_mut();
            };
            match ClientConfig::from_json(raw) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(%err, "rejecting client config");
                    return std::ptr::null_mut();
                }
            }
        };
        let client = Client::with_config(Default::default(), config);
        Box::into_raw(Box::new(FfiClient { inner: client }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client created by `pipecall_client_new`. Safe to call with null.
/// Calls already submitted stay valid.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_client_free(client: *mut FfiClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Submit a call described by a JSON `RequestSpec`.
///
/// `on_settle` is invoked with every notification for the call, on the
/// thread that feeds its signals; `user_data` is passed back untouched.
/// Returns null if an argument is null, the request does not parse, or its
/// URL, query or body cannot be built.
/// The caller must free the returned pointer with `pipecall_call_free`.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_submit(
    client: *const FfiClient,
    request_json: *const c_char,
    on_settle: Option<FfiSettleFn>,
    user_data: *mut c_void,
) -> *mut FfiCall {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return std::ptr::null_mut();
        }
        let Some(on_settle) = on_settle else {
            return std::ptr::null_mut();
        };
        let Some(raw) = str_arg(request_json) else {
            return std::ptr::null_mut();
        };
        let client = unsafe { &*client };

        let spec = match RequestSpec::from_json(raw) {
            Ok(spec) => spec,
            Err(err) => {
                tracing::warn!(%err, "rejecting request");
                return std::ptr::null_mut();
            }
        };
        let deliver = move |settled: Settlement| {
            let strings = SettlementStrings::new(&settled);
            let view = strings.as_ffi();
            on_settle(&view, user_data);
        };
        let handle = match client.inner.submit(spec, deliver) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(%err, "rejecting request");
                return std::ptr::null_mut();
            }
        };
        let Some(host) = client.inner.transport().take_started() else {
            return std::ptr::null_mut();
        };
        Box::into_raw(Box::new(FfiCall { handle, host }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// The request the host must execute for `call`.
///
/// Returns null if `call` is null.
/// The caller must free the returned pointer with `pipecall_free_request`.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_request(call: *const FfiCall) -> *mut FfiHttpRequest {
    catch_unwind(AssertUnwindSafe(|| {
        if call.is_null() {
            return std::ptr::null_mut();
        }
        let call = unsafe { &*call };
        FfiHttpRequest::from_call(&call.host)
    }))
    .unwrap_or(std::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Transport signals
// ---------------------------------------------------------------------------

fn with_call(call: *const FfiCall, f: impl FnOnce(&FfiCall)) {
    if call.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| f(unsafe { &*call })));
}

/// Record the response status. Call before the first message.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_set_status(call: *const FfiCall, status: u16) {
    with_call(call, |call| call.host.status.set(status));
}

/// Record the raw `Name: Value` response header block, one header per line.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_set_headers(call: *const FfiCall, raw_headers: *const c_char) {
    with_call(call, |call| {
        *call.host.raw_headers.borrow_mut() = str_arg(raw_headers).map(str::to_string);
    });
}

/// Record the response text buffered so far. Reported with failures.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_set_response_text(call: *const FfiCall, text: *const c_char) {
    with_call(call, |call| {
        *call.host.text.borrow_mut() = str_arg(text).map(str::to_string);
    });
}

/// Report one decoded message as JSON text.
///
/// Text that is not valid JSON is reported as a `parsererror` failure.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_data(call: *const FfiCall, json: *const c_char) {
    with_call(call, |call| {
        let payload = str_arg(json).and_then(|s| serde_json::from_str(s).ok());
        match payload {
            Some(payload) => call.host.signals.data(payload),
            None => call.host.signals.error(Some("parsererror")),
        }
    });
}

/// Report a transport failure. `signal` may be null.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_error(call: *const FfiCall, signal: *const c_char) {
    with_call(call, |call| call.host.signals.error(str_arg(signal)));
}

/// Report that the transport finished.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_complete(call: *const FfiCall) {
    with_call(call, |call| call.host.signals.complete());
}

// ---------------------------------------------------------------------------
// Caller control
// ---------------------------------------------------------------------------

/// Cancel the call; it resolves with a timeout. A no-op once settled.
/// May be called from inside `on_settle`.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_cancel(call: *const FfiCall) {
    with_call(call, |call| call.handle.cancel());
}

/// True once the call was cancelled and the host should stop its I/O.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_is_aborted(call: *const FfiCall) -> bool {
    if call.is_null() {
        return false;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*call }.host.aborted.get())).unwrap_or(false)
}

/// True once the terminal notification has been delivered.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_is_settled(call: *const FfiCall) -> bool {
    if call.is_null() {
        return false;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*call }.handle.is_settled())).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a call returned by `pipecall_submit`. An unsettled call is aborted
/// and its callback never fires again. Safe to call with null; must not be
/// called from inside `on_settle`.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_call_free(call: *mut FfiCall) {
    if !call.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let FfiCall { handle, host } = *unsafe { Box::from_raw(call) };
            handle.discard();
            drop(host);
        }));
    }
}

/// Free an `FfiHttpRequest` returned by `pipecall_call_request`.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_free_request(req: *mut FfiHttpRequest) {
    if req.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let req = unsafe { Box::from_raw(req) };
        for s in [req.url, req.body, req.delimiter] {
            if !s.is_null() {
                drop(unsafe { CString::from_raw(s) });
            }
        }
        if !req.headers.is_null() && req.headers_len > 0 {
            let headers = unsafe {
                Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    req.headers,
                    req.headers_len as usize,
                ))
            };
            for h in headers.iter() {
                if !h.key.is_null() {
                    drop(unsafe { CString::from_raw(h.key) });
                }
                if !h.value.is_null() {
                    drop(unsafe { CString::from_raw(h.value) });
                }
            }
        }
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn pipecall_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[derive(Debug, Clone, PartialEq)]
    struct Seen {
        code: FfiErrorCode,
        status: u16,
        message: Option<String>,
        body: Option<String>,
        headers: Option<String>,
    }

    fn owned(s: *const c_char) -> Option<String> {
        if s.is_null() {
            None
        } else {
            Some(unsafe { CStr::from_ptr(s) }.to_str().unwrap().to_string())
        }
    }

    extern "C" fn record(settlement: *const FfiSettlement, user_data: *mut c_void) {
        let seen = unsafe { &mut *(user_data as *mut Vec<Seen>) };
        let s = unsafe { &*settlement };
        seen.push(Seen {
            code: s.error_code,
            status: s.http_status,
            message: owned(s.message),
            body: owned(s.body),
            headers: owned(s.headers),
        });
    }

    fn client(config: &str) -> *mut FfiClient {
        let config = CString::new(config).unwrap();
        pipecall_client_new(config.as_ptr())
    }

    fn submit(client: *const FfiClient, request: &str, seen: &mut Vec<Seen>) -> *mut FfiCall {
        let request = CString::new(request).unwrap();
        pipecall_submit(
            client,
            request.as_ptr(),
            Some(record),
            seen as *mut Vec<Seen> as *mut c_void,
        )
    }

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn client_new_and_free() {
        let client = client(r#"{"hostname": "api.example.com"}"#);
        assert!(!client.is_null());
        pipecall_client_free(client);
    }

    #[test]
    fn client_new_null_config_uses_defaults() {
        let client = pipecall_client_new(std::ptr::null());
        assert!(!client.is_null());
        pipecall_client_free(client);
    }

    #[test]
    fn client_new_invalid_config_returns_null() {
        assert!(client("{not json").is_null());
    }

    #[test]
    fn submit_null_arguments_return_null() {
        let client = client("{}");
        let request = c(r#"{"path": "/x"}"#);
        assert!(pipecall_submit(std::ptr::null(), request.as_ptr(), Some(record), std::ptr::null_mut()).is_null());
        assert!(pipecall_submit(client, std::ptr::null(), Some(record), std::ptr::null_mut()).is_null());
        assert!(pipecall_submit(client, request.as_ptr(), None, std::ptr::null_mut()).is_null());
        pipecall_client_free(client);
    }

    #[test]
    fn submit_without_hostname_returns_null() {
        let client = client("{}");
        let mut seen = Vec::new();
        assert!(submit(client, r#"{"path": "/x"}"#, &mut seen).is_null());
        pipecall_client_free(client);
    }

    #[test]
    fn call_request_describes_the_outbound_call() {
        let client = client(r#"{"hostname": "api.example.com", "port": 8080, "socket_timeout_ms": 250}"#);
        let mut seen = Vec::new();
        let call = submit(
            client,
            r#"{"method": "POST", "path": "/items", "search": {"page": 2}, "body": {"name": "a b"}, "delimiter": "\r\r"}"#,
            &mut seen,
        );
        assert!(!call.is_null());

        let req = pipecall_call_request(call);
        assert!(!req.is_null());
        let r = unsafe { &*req };
        assert_eq!(owned(r.url).unwrap(), "http://api.example.com:8080/items?page=2");
        assert_eq!(r.method, FfiHttpMethod::Post);
        assert_eq!(owned(r.body).unwrap(), "name=a+b");
        assert_eq!(owned(r.delimiter).unwrap(), "\r\r");
        assert_eq!(r.timeout_ms, 250);

        let headers = unsafe { std::slice::from_raw_parts(r.headers, r.headers_len as usize) };
        assert!(headers.iter().any(|h| {
            owned(h.key).as_deref() == Some("X-Requested-With")
                && owned(h.value).as_deref() == Some("XMLHttpRequest")
        }));

        pipecall_free_request(req);
        pipecall_call_free(call);
        pipecall_client_free(client);
    }

    #[test]
    fn chunked_call_delivers_messages_then_stream_end() {
        let client = client(r#"{"hostname": "www.example.com"}"#);
        let mut seen = Vec::new();
        let call = submit(client, r#"{"path": "/jsonpipe"}"#, &mut seen);

        pipecall_call_set_status(call, 200);
        pipecall_call_set_headers(call, c("Transfer-Encoding: chunked\nX-Origin: a").as_ptr());
        pipecall_call_data(call, c(r#"{"id":0}"#).as_ptr());
        pipecall_call_data(call, c(r#"{"id":1}"#).as_ptr());
        pipecall_call_complete(call);

        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|s| s.code == FfiErrorCode::Ok && s.status == 200));
        assert_eq!(seen[0].body.as_deref(), Some(r#"{"id":0}"#));
        assert_eq!(seen[1].body.as_deref(), Some(r#"{"id":1}"#));
        assert!(seen[2].body.is_none());
        let headers: serde_json::Value =
            serde_json::from_str(seen[0].headers.as_deref().unwrap()).unwrap();
        assert_eq!(headers["X-Origin"], "a");
        assert!(pipecall_call_is_settled(call));

        pipecall_call_free(call);
        pipecall_client_free(client);
    }

    #[test]
    fn invalid_json_message_is_a_parse_error() {
        let client = client(r#"{"hostname": "www.example.com"}"#);
        let mut seen = Vec::new();
        let call = submit(client, r#"{"path": "/jsonpipe"}"#, &mut seen);

        pipecall_call_set_status(call, 200);
        pipecall_call_data(call, c(r#"{"id"}"#).as_ptr());
        pipecall_call_complete(call);

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code, FfiErrorCode::ParseError);
        assert_eq!(seen[0].status, 500);
        assert_eq!(seen[0].message.as_deref(), Some("parsererror"));

        pipecall_call_free(call);
        pipecall_client_free(client);
    }

    #[test]
    fn bad_request_carries_response_text() {
        let client = client(r#"{"hostname": "www.example.com"}"#);
        let mut seen = Vec::new();
        let call = submit(client, r#"{"path": "/jsonpipe"}"#, &mut seen);

        pipecall_call_set_status(call, 400);
        pipecall_call_set_response_text(call, c("Please provide valid input.").as_ptr());
        pipecall_call_error(call, c("Bad Request").as_ptr());
        pipecall_call_complete(call);

        assert_eq!(
            seen,
            vec![Seen {
                code: FfiErrorCode::BadRequest,
                status: 400,
                message: Some("Bad Request".to_string()),
                body: Some("Please provide valid input.".to_string()),
                headers: None,
            }]
        );

        pipecall_call_free(call);
        pipecall_client_free(client);
    }

    #[test]
    fn cancel_aborts_and_resolves_with_timeout() {
        let client = client(r#"{"hostname": "www.example.com"}"#);
        let mut seen = Vec::new();
        let call = submit(client, r#"{"path": "/jsonpipe"}"#, &mut seen);

        assert!(!pipecall_call_is_aborted(call));
        pipecall_call_cancel(call);
        assert!(pipecall_call_is_aborted(call));
        pipecall_call_cancel(call);
        pipecall_call_complete(call);

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code, FfiErrorCode::Timeout);
        assert_eq!(seen[0].status, 408);
        assert_eq!(seen[0].message.as_deref(), Some("Connection timeout"));

        pipecall_call_free(call);
        pipecall_client_free(client);
    }

    #[test]
    fn calls_outlive_their_client() {
        let client = client(r#"{"hostname": "www.example.com"}"#);
        let mut seen = Vec::new();
        let call = submit(client, r#"{"path": "/empty"}"#, &mut seen);
        pipecall_client_free(client);

        pipecall_call_set_status(call, 204);
        pipecall_call_complete(call);

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code, FfiErrorCode::Ok);
        assert_eq!(seen[0].status, 204);

        pipecall_call_free(call);
    }

    #[test]
    fn freeing_an_unsettled_call_stays_silent() {
        let client = client(r#"{"hostname": "www.example.com"}"#);
        let mut seen = Vec::new();
        let call = submit(client, r#"{"path": "/jsonpipe"}"#, &mut seen);

        pipecall_call_set_status(call, 200);
        pipecall_call_data(call, c(r#"{"id":0}"#).as_ptr());
        pipecall_call_free(call);

        assert_eq!(seen.len(), 1);
        pipecall_client_free(client);
    }

    #[test]
    fn signals_on_null_call_are_ignored() {
        pipecall_call_set_status(std::ptr::null(), 200);
        pipecall_call_data(std::ptr::null(), std::ptr::null());
        pipecall_call_error(std::ptr::null(), std::ptr::null());
        pipecall_call_complete(std::ptr::null());
        pipecall_call_cancel(std::ptr::null());
        assert!(!pipecall_call_is_aborted(std::ptr::null()));
        assert!(pipecall_call_request(std::ptr::null()).is_null());
    }

    #[test]
    fn free_functions_accept_null() {
        pipecall_call_free(std::ptr::null_mut());
        pipecall_free_request(std::ptr::null_mut());
        pipecall_free_string(std::ptr::null_mut());
        pipecall_client_free(std::ptr::null_mut());
    }
}
