//! C-ABI wrapper around `reqflow-core`.
//!
//! # Overview
//! Lets a host engine with its own HTTP stack use the request rules of the
//! core without linking an async runtime: the host asks for a transport
//! request, executes it however it likes, and hands the raw response back
//! for normalization into a `FfiServerResult`.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Forms and content travel as JSON strings in the same shape as the
//!   `forms` entries of a caller configuration.
//! - The C caller owns all returned pointers and must call the matching
//!   `rf_free_*` function to release them.

pub mod types;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::DateTime;
use reqflow_core::events::parse_server_time;
use reqflow_core::{
    CallerConfig, ClientRequest, Clock, ConnectionSettings, HeaderList, HttpResponse, RequestForm, ResultNormalizer,
    SessionState, SystemClock, TimeFormat, TransportError, TransportRequestBuilder,
};
use serde_json::Value;

use types::*;

/// Borrow a C string argument. Null and non-UTF-8 input both read as `None`.
fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

// ---------------------------------------------------------------------------
// Caller lifecycle
// ---------------------------------------------------------------------------

/// Create a caller from a JSON configuration document.
///
/// Returns null if `config_json` is null or not a valid configuration.
/// The caller must free the returned pointer with `rf_caller_free`.
#[unsafe(no_mangle)]
pub extern "C" fn rf_caller_new(config_json: *const c_char) -> *mut FfiCaller {
    catch_unwind(|| {
        let Some(raw) = str_arg(config_json) else {
            return std::ptr::null_mut();
        };
        match CallerConfig::from_json_str(raw) {
            Ok(config) => Box::into_raw(Box::new(FfiCaller {
                config,
                session: SessionState::new(),
            })),
            Err(err) => {
                tracing::warn!(error = %err, "rejected caller configuration");
                std::ptr::null_mut()
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a caller created by `rf_caller_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn rf_caller_free(caller: *mut FfiCaller) {
    if !caller.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(caller) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Store the access token sent with every built request. A null `token`
/// clears the session's tokens. Returns false if `caller` is null.
#[unsafe(no_mangle)]
pub extern "C" fn rf_set_access_token(caller: *const FfiCaller, token: *const c_char) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if caller.is_null() {
            return false;
        }
        let caller = unsafe { &*caller };
        match str_arg(token) {
            Some(token) => caller.session.set_access_token(token),
            None => caller.session.clear_tokens(),
        }
        true
    }))
    .unwrap_or(false)
}

/// Set the access token expiry as seconds since the Unix epoch (UTC).
/// Returns false if `caller` is null or the timestamp is out of range.
#[unsafe(no_mangle)]
pub extern "C" fn rf_set_access_token_expiry(caller: *const FfiCaller, unix_seconds: i64) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if caller.is_null() {
            return false;
        }
        let caller = unsafe { &*caller };
        match DateTime::from_timestamp(unix_seconds, 0) {
            Some(expiry) => {
                caller.session.set_access_token_expire_time(expiry.naive_utc());
                true
            }
            None => false,
        }
    }))
    .unwrap_or(false)
}

/// True when the stored access token has a known expiry that has passed.
#[unsafe(no_mangle)]
pub extern "C" fn rf_is_access_token_expired(caller: *const FfiCaller) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if caller.is_null() {
            return false;
        }
        let caller = unsafe { &*caller };
        caller
            .session
            .is_access_token_expired(SystemClock.now(TimeFormat::Utc))
    }))
    .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Parse a form and its content, then apply the requested and the globally
/// forced mock modes.
fn client_request(
    config: &CallerConfig,
    form_json: &str,
    content_json: Option<&str>,
    mock_mode: u32,
) -> Result<ClientRequest, String> {
    let form: RequestForm = serde_json::from_str(form_json).map_err(|e| format!("invalid form: {e}"))?;
    let content = content_json
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|e| format!("invalid content: {e}"))?;

    let mut request = ClientRequest::new(form, content);
    let mode = mock_mode_from_raw(mock_mode);
    if mode.is_mocked() {
        request.set_mock_mode(mode);
    }
    if let Some(forced) = config.force_mock_mode {
        request.set_mock_mode(forced);
    }
    Ok(request)
}

/// Build the transport request for `form_json` with optional `content_json`.
///
/// A mocked request comes back with `mocked = true` and nothing to send.
/// Returns null if `caller` or `form_json` is null, or if the form, the
/// content or the resulting request is invalid.
/// The caller must free the returned pointer with `rf_free_request`.
#[unsafe(no_mangle)]
pub extern "C" fn rf_build_request(
    caller: *const FfiCaller,
    form_json: *const c_char,
    content_json: *const c_char,
    mock_mode: u32,
) -> *mut FfiHttpRequest {
    catch_unwind(AssertUnwindSafe(|| {
        if caller.is_null() {
            return std::ptr::null_mut();
        }
        let Some(form_json) = str_arg(form_json) else {
            return std::ptr::null_mut();
        };
        let caller = unsafe { &*caller };
        let request = match client_request(&caller.config, form_json, str_arg(content_json), mock_mode) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "could not build request");
                return std::ptr::null_mut();
            }
        };
        if request.is_mocked() {
            return FfiHttpRequest::mocked(request.verb());
        }

        let settings = ConnectionSettings::from_config(&caller.config, &caller.session, &HeaderList::new());
        match TransportRequestBuilder::new(&settings).build(&request) {
            Ok(req) => FfiHttpRequest::from_core(req),
            Err(err) => {
                tracing::warn!(error = %err, path = request.path(), "could not build request");
                std::ptr::null_mut()
            }
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Normalize the host's raw response for a request built from `form_json`.
///
/// `transport_error` is non-null when the exchange never completed; it
/// takes priority over `status` and `body`. With a mock mode set the
/// response is ignored and `mocked_body` (nullable JSON) becomes the data.
/// A server timestamp in the result updates the session's server time.
#[unsafe(no_mangle)]
pub extern "C" fn rf_normalize_response(
    caller: *const FfiCaller,
    form_json: *const c_char,
    mock_mode: u32,
    status: u16,
    body: *const c_char,
    transport_error: *const c_char,
    mocked_body: *const c_char,
) -> *mut FfiServerResult {
    catch_unwind(AssertUnwindSafe(|| {
        if caller.is_null() {
            return FfiServerResult::null_arg("caller");
        }
        let Some(form_json) = str_arg(form_json) else {
            return FfiServerResult::null_arg("form_json");
        };
        let caller = unsafe { &*caller };
        let mut request = match client_request(&caller.config, form_json, None, mock_mode) {
            Ok(request) => request,
            Err(err) => return FfiServerResult::invalid_argument(&err),
        };
        if let Some(mocked) = str_arg(mocked_body) {
            request.set_mocked_response(mocked);
        }

        let mut response = HttpResponse::new(status, str_arg(body).unwrap_or_default());
        if !transport_error.is_null() {
            let reason = str_arg(transport_error).unwrap_or_default();
            response.error = Some(TransportError::Other(reason.to_string()));
        }

        let result = ResultNormalizer::new(&caller.config.server_result_rule).normalize(&request, &response);
        let server_time = if result.is_mocked() {
            Some(SystemClock.now(TimeFormat::Utc))
        } else {
            result.timestamp().and_then(parse_server_time)
        };
        if let Some(time) = server_time {
            caller.session.set_latest_server_time(time);
        }
        FfiServerResult::from_core(&result)
    }))
    .unwrap_or_else(|_| FfiServerResult::panic("panic in rf_normalize_response"))
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiHttpRequest` returned by `rf_build_request`.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn rf_free_request(req: *mut FfiHttpRequest) {
    if req.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let req = unsafe { Box::from_raw(req) };
        rf_free_string(req.url);
        rf_free_string(req.body);
        if !req.headers.is_null() && req.headers_len > 0 {
            let headers = unsafe {
                Box::from_raw(std::ptr::slice_from_raw_parts_mut(req.headers, req.headers_len as usize))
            };
            for h in headers.iter() {
                rf_free_string(h.key);
                rf_free_string(h.value);
            }
        }
    });
}

/// Free an `FfiServerResult` returned by `rf_normalize_response`.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn rf_free_result(result: *mut FfiServerResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let result = unsafe { Box::from_raw(result) };
        rf_free_string(result.error_message);
        rf_free_string(result.message);
        rf_free_string(result.timestamp);
        rf_free_string(result.data_json);
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn rf_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
