//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type but uses C-compatible representations:
//! `*mut c_char` instead of `String`, raw pointers instead of `Vec`, and
//! enums with explicit discriminants. Conversion functions live here to
//! keep `lib.rs` focused on the `extern "C"` surface.

use std::ffi::CString;
use std::os::raw::c_char;

use reqflow_core::{
    CallerConfig, FailureHandling, HttpMethod, HttpRequest, MockMode, ResultStatus, ServerResult, SessionState,
};

/// Opaque handle owning a configuration and the session it authenticates.
/// C callers receive a pointer to this and pass it back into every function.
pub struct FfiCaller {
    pub(crate) config: CallerConfig,
    pub(crate) session: SessionState,
}

/// Lossy `String` to C string: interior NULs truncate instead of failing.
pub(crate) fn c_string(s: impl Into<String>) -> *mut c_char {
    let mut bytes = s.into().into_bytes();
    if let Some(nul) = bytes.iter().position(|b| *b == 0) {
        bytes.truncate(nul);
    }
    CString::new(bytes).unwrap_or_default().into_raw()
}

fn c_string_opt(s: Option<&str>) -> *mut c_char {
    s.map_or(std::ptr::null_mut(), c_string)
}

/// Mock directive passed as a plain integer so any value is safe to receive.
/// 1 = success, 2 = server fail, 3 = connection fail, anything else = off.
pub(crate) fn mock_mode_from_raw(raw: u32) -> MockMode {
    match raw {
        1 => MockMode::MockSuccess,
        2 => MockMode::MockServerFail,
        3 => MockMode::MockConnectionFail,
        _ => MockMode::Off,
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[repr(C)]
pub enum FfiHttpMethod {
    Get = 0,
    Head = 1,
    Post = 2,
    Put = 3,
    Patch = 4,
    Delete = 5,
}

impl From<HttpMethod> for FfiHttpMethod {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => FfiHttpMethod::Get,
            HttpMethod::Head => FfiHttpMethod::Head,
            HttpMethod::Post => FfiHttpMethod::Post,
            HttpMethod::Put => FfiHttpMethod::Put,
            HttpMethod::Patch => FfiHttpMethod::Patch,
            HttpMethod::Delete => FfiHttpMethod::Delete,
        }
    }
}

/// A single HTTP header as a key-value pair of C strings.
#[repr(C)]
pub struct FfiHeader {
    pub key: *mut c_char,
    pub value: *mut c_char,
}

/// A transport request described as C-compatible plain data.
///
/// When `mocked` is true the host must not touch the network: `url`,
/// `headers` and `body` are null and the host goes straight to
/// `rf_normalize_response` with the same mock mode.
#[repr(C)]
pub struct FfiHttpRequest {
    pub mocked: bool,
    pub method: FfiHttpMethod,
    pub url: *mut c_char,
    pub headers: *mut FfiHeader,
    pub headers_len: u32,
    pub body: *mut c_char,
    pub timeout_ms: u64,
}

impl FfiHttpRequest {
    pub(crate) fn from_core(req: HttpRequest) -> *mut Self {
        let headers: Vec<(String, String)> = req.headers.into_vec();
        let headers_len = headers.len() as u32;
        let headers = if headers.is_empty() {
            std::ptr::null_mut()
        } else {
            let ffi_headers: Box<[FfiHeader]> = headers
                .into_iter()
                .map(|(k, v)| FfiHeader {
                    key: c_string(k),
                    value: c_string(v),
                })
                .collect();
            Box::into_raw(ffi_headers) as *mut FfiHeader
        };

        Box::into_raw(Box::new(FfiHttpRequest {
            mocked: false,
            method: req.method.into(),
            url: c_string(req.url),
            headers,
            headers_len,
            body: c_string_opt(req.body.as_deref()),
            timeout_ms: req.timeout.as_millis() as u64,
        }))
    }

    pub(crate) fn mocked(method: HttpMethod) -> *mut Self {
        Box::into_raw(Box::new(FfiHttpRequest {
            mocked: true,
            method: method.into(),
            url: std::ptr::null_mut(),
            headers: std::ptr::null_mut(),
            headers_len: 0,
            body: std::ptr::null_mut(),
            timeout_ms: 0,
        }))
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Whether the call into the library itself succeeded. Server and network
/// failures are reported through `status`, not here.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    InvalidArgument = 1,
    Panic = 2,
    NullArg = 3,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiResultStatus {
    Success = 0,
    ServerFail = 1,
    ConnectionFail = 2,
    ClientFail = 3,
}

impl From<ResultStatus> for FfiResultStatus {
    fn from(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Success => FfiResultStatus::Success,
            ResultStatus::ServerFail => FfiResultStatus::ServerFail,
            ResultStatus::ConnectionFail => FfiResultStatus::ConnectionFail,
            ResultStatus::ClientFail => FfiResultStatus::ClientFail,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiFailureHandling {
    None = 0,
    SuggestReload = 1,
    SuggestRetry = 2,
}

impl From<FailureHandling> for FfiFailureHandling {
    fn from(handling: FailureHandling) -> Self {
        match handling {
            FailureHandling::None => FfiFailureHandling::None,
            FailureHandling::SuggestReload => FfiFailureHandling::SuggestReload,
            FailureHandling::SuggestRetry => FfiFailureHandling::SuggestRetry,
        }
    }
}

/// A normalized result exposed to C.
///
/// On `error_code == Ok` the remaining fields describe the result; JSON
/// payloads are serialized back to C strings and may be null. On any other
/// error code only `error_message` is meaningful.
#[repr(C)]
pub struct FfiServerResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub status: FfiResultStatus,
    pub code: i64,
    pub http_status: u16,
    pub is_mocked: bool,
    pub failure_handling: FfiFailureHandling,
    pub message: *mut c_char,
    pub timestamp: *mut c_char,
    pub data_json: *mut c_char,
}

impl FfiServerResult {
    pub(crate) fn from_core(result: &ServerResult) -> *mut Self {
        Box::into_raw(Box::new(FfiServerResult {
            error_code: FfiErrorCode::Ok,
            error_message: std::ptr::null_mut(),
            status: result.status().into(),
            code: result.code(),
            http_status: result.http_status(),
            is_mocked: result.is_mocked(),
            failure_handling: result.failure_handling().into(),
            message: c_string_opt(result.message()),
            timestamp: c_string_opt(result.timestamp()),
            data_json: c_string_opt(result.data_payload().map(|v| v.to_string()).as_deref()),
        }))
    }

    fn error(error_code: FfiErrorCode, msg: &str) -> *mut Self {
        Box::into_raw(Box::new(FfiServerResult {
            error_code,
            error_message: c_string(msg),
            status: FfiResultStatus::ClientFail,
            code: 0,
            http_status: 0,
            is_mocked: false,
            failure_handling: FfiFailureHandling::None,
            message: std::ptr::null_mut(),
            timestamp: std::ptr::null_mut(),
            data_json: std::ptr::null_mut(),
        }))
    }

    pub(crate) fn invalid_argument(msg: &str) -> *mut Self {
        Self::error(FfiErrorCode::InvalidArgument, msg)
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::error(FfiErrorCode::NullArg, &format!("null argument: {name}"))
    }

    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::error(FfiErrorCode::Panic, msg)
    }
}
