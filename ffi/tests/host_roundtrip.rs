//! Drives the C surface the way a host engine would: build through the
//! library, execute with the host's own HTTP client (ureq here), and hand
//! the raw response back for normalization.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use reqflow_ffi::types::{FfiCaller, FfiErrorCode, FfiHttpMethod, FfiHttpRequest, FfiResultStatus};
use reqflow_ffi::*;
use serde_json::{json, Value};

fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

fn read(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string())
    }
}

/// What the host got back from the network.
struct Raw {
    status: u16,
    body: String,
    error: Option<String>,
}

fn execute(req: &FfiHttpRequest) -> Raw {
    fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, req: &FfiHttpRequest) -> ureq::RequestBuilder<B> {
        if !req.headers.is_null() {
            let headers = unsafe { std::slice::from_raw_parts(req.headers, req.headers_len as usize) };
            for h in headers {
                builder = builder.header(read(h.key).unwrap(), read(h.value).unwrap());
            }
        }
        builder
    }

    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent();
    let url = read(req.url).unwrap();
    let body = read(req.body).unwrap_or_default();
    let response = match req.method {
        FfiHttpMethod::Get => with_headers(agent.get(&url), req).call(),
        FfiHttpMethod::Head => with_headers(agent.head(&url), req).call(),
        FfiHttpMethod::Delete => with_headers(agent.delete(&url), req).call(),
        FfiHttpMethod::Post => with_headers(agent.post(&url), req).send(body.as_bytes()),
        FfiHttpMethod::Put => with_headers(agent.put(&url), req).send(body.as_bytes()),
        FfiHttpMethod::Patch => with_headers(agent.patch(&url), req).send(body.as_bytes()),
    };
    match response {
        Ok(mut response) => Raw {
            status: response.status().as_u16(),
            body: response.body_mut().read_to_string().unwrap_or_default(),
            error: None,
        },
        Err(err) => Raw {
            status: 0,
            body: String::new(),
            error: Some(err.to_string()),
        },
    }
}

/// Normalized view of a result, copied out before the result is freed.
struct Outcome {
    status: FfiResultStatus,
    code: i64,
    http_status: u16,
    data: Option<Value>,
}

/// Build, execute and normalize one call.
fn call(caller: *const FfiCaller, form: Value, content: Option<Value>) -> Outcome {
    let form = CString::new(form.to_string()).unwrap();
    let content = content.map(|c| CString::new(c.to_string()).unwrap());
    let req = rf_build_request(
        caller,
        form.as_ptr(),
        content.as_ref().map_or(std::ptr::null(), |c| c.as_ptr()),
        0,
    );
    assert!(!req.is_null());
    let raw = execute(unsafe { &*req });
    rf_free_request(req);

    let body = CString::new(raw.body).unwrap();
    let error = raw.error.map(|e| CString::new(e).unwrap());
    let result = rf_normalize_response(
        caller,
        form.as_ptr(),
        0,
        raw.status,
        body.as_ptr(),
        error.as_ref().map_or(std::ptr::null(), |e| e.as_ptr()),
        std::ptr::null(),
    );
    let r = unsafe { &*result };
    assert_eq!(r.error_code, FfiErrorCode::Ok);
    let outcome = Outcome {
        status: r.status,
        code: r.code,
        http_status: r.http_status,
        data: read(r.data_json).map(|d| serde_json::from_str(&d).unwrap()),
    };
    rf_free_result(result);
    outcome
}

fn new_caller(base_url: &str) -> *mut FfiCaller {
    let config = json!({
        "backends": [{"name": "local", "base_url": base_url}],
        "server_result_rule": {"success_status_code_ranges": [{"start": 200, "end": 299}]},
    });
    let config = CString::new(config.to_string()).unwrap();
    let caller = rf_caller_new(config.as_ptr());
    assert!(!caller.is_null());
    caller
}

#[test]
fn login_then_authenticated_calls() {
    let caller = new_caller(&start_server());
    let login = json!({"path": "/auth/login", "verb": "POST", "parameter_type": "Body"});

    let rejected = call(caller, login.clone(), Some(json!({"user": "ann", "pass": "guess"})));
    assert_eq!(rejected.status, FfiResultStatus::ServerFail);
    assert_eq!(rejected.http_status, 200);
    assert_eq!(rejected.code, 401);

    let accepted = call(caller, login, Some(json!({"user": "ann", "pass": "secret"})));
    assert_eq!(accepted.status, FfiResultStatus::Success);
    let tokens = accepted.data.unwrap();
    let token = CString::new(tokens["accessToken"].as_str().unwrap()).unwrap();
    let expires_at = chrono::DateTime::parse_from_rfc3339(tokens["expiresAt"].as_str().unwrap()).unwrap();
    assert!(rf_set_access_token(caller, token.as_ptr()));
    assert!(rf_set_access_token_expiry(caller, expires_at.timestamp()));
    assert!(!rf_is_access_token_expired(caller));

    let profile = call(caller, json!({"path": "/profile"}), None);
    assert_eq!(profile.status, FfiResultStatus::Success);
    assert_eq!(profile.data, Some(json!({"player": "ann"})));

    let items = call(
        caller,
        json!({"path": "/items", "parameter_type": "Query"}),
        Some(json!({"q": "s", "page": 0})),
    );
    let names: Vec<&str> = items
        .data
        .as_ref()
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(|item| item["name"].as_str())
        .collect();
    assert_eq!(names, vec!["sword", "shield"]);

    let health = call(caller, json!({"path": "/health"}), None);
    assert_eq!(health.status, FfiResultStatus::Success);
    assert_eq!(health.http_status, 204);

    rf_caller_free(caller);
}

#[test]
fn missing_token_is_a_server_fail() {
    let caller = new_caller(&start_server());
    let profile = call(caller, json!({"path": "/profile"}), None);
    assert_eq!(profile.status, FfiResultStatus::ServerFail);
    assert_eq!(profile.http_status, 401);
    rf_caller_free(caller);
}

#[test]
fn closed_port_is_a_connection_fail() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let caller = new_caller(&format!("http://{addr}"));
    let health = call(caller, json!({"path": "/health"}), None);
    assert_eq!(health.status, FfiResultStatus::ConnectionFail);
    assert!(health.data.is_none());
    rf_caller_free(caller);
}
