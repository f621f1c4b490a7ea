//! Shared fixtures for the core test suites.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use reqflow_core::{
    ApiCaller, CallerConfig, FixedClock, HttpRequest, HttpResponse, ResultRule, StatusCodeRange, Transport,
};

pub const BASE_URL: &str = "http://game.test";

type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// In-memory transport answering through a handler and recording every
/// request that reaches it.
pub struct Scripted {
    handler: Handler,
    seen: Mutex<Vec<HttpRequest>>,
}

impl Scripted {
    pub fn new(handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Request paths in the order they reached the transport.
    pub fn paths(&self) -> Vec<String> {
        self.seen.lock().iter().map(|r| path_of(r).to_string()).collect()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn issue(&self, request: HttpRequest) -> HttpResponse {
        self.seen.lock().push(request.clone());
        // let other tasks observe the in-flight state
        tokio::task::yield_now().await;
        (self.handler)(&request)
    }
}

pub fn path_of(request: &HttpRequest) -> &str {
    let url = request.url.trim_start_matches(BASE_URL);
    url.split('?').next().unwrap_or(url)
}

pub fn envelope(code: i64, data: &str) -> HttpResponse {
    HttpResponse::new(200, format!(r#"{{"statusCode":{code},"message":"","data":{data}}}"#))
}

pub fn config() -> CallerConfig {
    let mut config = CallerConfig::for_base_url(BASE_URL);
    config.server_result_rule = ResultRule::with_ranges([StatusCodeRange::new(200, 299)]);
    config
}

pub fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

pub fn caller(transport: Arc<Scripted>) -> ApiCaller {
    ApiCaller::builder_shared(transport)
        .config(config())
        .clock(FixedClock(at(12)))
        .build()
}
