//! The normalized result shape and the rule that classifies it.
//!
//! # Design
//! Every call ends in exactly one `ServerResult`, whatever the server's
//! envelope looks like. `ResultRule` carries the field paths used to read
//! the envelope and the status-code ranges that count as success. Fields
//! are private: a result is immutable once built.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::form::FailureHandling;
use crate::json_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Success,
    ServerFail,
    ConnectionFail,
    /// Only ever produced locally (aborted or invalid call).
    ClientFail,
}

/// Inclusive `[start, end]` range of success codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCodeRange {
    pub start: i64,
    pub end: i64,
}

impl StatusCodeRange {
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, code: i64) -> bool {
        self.start <= code && code <= self.end
    }
}

/// Where each normalized field lives in the server's envelope.
///
/// An empty `data_field` means the whole body is the data payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultSchema {
    pub status_code_field: String,
    pub message_field: String,
    pub data_field: String,
    pub timestamp_field: String,
}

impl Default for ResultSchema {
    fn default() -> Self {
        Self {
            status_code_field: "statusCode".to_string(),
            message_field: "message".to_string(),
            data_field: "data".to_string(),
            timestamp_field: "currentDateTime".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultRule {
    #[serde(flatten)]
    pub schema: ResultSchema,
    pub success_status_code_ranges: Vec<StatusCodeRange>,
    /// With no ranges configured, classify everything as success (`true`)
    /// or everything as server failure (`false`).
    pub treat_all_as_success_without_ranges: bool,
}

impl Default for ResultRule {
    fn default() -> Self {
        Self {
            schema: ResultSchema::default(),
            success_status_code_ranges: Vec::new(),
            treat_all_as_success_without_ranges: true,
        }
    }
}

static EMPTY_RANGES_WARNED: AtomicBool = AtomicBool::new(false);

impl ResultRule {
    pub fn with_ranges(ranges: impl IntoIterator<Item = StatusCodeRange>) -> Self {
        Self {
            success_status_code_ranges: ranges.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn is_success(&self, code: i64) -> bool {
        if self.success_status_code_ranges.is_empty() {
            if !EMPTY_RANGES_WARNED.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    treat_all_as_success = self.treat_all_as_success_without_ranges,
                    "no success status code ranges configured"
                );
            }
            return self.treat_all_as_success_without_ranges;
        }
        self.success_status_code_ranges
            .iter()
            .any(|range| range.contains(code))
    }
}

/// Normalized outcome of one call attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerResult {
    code: i64,
    http_status: u16,
    full_payload: Option<Value>,
    data_payload: Option<Value>,
    message: Option<String>,
    timestamp: Option<String>,
    status: ResultStatus,
    is_mocked: bool,
    failure_handling: FailureHandling,
    transport_error: Option<String>,
    elapsed: Duration,
}

impl ServerResult {
    pub(crate) fn new(status: ResultStatus, code: i64) -> Self {
        Self {
            code,
            http_status: 0,
            full_payload: None,
            data_payload: None,
            message: None,
            timestamp: None,
            status,
            is_mocked: false,
            failure_handling: FailureHandling::None,
            transport_error: None,
            elapsed: Duration::ZERO,
        }
    }

    /// A locally synthesized failure; no network round-trip happened.
    pub fn client_fail(message: impl Into<String>, code: i64, failure_handling: FailureHandling) -> Self {
        Self {
            message: Some(message.into()),
            failure_handling,
            ..Self::new(ResultStatus::ClientFail, code)
        }
    }

    pub(crate) fn with_payload(mut self, full: Option<Value>, data: Option<Value>) -> Self {
        self.full_payload = full;
        self.data_payload = data;
        self
    }

    pub(crate) fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub(crate) fn with_timestamp(mut self, timestamp: Option<String>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub(crate) fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = status;
        self
    }

    pub(crate) fn with_transport_error(mut self, error: Option<String>) -> Self {
        self.transport_error = error;
        self
    }

    pub(crate) fn mocked(mut self) -> Self {
        self.is_mocked = true;
        self
    }

    pub(crate) fn with_failure_handling(mut self, failure_handling: FailureHandling) -> Self {
        self.failure_handling = failure_handling;
        self
    }

    pub(crate) fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    pub fn full_payload(&self) -> Option<&Value> {
        self.full_payload.as_ref()
    }

    pub fn data_payload(&self) -> Option<&Value> {
        self.data_payload.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn is_mocked(&self) -> bool {
        self.is_mocked
    }

    pub fn failure_handling(&self) -> FailureHandling {
        self.failure_handling
    }

    pub fn transport_error(&self) -> Option<&str> {
        self.transport_error.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Deserialize the data payload. `None` on absence or shape mismatch.
    pub fn try_get<T: DeserializeOwned>(&self) -> Option<T> {
        let data = self.data_payload.as_ref()?;
        match T::deserialize(data) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(error = %err, "data payload does not match the expected type");
                None
            }
        }
    }

    pub fn try_get_list<T: DeserializeOwned>(&self) -> Option<Vec<T>> {
        self.try_get::<Vec<T>>()
    }

    /// Field of the data payload at a nested path.
    pub fn field(&self, path: &str) -> Option<&Value> {
        json_path::get_field(self.data_payload.as_ref()?, path)
    }
}

/// What the presentation layer receives for a client-side failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientError {
    pub message: String,
    pub code: i64,
    pub failure_handling: FailureHandling,
}

impl From<&ServerResult> for ClientError {
    fn from(result: &ServerResult) -> Self {
        Self {
            message: result.message().unwrap_or_default().to_string(),
            code: result.code(),
            failure_handling: result.failure_handling(),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client fail: {} (code {})", self.message, self.code)
    }
}
