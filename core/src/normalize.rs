//! Turns a raw transport response (or a mock directive) into a `ServerResult`.
//!
//! Classification order:
//! 1. a mock directive decides the status on its own;
//! 2. a transport error, or a zero status with nothing received, is
//!    `ConnectionFail`;
//! 3. otherwise the envelope is read through the `ResultSchema` and the
//!    resulting code is checked against the rule's success ranges.
//!
//! The body-embedded code overrides the transport status only when it is
//! present and non-zero.

use serde_json::Value;

use crate::form::MockMode;
use crate::http::HttpResponse;
use crate::json_path;
use crate::request::ClientRequest;
use crate::result::{ResultRule, ResultSchema, ResultStatus, ServerResult};

pub struct ResultNormalizer<'a> {
    rule: &'a ResultRule,
}

impl<'a> ResultNormalizer<'a> {
    pub fn new(rule: &'a ResultRule) -> Self {
        Self { rule }
    }

    /// `response` is ignored for mocked requests. Failed results carry the
    /// form's failure handling.
    pub fn normalize(&self, request: &ClientRequest, response: &HttpResponse) -> ServerResult {
        let result = if request.is_mocked() {
            Self::from_mock(request.mock_mode(), request.mocked_response())
        } else {
            let schema = request.response_schema().unwrap_or(&self.rule.schema);
            self.from_response(schema, response)
        };
        if result.is_success() {
            result
        } else {
            result.with_failure_handling(request.failure_handling())
        }
    }

    pub fn from_mock(mode: MockMode, mocked_body: Option<&str>) -> ServerResult {
        let status = match mode {
            MockMode::MockConnectionFail => ResultStatus::ConnectionFail,
            MockMode::MockServerFail => ResultStatus::ServerFail,
            MockMode::MockSuccess | MockMode::Off => ResultStatus::Success,
        };
        let payload = mocked_body.and_then(|body| serde_json::from_str::<Value>(body).ok());
        ServerResult::new(status, 0)
            .with_payload(payload.clone(), payload)
            .mocked()
    }

    pub fn from_response(&self, schema: &ResultSchema, response: &HttpResponse) -> ServerResult {
        let transport_code = i64::from(response.status);

        if let Some(error) = &response.error {
            return ServerResult::new(ResultStatus::ConnectionFail, transport_code)
                .with_http_status(response.status)
                .with_transport_error(Some(error.to_string()));
        }

        if response.body.trim().is_empty() {
            if response.status == 0 {
                return ServerResult::new(ResultStatus::ConnectionFail, 0)
                    .with_transport_error(Some("no response received".to_string()));
            }
            return ServerResult::new(self.classify(transport_code), transport_code)
                .with_http_status(response.status);
        }

        let full: Value = match serde_json::from_str(&response.body) {
            Ok(json) => json,
            Err(err) => {
                tracing::debug!(error = %err, "response body is not JSON");
                return ServerResult::new(self.classify(transport_code), transport_code)
                    .with_http_status(response.status)
                    .with_payload(Some(Value::String(response.body.clone())), None);
            }
        };

        let body_code = json_path::safe_int(&full, &schema.status_code_field);
        let code = if body_code != 0 { body_code } else { transport_code };
        let data = if schema.data_field.is_empty() {
            Some(full.clone())
        } else {
            json_path::get_field(&full, &schema.data_field).cloned()
        };
        let message = json_path::safe_string(&full, &schema.message_field);
        let timestamp = json_path::safe_string(&full, &schema.timestamp_field);

        ServerResult::new(self.classify(code), code)
            .with_http_status(response.status)
            .with_message(message)
            .with_timestamp(timestamp)
            .with_payload(Some(full), data)
    }

    fn classify(&self, code: i64) -> ResultStatus {
        if self.rule.is_success(code) {
            ResultStatus::Success
        } else {
            ResultStatus::ServerFail
        }
    }
}
