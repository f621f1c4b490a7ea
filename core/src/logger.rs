//! Per-request log lines.

use serde_json::Value;

use crate::config::LogOption;
use crate::form::ParameterType;
use crate::request::ClientRequest;
use crate::result::{ResultStatus, ServerResult};

#[derive(Debug, Clone, Copy)]
pub struct RequestLogger {
    option: LogOption,
}

impl RequestLogger {
    pub fn new(option: LogOption) -> Self {
        Self { option }
    }

    fn verbose(&self) -> bool {
        self.option >= LogOption::Verbose
    }

    fn render(&self, value: Option<&Value>) -> String {
        let Some(value) = value else {
            return "null".to_string();
        };
        let rendered = if self.option == LogOption::Pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_default()
    }

    pub fn log_start(&self, request: &ClientRequest, url: &str) {
        if self.option == LogOption::None {
            return;
        }
        if self.verbose() {
            let body = match request.parameter_type() {
                ParameterType::Body => self.render(request.content()),
                _ => String::new(),
            };
            tracing::info!(
                verb = %request.verb(),
                path = request.path(),
                mock = request.is_mocked(),
                url,
                body = %body,
                "request started"
            );
        } else {
            tracing::info!(verb = %request.verb(), path = request.path(), mock = request.is_mocked(), "request started");
        }
    }

    pub fn log_result(&self, request: &ClientRequest, result: &ServerResult) {
        if self.option == LogOption::None {
            return;
        }
        // mocked results have no envelope, only the mocked data
        let payload = if result.is_mocked() {
            result.data_payload()
        } else {
            result.full_payload()
        };
        let body = if self.verbose() { self.render(payload) } else { String::new() };
        let verb = request.verb();
        let path = request.path();
        let mock = result.is_mocked();
        let code = result.code();
        match result.status() {
            ResultStatus::Success => {
                tracing::info!(%verb, path, mock, code, body = %body, "request succeeded");
            }
            ResultStatus::ServerFail => {
                tracing::error!(%verb, path, mock, code, reason = result.message(), body = %body, "server returned failure");
            }
            ResultStatus::ConnectionFail => {
                tracing::error!(%verb, path, mock, code, error = result.transport_error(), "connection failed");
            }
            ResultStatus::ClientFail => {
                tracing::warn!(%verb, path, code, reason = result.message(), "request aborted on the client");
            }
        }
    }
}
