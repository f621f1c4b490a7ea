//! Per-attempt request state.

use std::sync::Arc;

use serde_json::Value;

use crate::form::{FailureHandling, MockMode, ParameterType, PathType, RequestForm};
use crate::http::{HeaderList, HttpMethod};
use crate::result::ResultSchema;

/// A `RequestForm` plus the content and overrides of one call.
///
/// The form is shared immutably; every override lives on the request, so
/// adjusting one call never leaks into other calls built from the same form.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRequest {
    form: Arc<RequestForm>,
    content: Option<Value>,
    mock_mode: MockMode,
    mocked_response: Option<String>,
    headers: HeaderList,
    response_schema: Option<ResultSchema>,
}

impl ClientRequest {
    /// Content is dropped when the form takes no parameters.
    pub fn new(form: impl Into<Arc<RequestForm>>, content: Option<Value>) -> Self {
        let form = form.into();
        let content = match form.parameter_type {
            ParameterType::None => None,
            _ => content,
        };
        Self {
            mock_mode: form.settings.mock_mode,
            response_schema: form.response_schema.clone(),
            form,
            content,
            mocked_response: None,
            headers: HeaderList::new(),
        }
    }

    pub fn form(&self) -> &RequestForm {
        &self.form
    }

    pub fn path(&self) -> &str {
        &self.form.path
    }

    pub fn verb(&self) -> HttpMethod {
        self.form.verb
    }

    pub fn parameter_type(&self) -> ParameterType {
        self.form.parameter_type
    }

    pub fn path_type(&self) -> PathType {
        self.form.path_type
    }

    pub fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }

    pub fn mock_mode(&self) -> MockMode {
        self.mock_mode
    }

    pub fn is_mocked(&self) -> bool {
        self.mock_mode.is_mocked()
    }

    pub fn mocked_response(&self) -> Option<&str> {
        self.mocked_response.as_deref()
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn response_schema(&self) -> Option<&ResultSchema> {
        self.response_schema.as_ref()
    }

    pub fn show_loading(&self) -> bool {
        self.form.settings.show_loading
    }

    pub fn failure_handling(&self) -> FailureHandling {
        self.form.settings.failure_handling
    }

    pub fn set_mock_mode(&mut self, mode: MockMode) {
        self.mock_mode = mode;
    }

    pub fn set_mocked_response(&mut self, body: impl Into<String>) {
        self.mocked_response = Some(body.into());
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.set(key, value);
    }

    pub fn set_response_schema(&mut self, schema: ResultSchema) {
        self.response_schema = Some(schema);
    }

    pub fn override_content(&mut self, content: Option<Value>) {
        self.content = content;
    }
}
