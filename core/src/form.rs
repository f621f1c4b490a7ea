//! Immutable endpoint descriptions.
//!
//! A `RequestForm` is created at configuration time and shared by every
//! operation that calls the same endpoint. It is never mutated in place:
//! the `with_*` methods return an adjusted copy.

use serde::{Deserialize, Serialize};

use crate::http::HttpMethod;
use crate::result::ResultSchema;

/// How the request content is attached to the transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterType {
    #[default]
    None,
    Query,
    Body,
    Path,
}

/// Whether `path` is appended to the selected backend's base URL or used
/// as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathType {
    #[default]
    Endpoint,
    FullUrl,
}

/// Hint for the presentation layer about what to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailureHandling {
    #[default]
    None,
    SuggestReload,
    SuggestRetry,
}

/// Debug directive. Anything but `Off` skips the network entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MockMode {
    #[default]
    Off,
    MockSuccess,
    MockServerFail,
    MockConnectionFail,
}

impl MockMode {
    pub fn is_mocked(self) -> bool {
        self != MockMode::Off
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    pub show_loading: bool,
    pub show_error_on_connection_fail: bool,
    pub show_error_on_server_fail: bool,
    pub show_error_on_client_fail: bool,
    pub failure_handling: FailureHandling,
    pub mock_mode: MockMode,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            show_loading: true,
            show_error_on_connection_fail: true,
            show_error_on_server_fail: true,
            show_error_on_client_fail: true,
            failure_handling: FailureHandling::None,
            mock_mode: MockMode::Off,
        }
    }
}

impl FormSettings {
    /// Settings for background calls that should never surface UI.
    pub fn silent() -> Self {
        Self {
            show_loading: false,
            show_error_on_connection_fail: false,
            show_error_on_server_fail: false,
            show_error_on_client_fail: false,
            ..Self::default()
        }
    }
}

/// Description of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestForm {
    pub path: String,
    #[serde(default)]
    pub verb: HttpMethod,
    #[serde(default)]
    pub parameter_type: ParameterType,
    #[serde(default)]
    pub path_type: PathType,
    #[serde(default)]
    pub settings: FormSettings,
    #[serde(default)]
    pub response_schema: Option<ResultSchema>,
}

impl RequestForm {
    pub fn new(path: impl Into<String>, verb: HttpMethod, parameter_type: ParameterType) -> Self {
        Self {
            path: path.into(),
            verb,
            parameter_type,
            path_type: PathType::Endpoint,
            settings: FormSettings::default(),
            response_schema: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(path, HttpMethod::Get, ParameterType::None)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(path, HttpMethod::Post, ParameterType::Body)
    }

    pub fn with_path_type(mut self, path_type: PathType) -> Self {
        self.path_type = path_type;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_settings(mut self, settings: FormSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_mock_mode(mut self, mode: MockMode) -> Self {
        self.settings.mock_mode = mode;
        self
    }

    pub fn with_response_schema(mut self, schema: ResultSchema) -> Self {
        self.response_schema = Some(schema);
        self
    }
}
