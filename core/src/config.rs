//! Caller configuration.
//!
//! # Design
//! `CallerConfig` is an immutable value loaded once (from a JSON document)
//! and shared behind an `Arc`. Switching environments or editing settings
//! produces a new value that the `ApiCaller` swaps in; nothing mutates a
//! config that an in-flight call may be reading.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::form::{MockMode, RequestForm};
use crate::http::HeaderList;
use crate::result::ResultRule;

/// One named backend (e.g. `dev`, `staging`, `live`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSetting {
    pub name: String,
    pub base_url: String,
    /// Used instead of the session token when set (handy for dev backends).
    pub override_access_token: Option<String>,
}

/// How the access token and fixed headers are attached to every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientRequestRule {
    pub access_token_header: String,
    pub access_token_prefix: String,
    pub additional_headers: HeaderList,
}

impl Default for ClientRequestRule {
    fn default() -> Self {
        Self {
            access_token_header: "accessToken".to_string(),
            access_token_prefix: "bearer ".to_string(),
            additional_headers: HeaderList::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LogOption {
    None,
    Minimal,
    Verbose,
    #[default]
    Pretty,
}

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallerConfig {
    pub backends: Vec<BackendSetting>,
    pub selected_backend: usize,
    /// Per-call timeout; 0 means the default.
    pub timeout_seconds: u64,
    /// Applied to every call when set, overriding per-form mock modes.
    pub force_mock_mode: Option<MockMode>,
    pub log_option: LogOption,
    pub client_request_rule: ClientRequestRule,
    pub server_result_rule: ResultRule,
    pub forms: BTreeMap<String, RequestForm>,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            selected_backend: 0,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            force_mock_mode: None,
            log_option: LogOption::default(),
            client_request_rule: ClientRequestRule::default(),
            server_result_rule: ResultRule::default(),
            forms: BTreeMap::new(),
        }
    }
}

impl CallerConfig {
    /// A config with a single backend, mostly for tests and tools.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            backends: vec![BackendSetting {
                name: "default".to_string(),
                base_url: base_url.into(),
                override_access_token: None,
            }],
            ..Self::default()
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn timeout(&self) -> Duration {
        match self.timeout_seconds {
            0 => Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            seconds => Duration::from_secs(seconds),
        }
    }

    pub fn current_environment(&self) -> Option<&BackendSetting> {
        self.backends.get(self.selected_backend)
    }

    pub fn environment_names(&self) -> Vec<&str> {
        self.backends
            .iter()
            .map(|b| b.name.as_str())
            .filter(|name| !name.is_empty())
            .collect()
    }

    pub fn with_environment(&self, name: &str) -> Result<Self, ConfigError> {
        let index = self
            .backends
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))?;
        self.with_environment_index(index)
    }

    /// Out-of-range indices are clamped to the last environment.
    pub fn with_environment_index(&self, index: usize) -> Result<Self, ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoEnvironment);
        }
        Ok(Self {
            selected_backend: index.min(self.backends.len() - 1),
            ..self.clone()
        })
    }

    pub fn form(&self, name: &str) -> Result<&RequestForm, ConfigError> {
        self.forms
            .get(name)
            .ok_or_else(|| ConfigError::UnknownForm(name.to_string()))
    }
}
