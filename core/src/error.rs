//! Error types for the request orchestration core.
//!
//! # Design
//! Failure modes a server or network can produce (connection failure,
//! server-reported failure, locally aborted call) are *not* errors here:
//! they are ordinary `ServerResult` values. The enums below cover what the
//! caller genuinely has to handle out of band: missing wiring, misuse of
//! the operation state machine, and unreadable configuration.

use thiserror::Error;

/// Errors returned by `Operation::run` and friends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The operation has no `ApiCaller`, or the caller has no configuration.
    /// Fatal and never retried.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// `run` was invoked while a previous attempt was still in progress.
    #[error("operation is already running")]
    AlreadyRunning,

    /// The operation was cancelled before it produced a result.
    #[error("operation was cancelled")]
    Cancelled,

    /// The request could not be turned into a transport request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Errors raised while loading or switching configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("there is no backend environment named `{0}`")]
    UnknownEnvironment(String),

    #[error("no backend environment is configured")]
    NoEnvironment,

    #[error("no configuration is loaded")]
    NotLoaded,

    #[error("there is no request form named `{0}`")]
    UnknownForm(String),
}
