//! Client-side request orchestration for game backends.
//!
//! # Overview
//! Describes endpoints as immutable `RequestForm`s, runs calls as
//! `Operation`s with a fixed lifecycle, normalizes every outcome into one
//! `ServerResult` shape, sequences calls with `Flow`, and refreshes expired
//! access tokens transparently through an `AccessTokenValidator`.
//!
//! # Design
//! - The network is behind the `Transport` trait. Request building
//!   (`TransportRequestBuilder`) and response interpretation
//!   (`ResultNormalizer`) are pure, so a host that owns its own HTTP stack
//!   can use them directly.
//! - Expected failures (connection, server, client) are `ServerResult`
//!   values, never errors. `CallError` covers wiring and state-machine
//!   misuse only.
//! - Shared state (`SessionState`, `EventHub`, config) is passed
//!   explicitly through an `ApiCaller`; there are no globals.
//! - Mock modes skip the transport entirely and are usable by tests and
//!   by manual exploratory sessions alike.

pub mod builder;
pub mod caller;
pub mod config;
pub mod error;
pub mod events;
mod expect;
pub mod flow;
pub mod form;
pub mod http;
pub mod json_path;
pub mod jwt;
pub mod logger;
pub mod normalize;
pub mod operation;
pub mod request;
pub mod result;
pub mod session;
pub mod validator;

pub use builder::{ConnectionSettings, TransportRequestBuilder};
pub use caller::{ApiCaller, ApiCallerBuilder};
pub use config::{BackendSetting, CallerConfig, ClientRequestRule, LogOption};
pub use error::{CallError, ConfigError};
pub use events::{EventHub, NetworkEvent, SubscriptionId};
pub use flow::{Flow, FlowMode, FlowOutcome, FlowReport, StopBehavior};
pub use form::{FailureHandling, FormSettings, MockMode, ParameterType, PathType, RequestForm};
pub use http::{HeaderList, HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};
pub use normalize::ResultNormalizer;
pub use operation::{Operation, OperationId, Phase};
pub use request::ClientRequest;
pub use result::{ClientError, ResultRule, ResultSchema, ResultStatus, ServerResult, StatusCodeRange};
pub use session::{Clock, FixedClock, SessionState, SystemClock, TimeFormat};
pub use validator::{AccessTokenPolicy, AccessTokenValidator, FnPolicy, ValidatorSettings};
