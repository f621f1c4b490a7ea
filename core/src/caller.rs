//! The owner of everything an operation needs to reach the network.
//!
//! # Design
//! `ApiCaller` is a cheap, cloneable handle. Operations keep only a weak
//! reference to it: an operation whose caller has been dropped fails with
//! `CallError::MissingDependency` instead of keeping the transport alive.
//!
//! Configuration lives in a swap slot. Readers take an `Arc` snapshot at
//! the start of each attempt, so `reload_config` and `select_environment`
//! never affect a call that is already building or in flight.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;

use crate::config::CallerConfig;
use crate::error::ConfigError;
use crate::events::EventHub;
use crate::form::RequestForm;
use crate::http::{HeaderList, Transport};
use crate::operation::Operation;
use crate::request::ClientRequest;
use crate::session::{Clock, SessionState, SystemClock};
use crate::validator::AccessTokenValidator;

pub(crate) struct CallerInner {
    transport: Arc<dyn Transport>,
    config: RwLock<Option<Arc<CallerConfig>>>,
    session: SessionState,
    events: EventHub,
    validator: RwLock<Option<Arc<AccessTokenValidator>>>,
    header_modifications: RwLock<HeaderList>,
    clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct ApiCaller {
    inner: Arc<CallerInner>,
}

impl std::fmt::Debug for ApiCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCaller")
            .field("configured", &self.inner.config.read().is_some())
            .field("validator", &self.inner.validator.read().is_some())
            .finish()
    }
}

pub struct ApiCallerBuilder {
    transport: Arc<dyn Transport>,
    config: Option<CallerConfig>,
    session: SessionState,
    events: EventHub,
    validator: Option<AccessTokenValidator>,
    clock: Arc<dyn Clock>,
}

impl ApiCallerBuilder {
    pub fn config(mut self, config: CallerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share token state with another caller or with the host.
    pub fn session(mut self, session: SessionState) -> Self {
        self.session = session;
        self
    }

    pub fn events(mut self, events: EventHub) -> Self {
        self.events = events;
        self
    }

    pub fn validator(mut self, validator: AccessTokenValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> ApiCaller {
        ApiCaller {
            inner: Arc::new(CallerInner {
                transport: self.transport,
                config: RwLock::new(self.config.map(Arc::new)),
                session: self.session,
                events: self.events,
                validator: RwLock::new(self.validator.map(Arc::new)),
                header_modifications: RwLock::new(HeaderList::new()),
                clock: self.clock,
            }),
        }
    }
}

impl ApiCaller {
    pub fn builder(transport: impl Transport + 'static) -> ApiCallerBuilder {
        Self::builder_shared(Arc::new(transport))
    }

    pub fn builder_shared(transport: Arc<dyn Transport>) -> ApiCallerBuilder {
        ApiCallerBuilder {
            transport,
            config: None,
            session: SessionState::new(),
            events: EventHub::new(),
            validator: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn new(transport: impl Transport + 'static, config: CallerConfig) -> Self {
        Self::builder(transport).config(config).build()
    }

    pub(crate) fn downgrade(&self) -> Weak<CallerInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &Weak<CallerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    pub fn config(&self) -> Option<Arc<CallerConfig>> {
        self.inner.config.read().clone()
    }

    pub fn reload_config(&self, config: CallerConfig) {
        tracing::info!(
            environment = config.current_environment().map(|env| env.name.as_str()),
            forms = config.forms.len(),
            "configuration reloaded"
        );
        *self.inner.config.write() = Some(Arc::new(config));
    }

    pub fn select_environment(&self, name: &str) -> Result<(), ConfigError> {
        let current = self.config().ok_or(ConfigError::NotLoaded)?;
        let next = current.with_environment(name)?;
        tracing::info!(environment = name, "backend environment selected");
        *self.inner.config.write() = Some(Arc::new(next));
        Ok(())
    }

    pub fn select_environment_index(&self, index: usize) -> Result<(), ConfigError> {
        let current = self.config().ok_or(ConfigError::NotLoaded)?;
        let next = current.with_environment_index(index)?;
        tracing::info!(
            environment = next.current_environment().map(|env| env.name.as_str()),
            "backend environment selected"
        );
        *self.inner.config.write() = Some(Arc::new(next));
        Ok(())
    }

    pub fn session(&self) -> &SessionState {
        &self.inner.session
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    pub fn validator(&self) -> Option<Arc<AccessTokenValidator>> {
        self.inner.validator.read().clone()
    }

    pub fn set_validator(&self, validator: Option<AccessTokenValidator>) {
        *self.inner.validator.write() = validator.map(Arc::new);
    }

    /// Caller-wide header, applied over the configured additional headers.
    pub fn set_header(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.header_modifications.write().set(key, value);
    }

    pub fn remove_header(&self, key: &str) -> bool {
        self.inner.header_modifications.write().remove(key)
    }

    pub fn clear_headers(&self) {
        self.inner.header_modifications.write().clear();
    }

    pub fn header_modifications(&self) -> HeaderList {
        self.inner.header_modifications.read().clone()
    }

    /// A new operation bound to this caller.
    pub fn create(&self, form: impl Into<Arc<RequestForm>>, content: Option<Value>) -> Operation {
        let operation = Operation::new(ClientRequest::new(form, content));
        operation.bind(self);
        operation
    }

    /// Like `create`, with the form looked up in the configured catalog.
    pub fn create_named(&self, name: &str, content: Option<Value>) -> Result<Operation, ConfigError> {
        let config = self.config().ok_or(ConfigError::NotLoaded)?;
        let form = config.form(name)?.clone();
        Ok(self.create(form, content))
    }
}
