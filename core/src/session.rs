//! Process-wide credential and server-time state.
//!
//! `SessionState` is a cheap handle (`Arc` inside); every operation built
//! by the same `ApiCaller` reads the same token. Only token-refresh code is
//! expected to write it.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Which wall clock token expiry times are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeFormat {
    Local,
    #[default]
    Utc,
}

/// Source of "now". Injected so expiry checks are testable.
pub trait Clock: Send + Sync {
    fn now(&self, format: TimeFormat) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self, format: TimeFormat) -> NaiveDateTime {
        match format {
            TimeFormat::Local => Local::now().naive_local(),
            TimeFormat::Utc => Utc::now().naive_utc(),
        }
    }
}

/// A clock that always reports the same instant, whatever the format.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self, _format: TimeFormat) -> NaiveDateTime {
        self.0
    }
}

#[derive(Debug, Default)]
struct Session {
    access_token: Option<String>,
    refresh_token: Option<String>,
    access_token_expire_time: Option<NaiveDateTime>,
    refresh_token_expire_time: Option<NaiveDateTime>,
    latest_server_time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    inner: Arc<RwLock<Session>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.read().refresh_token.clone()
    }

    pub fn has_access_token(&self) -> bool {
        self.inner
            .read()
            .access_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        self.inner.write().access_token = Some(token.into());
    }

    pub fn set_refresh_token(&self, token: impl Into<String>) {
        self.inner.write().refresh_token = Some(token.into());
    }

    pub fn clear_tokens(&self) {
        let mut session = self.inner.write();
        session.access_token = None;
        session.refresh_token = None;
        session.access_token_expire_time = None;
        session.refresh_token_expire_time = None;
    }

    pub fn access_token_expire_time(&self) -> Option<NaiveDateTime> {
        self.inner.read().access_token_expire_time
    }

    pub fn set_access_token_expire_time(&self, time: NaiveDateTime) {
        tracing::debug!(expire_time = %time, "access token expiry updated");
        self.inner.write().access_token_expire_time = Some(time);
    }

    pub fn set_refresh_token_expire_time(&self, time: NaiveDateTime) {
        tracing::debug!(expire_time = %time, "refresh token expiry updated");
        self.inner.write().refresh_token_expire_time = Some(time);
    }

    /// A token with no known expiry never counts as expired.
    pub fn is_access_token_expired(&self, now: NaiveDateTime) -> bool {
        let session = self.inner.read();
        let has_token = session.access_token.as_deref().is_some_and(|t| !t.is_empty());
        has_token && session.access_token_expire_time.is_some_and(|expiry| now >= expiry)
    }

    pub fn is_refresh_token_expired(&self, now: NaiveDateTime) -> bool {
        let session = self.inner.read();
        let has_token = session.refresh_token.as_deref().is_some_and(|t| !t.is_empty());
        has_token && session.refresh_token_expire_time.is_some_and(|expiry| now >= expiry)
    }

    pub fn latest_server_time(&self) -> Option<NaiveDateTime> {
        self.inner.read().latest_server_time
    }

    pub fn set_latest_server_time(&self, time: NaiveDateTime) {
        self.inner.write().latest_server_time = Some(time);
    }
}
