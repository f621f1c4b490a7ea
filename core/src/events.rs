//! Observer hub for cross-cutting concerns (loading UI, error dialogs,
//! global logging, server-time consumers).
//!
//! # Design
//! One `EventHub` is built per caller and handed to whatever needs to
//! publish; there is no global registry. Publishing snapshots the
//! subscriber list first, so a subscriber may subscribe or unsubscribe from
//! inside its own callback. The core never depends on anyone listening.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeDelta};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::request::ClientRequest;
use crate::result::{ClientError, ServerResult};

#[derive(Debug, Clone, Copy)]
pub enum NetworkEvent<'a> {
    RequestSent(&'a ClientRequest),
    ShowLoading(&'a ClientRequest),
    HideLoading(&'a ClientRequest),
    ResultReceived(&'a ServerResult),
    ServerSuccess(&'a ServerResult),
    ConnectionFail(&'a ServerResult),
    ServerFail(&'a ServerResult),
    ClientFail(&'a ServerResult),
    ShowConnectionFailError(&'a ServerResult),
    ShowServerFailError(&'a ServerResult),
    ShowClientFailError(&'a ClientError),
    ServerTimeChanged(NaiveDateTime),
    /// Difference between two consecutive server times.
    TimeCompensated(TimeDelta),
    /// Carries the previous server time.
    DayChanged(NaiveDateTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

type Listener = Arc<dyn Fn(&NetworkEvent<'_>) + Send + Sync>;

#[derive(Default)]
struct HubInner {
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    latest_server_time: Mutex<Option<NaiveDateTime>>,
}

#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.inner.listeners.read().len())
            .finish()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&NetworkEvent<'_>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.inner.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn publish(&self, event: NetworkEvent<'_>) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn latest_server_time(&self) -> Option<NaiveDateTime> {
        *self.inner.latest_server_time.lock()
    }

    /// Parse and publish a server timestamp. Returns the parsed time, or
    /// `None` (after logging) when the text is empty or unreadable.
    pub fn update_server_time(&self, raw: &str) -> Option<NaiveDateTime> {
        let Some(time) = parse_server_time(raw) else {
            tracing::debug!(raw, "server time missing or unreadable; not updated");
            return None;
        };
        self.set_server_time(time);
        Some(time)
    }

    pub fn set_server_time(&self, time: NaiveDateTime) {
        let previous = self.inner.latest_server_time.lock().replace(time);
        tracing::debug!(server_time = %time, "received server time");
        self.publish(NetworkEvent::ServerTimeChanged(time));
        if let Some(previous) = previous {
            self.publish(NetworkEvent::TimeCompensated(time - previous));
            if previous.ordinal() != time.ordinal() || previous.year() != time.year() {
                self.publish(NetworkEvent::DayChanged(previous));
            }
        }
    }
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
];

/// RFC 3339 timestamps are converted to UTC; offset-less ones are taken as-is.
pub fn parse_server_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Some(time.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}
