//! Typed success callbacks.
//!
//! Each `expect_*` wraps `on_success`: the data payload is deserialized
//! into the requested shape and handed to the callback. When the result
//! is mocked, the supplied mock value is delivered instead, so tests and
//! exploratory sessions see deterministic data whatever the payload is.
//! A payload that does not fit is logged and the callback is skipped.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::operation::Operation;
use crate::result::ServerResult;

impl Operation {
    pub fn expect<T, F>(&self, callback: F, mock: Option<T>) -> &Self
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.on_success(move |result| {
            if let Some(value) = pick(result, mock.as_ref(), ServerResult::try_get::<T>) {
                callback(value);
            }
        })
    }

    pub fn expect_list<T, F>(&self, callback: F, mock: Option<Vec<T>>) -> &Self
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        self.on_success(move |result| {
            if let Some(values) = pick(result, mock.as_ref(), ServerResult::try_get_list::<T>) {
                callback(values);
            }
        })
    }

    /// The raw data payload.
    pub fn expect_json<F>(&self, callback: F, mock: Option<Value>) -> &Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.on_success(move |result| {
            if let Some(value) = pick(result, mock.as_ref(), |r| r.data_payload().cloned()) {
                callback(value);
            }
        })
    }

    /// One field of the data payload, addressed by a nested path.
    pub fn expect_field<F>(&self, path: impl Into<String>, callback: F, mock: Option<Value>) -> &Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let path = path.into();
        self.on_success(move |result| {
            if let Some(value) = pick(result, mock.as_ref(), |r| r.field(&path).cloned()) {
                callback(value);
            }
        })
    }
}

fn pick<T: Clone>(result: &ServerResult, mock: Option<&T>, extract: impl FnOnce(&ServerResult) -> Option<T>) -> Option<T> {
    if result.is_mocked() {
        if let Some(mock) = mock {
            return Some(mock.clone());
        }
    }
    let value = extract(result);
    if value.is_none() {
        tracing::warn!(
            mock = result.is_mocked(),
            code = result.code(),
            "payload does not match the expected shape; callback skipped"
        );
    }
    value
}
