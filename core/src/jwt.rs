//! Reading claims out of a JWT access token.
//!
//! Only the payload is decoded; the signature is the server's business.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("token does not have three segments")]
    Malformed,
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no usable `exp` claim")]
    MissingExpiry,
}

pub fn decode_payload(token: &str) -> Result<Value, JwtError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(JwtError::Malformed),
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// The `exp` claim as a UTC wall-clock time.
pub fn expiry(token: &str) -> Result<NaiveDateTime, JwtError> {
    let payload = decode_payload(token)?;
    let exp = payload
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or(JwtError::MissingExpiry)?;
    DateTime::from_timestamp(exp, 0)
        .map(|t| t.naive_utc())
        .ok_or(JwtError::MissingExpiry)
}

/// Store `token` as the session's access token with the expiry it carries.
pub fn apply_access_token(session: &SessionState, token: &str) -> Result<(), JwtError> {
    let expire_time = expiry(token)?;
    session.set_access_token(token);
    session.set_access_token_expire_time(expire_time);
    Ok(())
}
