//! HTTP framing of relay exchanges.

use axum::http::{HeaderMap, HeaderName};
use thiserror::Error;

use crate::tunnel::key::{KeyError, SessionKey};

/// Header carrying the session key on requests and echoed on responses.
pub const SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-id");

pub const CREATE_PATH: &str = "/create";
pub const RELAY_PATH: &str = "/";
/// Relay path used by older clients.
pub const LEGACY_RELAY_PATH: &str = "/ping";
pub const CLOSE_PATH: &str = "/close";

pub const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderKeyError {
    #[error("missing X-Session-Id header")]
    Missing,

    #[error("X-Session-Id header is not ASCII")]
    NotAscii,

    #[error("malformed X-Session-Id header: {0}")]
    Malformed(#[from] KeyError),
}

/// Pull the session key out of a header map.
pub fn session_key(headers: &HeaderMap) -> Result<SessionKey, HeaderKeyError> {
    let value = headers
        .get(&SESSION_HEADER)
        .ok_or(HeaderKeyError::Missing)?;
    let value = value.to_str().map_err(|_| HeaderKeyError::NotAscii)?;
    Ok(SessionKey::parse(value)?)
}

/// Join a route below a base path, e.g. `/tun` + `/create`.
pub fn join_path(base: &str, route: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), route)
}
