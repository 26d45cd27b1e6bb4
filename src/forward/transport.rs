//! HTTP transport from the forward proxy to one reverse proxy endpoint.
//!
//! # Responsibilities
//! - Build create/relay/close requests with the session header
//! - Apply domain fronting uniformly to every outbound call
//! - Classify relay responses (delivered, foreign, session gone)

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HOST};
use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;
use url::Url;

use crate::config::RemoteConfig;
use crate::tunnel::key::{KeyError, SessionKey};
use crate::tunnel::wire::{self, CLOSE_PATH, CREATE_PATH, OCTET_STREAM, RELAY_PATH, SESSION_HEADER};

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("no remote endpoints configured")]
    NoRemotes,

    #[error("invalid remote endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("reverse proxy answered {0}")]
    Status(StatusCode),

    #[error("reverse proxy returned an invalid session key: {0}")]
    InvalidKey(#[from] KeyError),
}

impl TunnelError {
    /// True when the request never reached the reverse proxy.
    pub fn is_connect(&self) -> bool {
        matches!(self, TunnelError::Transport(e) if e.is_connect())
    }
}

/// Result of one relay exchange that produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// Bytes the destination produced, possibly none.
    Delivered(Bytes),
    /// The echoed session key was missing or wrong; the body was discarded.
    Foreign,
    /// The reverse proxy no longer knows the session (404) or it died (410).
    Gone(StatusCode),
}

/// A reverse proxy base URL, with the fronting substitution already applied.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    base: Url,
    target: Url,
    host_header: Option<String>,
}

impl RemoteEndpoint {
    /// With a fronting domain, requests connect to the front (keeping the
    /// endpoint's port) and carry the real `host[:port]` in the Host header.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, TunnelError> {
        let invalid = |reason: String| TunnelError::InvalidEndpoint {
            url: config.url.clone(),
            reason,
        };

        let base = Url::parse(&config.url).map_err(|e| invalid(e.to_string()))?;
        let host = base
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?
            .to_string();

        let mut target = base.clone();
        let host_header = match config.fronting_domain.as_deref() {
            Some(front) if !front.is_empty() => {
                target
                    .set_host(Some(front))
                    .map_err(|e| invalid(format!("fronting domain {front:?}: {e}")))?;
                Some(match base.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host,
                })
            }
            _ => None,
        };

        Ok(Self {
            base,
            target,
            host_header,
        })
    }

    /// URL actually dialed for `route`.
    pub fn url_for(&self, route: &str) -> Url {
        let mut url = self.target.clone();
        url.set_path(&wire::join_path(self.target.path(), route));
        url
    }

    /// Host header override, present only when fronting.
    pub fn host_header(&self) -> Option<&str> {
        self.host_header.as_deref()
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target.host_str() {
            Some(front) if self.host_header.is_some() => write!(f, "{} via {}", self.base, front),
            _ => write!(f, "{}", self.base),
        }
    }
}

/// Client bound to one endpoint. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TunnelClient {
    http: reqwest::Client,
    endpoint: RemoteEndpoint,
}

impl TunnelClient {
    pub fn new(http: reqwest::Client, endpoint: RemoteEndpoint) -> Self {
        Self { http, endpoint }
    }

    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    fn post(&self, route: &str, key: Option<&SessionKey>, body: Bytes) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(self.endpoint.url_for(route))
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(body);
        if let Some(host) = self.endpoint.host_header() {
            request = request.header(HOST, host);
        }
        if let Some(key) = key {
            request = request.header(SESSION_HEADER, key.as_str());
        }
        request
    }

    /// Ask the reverse proxy to dial its destination; returns the new key.
    pub async fn create(&self) -> Result<SessionKey, TunnelError> {
        let response = self.post(CREATE_PATH, None, Bytes::new()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TunnelError::Status(status));
        }
        let body = response.text().await?;
        Ok(SessionKey::parse(body.trim())?)
    }

    /// Ship `body` for `key` and collect whatever the destination answered.
    pub async fn exchange(&self, key: &SessionKey, body: Bytes) -> Result<Exchange, TunnelError> {
        let response = self.post(RELAY_PATH, Some(key), body).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(Exchange::Gone(status));
        }
        if !status.is_success() {
            return Err(TunnelError::Status(status));
        }

        let echoed = response
            .headers()
            .get(&SESSION_HEADER)
            .and_then(|v| v.to_str().ok());
        if echoed != Some(key.as_str()) {
            return Ok(Exchange::Foreign);
        }
        Ok(Exchange::Delivered(response.bytes().await?))
    }

    /// Best-effort teardown notification.
    pub async fn close(&self, key: &SessionKey) -> Result<(), TunnelError> {
        let response = self.post(CLOSE_PATH, Some(key), Bytes::new()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TunnelError::Status(status));
        }
        Ok(())
    }
}
