//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, URLs and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function of one config section

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::{ForwardConfig, ReverseConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("forward.remotes: at least one remote endpoint is required")]
    NoRemotes,

    #[error("forward.remotes: invalid URL {0:?}")]
    InvalidUrl(String),

    #[error("forward.remotes: unsupported scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("reverse.prefix {0:?} must be empty or start with '/' and not end with '/'")]
    InvalidPrefix(String),

    #[error("reverse.destination must not be empty")]
    EmptyDestination,
}

/// Check a forward proxy section.
pub fn validate_forward(config: &ForwardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listen_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "forward.listen_address",
            value: config.listen_address.clone(),
        });
    }

    if config.remotes.is_empty() {
        errors.push(ValidationError::NoRemotes);
    }
    for remote in &config.remotes {
        match Url::parse(&remote.url) {
            Ok(url) if url.scheme() != "http" && url.scheme() != "https" => {
                errors.push(ValidationError::UnsupportedScheme(url.scheme().to_string()));
            }
            Ok(url) if url.host_str().is_none() => {
                errors.push(ValidationError::InvalidUrl(remote.url.clone()));
            }
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::InvalidUrl(remote.url.clone())),
        }
    }

    if config.poll_interval_ms == 0 {
        errors.push(ValidationError::Zero("forward.poll_interval_ms"));
    }
    if config.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero("forward.request_timeout_secs"));
    }
    if config.read_chunk_size == 0 {
        errors.push(ValidationError::Zero("forward.read_chunk_size"));
    }
    if config.max_connections == 0 {
        errors.push(ValidationError::Zero("forward.max_connections"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check a reverse proxy section.
pub fn validate_reverse(config: &ReverseConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "reverse.bind_address",
            value: config.bind_address.clone(),
        });
    }
    // Host names are allowed, so only emptiness is checked here; dialing reports the rest.
    if config.destination.trim().is_empty() {
        errors.push(ValidationError::EmptyDestination);
    }

    let prefix = &config.prefix;
    if !prefix.is_empty() && (!prefix.starts_with('/') || prefix.ends_with('/')) {
        errors.push(ValidationError::InvalidPrefix(prefix.clone()));
    }

    if config.read_timeout_ms == 0 {
        errors.push(ValidationError::Zero("reverse.read_timeout_ms"));
    }
    if config.connect_timeout_secs == 0 {
        errors.push(ValidationError::Zero("reverse.connect_timeout_secs"));
    }
    if config.session_idle_secs == 0 {
        errors.push(ValidationError::Zero("reverse.session_idle_secs"));
    }
    if config.sweep_interval_secs == 0 {
        errors.push(ValidationError::Zero("reverse.sweep_interval_secs"));
    }
    if config.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero("reverse.request_timeout_secs"));
    }
    if config.max_body_size == 0 {
        errors.push(ValidationError::Zero("reverse.max_body_size"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
