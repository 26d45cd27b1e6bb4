//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for both tunnel
//! ends. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration. One file may describe both ends; the CLI picks one.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TunnelConfig {
    /// Client side: local listener and remote endpoints.
    pub forward: ForwardConfig,

    /// Server side: HTTP endpoint and fixed destination.
    pub reverse: ReverseConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Forward proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Local TCP listen address (e.g., "127.0.0.1:2222").
    pub listen_address: String,

    /// Maximum concurrent local connections (backpressure).
    pub max_connections: usize,

    /// Reverse proxy endpoints; each session picks one.
    pub remotes: Vec<RemoteConfig>,

    /// Base poll interval in milliseconds, used while traffic is flowing.
    pub poll_interval_ms: u64,

    /// Timeout for one HTTP round trip to the reverse proxy.
    pub request_timeout_secs: u64,

    /// Largest chunk read from the local socket at once.
    pub read_chunk_size: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:2222".to_string(),
            max_connections: 1_000,
            remotes: Vec::new(),
            poll_interval_ms: 500,
            request_timeout_secs: 30,
            read_chunk_size: 64 * 1024,
        }
    }
}

impl ForwardConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// A reverse proxy endpoint as seen from the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL including any route prefix (e.g., "https://example.com/tun").
    pub url: String,

    /// Host to actually connect to; the real host goes in the Host header.
    #[serde(default)]
    pub fronting_domain: Option<String>,
}

/// Reverse proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReverseConfig {
    /// HTTP bind address (e.g., "0.0.0.0:8888").
    pub bind_address: String,

    /// Fixed destination every session dials.
    pub destination: String,

    /// Route prefix; empty or starting with '/'.
    pub prefix: String,

    /// Deadline for the opportunistic destination read per exchange.
    pub read_timeout_ms: u64,

    /// Deadline for dialing the destination on create.
    pub connect_timeout_secs: u64,

    /// Sessions without traffic for this long are evicted.
    pub session_idle_secs: u64,

    /// How often the registry looks for idle or dead sessions.
    pub sweep_interval_secs: u64,

    /// Overall HTTP request timeout.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ReverseConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8888".to_string(),
            destination: "127.0.0.1:22".to_string(),
            prefix: String::new(),
            read_timeout_ms: 1_000,
            connect_timeout_secs: 10,
            session_idle_secs: 600,
            sweep_interval_secs: 30,
            request_timeout_secs: 30,
            max_body_size: 8 * 1024 * 1024, // 8MB
            tls: None,
        }
    }
}

impl ReverseConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// TLS configuration for the reverse proxy listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
