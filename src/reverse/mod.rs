//! Reverse proxy: the server end of the tunnel.
//!
//! # Data Flow
//! ```text
//! HTTP request
//!     → server.rs (route, extract session key, read body)
//!     → registry.rs (actor: look up the session by key)
//!     → session.rs (per-session task: write body, bounded read)
//!     → HTTP response (bytes the destination produced)
//! ```
//!
//! # Design Decisions
//! - The registry only routes; relay I/O runs on each session's own task
//! - Requests for one key are handled in arrival order
//! - Dead and idle sessions are evicted by a periodic sweep

pub mod registry;
pub mod server;
pub mod session;

pub use registry::{RegistryError, RegistrySettings, SessionRegistry};
pub use server::{AppState, ReverseProxy};
pub use session::{ProxyPacket, RelayError, Session};
