//! HTTP plumbing shared by the reverse proxy.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → request.rs (request ID, propagated back on the response)
//!     → reverse::server (create / relay / close handlers)
//! ```

pub mod request;

pub use request::TunnelRequestId;
