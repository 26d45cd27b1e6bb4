//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Forward end:
//!     local TCP connection
//!         → listener.rs (accept loop, connection limits)
//!         → connection.rs (ID, lifetime tracking)
//!         → forward::session (tunnel state machine)
//!
//! Reverse end:
//!     HTTP(S) connection
//!         → tls.rs (optional rustls termination)
//!         → reverse::server
//! ```

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
