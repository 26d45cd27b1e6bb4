//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT (Ctrl+C) → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → forward accept loop stops, live sessions send /close
//!               → reverse server drains in-flight relays and exits
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
