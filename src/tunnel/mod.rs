//! Protocol primitives shared by both ends of the tunnel.
//!
//! # Data Flow
//! ```text
//! local bytes
//!     → buffer.rs (SyncBuffer, drained once per exchange)
//!     → wire.rs (POST to relay path, X-Session-Id header)
//!     → key.rs (SessionKey correlates unrelated HTTP exchanges)
//! ```
//!
//! # Design Decisions
//! - The session key travels in a header, never in the body
//! - Bodies are raw bytes with no extra framing
//! - Keys are URL-safe base64 without padding so any header parser accepts them

pub mod buffer;
pub mod key;
pub mod wire;

pub use buffer::SyncBuffer;
pub use key::{KeyError, SessionKey};
