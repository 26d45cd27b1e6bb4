//! Forward proxy: the client end of the tunnel.
//!
//! # Data Flow
//! ```text
//! local TCP connection
//!     → proxy.rs (accept, pick remote endpoint)
//!     → session.rs (create session, then event loop)
//!         ← reader.rs (chunks + closed signal)
//!         → schedule.rs (next poll interval)
//!     → transport.rs (POST /create, relay, /close; fronting)
//! ```
//!
//! # Design Decisions
//! - One relay exchange per loop iteration, whatever woke the loop
//! - Poll interval decays while idle and snaps back on traffic
//! - A session stays on the endpoint it was created on

pub mod proxy;
pub mod reader;
pub mod schedule;
pub mod session;
pub mod transport;

pub use proxy::ForwardProxy;
pub use session::{ForwardSession, SessionError, SessionState};
pub use transport::{Exchange, RemoteEndpoint, TunnelClient, TunnelError};
