//! HTTP tunnel for arbitrary TCP streams.
//!
//! A forward proxy accepts local TCP connections and carries their bytes
//! over plain HTTP POST exchanges to a reverse proxy, which relays them to
//! a fixed destination. Either end can sit behind CDNs or HTTP-only
//! networks; the forward side can also domain-front its requests.

pub mod config;
pub mod forward;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod reverse;
pub mod tunnel;

pub use config::TunnelConfig;
pub use forward::ForwardProxy;
pub use lifecycle::Shutdown;
pub use reverse::ReverseProxy;
