//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → CLI overrides (main.rs)
//!     → validation.rs (semantic checks for the selected end)
//!     → ForwardConfig / ReverseConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ForwardConfig;
pub use schema::ObservabilityConfig;
pub use schema::RemoteConfig;
pub use schema::ReverseConfig;
pub use schema::TlsConfig;
pub use schema::TunnelConfig;
