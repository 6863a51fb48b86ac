//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → owned by the lifecycle controller for the listener's lifetime
//! ```
//!
//! # Design Decisions
//! - Config is immutable once handed to the server; restarting with new
//!   settings means constructing a fresh controller
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ObservabilityConfig;
pub use schema::PortRange;
pub use schema::ServerConfig;
pub use schema::TlsConfig;
