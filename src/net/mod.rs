//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ShuffleServer::init
//!     → transport.rs (backend selection, worker group startup)
//!     → tls.rs (secure-channel factory construction, fatal on error)
//!     → pipeline.rs (per-connection handler chain descriptor)
//!     → binder.rs (candidate ports tried in order, retry on addr-in-use)
//!     → server.rs (accept loop, state transition to Bound)
//!
//! Per accepted connection:
//!     accept → socket options → connection.rs (id, context, tracking)
//!            → pipeline attach (optional TLS handshake, protocol stages)
//!
//! Server States:
//!     Uninitialized → Binding → Bound → ShuttingDown → Stopped
//! ```
//!
//! # Design Decisions
//! - One-shot lifecycle: a controller binds at most once; restart means a
//!   fresh controller instance
//! - Candidates are tried strictly in configured order; first success wins,
//!   so at most one listening socket ever exists
//! - TLS handshake stage always precedes protocol stages on every connection

pub mod binder;
pub mod buffer;
pub mod connection;
pub mod pipeline;
pub mod server;
pub mod tls;
pub mod transport;
