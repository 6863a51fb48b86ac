//! Shuffle server: the data-plane network listener of a distributed compute
//! cluster.
//!
//! Worker processes embed this crate, supply their wire protocol
//! ([`DataPlaneProtocol`]) and buffer pool ([`BufferAllocator`]), and drive
//! [`ShuffleServer::init`] / [`ShuffleServer::shutdown`] from their control
//! plane. The server picks the transport backend for the host, tries the
//! configured candidate ports in order, optionally injects a TLS handshake
//! ahead of the protocol stages, and serves accepted connections on its own
//! worker pool.

pub mod config;
pub mod net;
pub mod observability;

pub use config::{ObservabilityConfig, PortRange, ServerConfig, TlsConfig};
pub use net::binder::{is_bind_failure, BindError, BindOutcome};
pub use net::buffer::{BufferAllocator, PooledBufferAllocator};
pub use net::connection::{ConnectionContext, ConnectionId};
pub use net::pipeline::{
    BoxedIo, ConnectionStage, DataPlaneProtocol, PipelineDescriptor, StageFlow,
};
pub use net::server::{ServerError, ServerState, ShuffleServer};
pub use net::tls::{HandshakeStage, RustlsChannelFactory, SecureChannelFactory, TlsError};
