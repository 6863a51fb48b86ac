//! Per-connection handler chain construction.
//!
//! # Responsibilities
//! - Build the ordered handler chain descriptor once per initialization
//! - Inject the secure-channel handshake ahead of protocol stages when
//!   secure transport is configured
//! - Run the chain over each accepted connection
//!
//! # Design Decisions
//! - Stage order is a strict invariant: handshake first, protocol stages
//!   after, in the exact order the protocol supplied them
//! - The descriptor is read-only after build and cheaply cloned (all `Arc`)
//!   into every accepted-connection task

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::net::connection::ConnectionContext;
use crate::net::tls::{SecureChannelFactory, TlsError};

/// Object-safe alias for the connection's byte channel, plain or secured.
pub trait SessionIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SessionIo for T {}

/// Boxed connection I/O handed from stage to stage.
pub type BoxedIo = Box<dyn SessionIo>;

/// What a stage did with the connection.
pub enum StageFlow {
    /// The stage transformed or inspected the channel; hand it to the next
    /// stage.
    Continue(BoxedIo),
    /// The stage consumed the connection to completion.
    Complete,
}

/// One processing stage applied to bytes flowing over an accepted connection.
///
/// Stages are shared by reference across all connections and must be
/// stateless or internally thread-safe.
#[async_trait]
pub trait ConnectionStage: Send + Sync {
    /// Stage name used in logs and error messages.
    fn name(&self) -> &str;

    async fn run(&self, io: BoxedIo, ctx: &ConnectionContext) -> io::Result<StageFlow>;
}

/// The application-level wire protocol collaborator.
///
/// Supplies the ordered per-connection handler stages; consumed once at
/// pipeline-build time.
pub trait DataPlaneProtocol: Send + Sync {
    fn server_stages(&self) -> Vec<Arc<dyn ConnectionStage>>;
}

/// Failure while running a connection's handler chain.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("secure-channel handshake failed")]
    Handshake(#[source] TlsError),
    #[error("pipeline stage '{name}' failed")]
    Stage {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Ordered sequence of handler stages attached to every accepted connection.
///
/// Built once per listener initialization; shared read-only across all
/// accepted connections.
#[derive(Clone)]
pub struct PipelineDescriptor {
    secure: Option<Arc<dyn SecureChannelFactory>>,
    stages: Arc<[Arc<dyn ConnectionStage>]>,
}

impl PipelineDescriptor {
    /// Build the descriptor: optional secure-channel stage first, then the
    /// protocol's handler chain verbatim and in order.
    pub fn build(
        secure: Option<Arc<dyn SecureChannelFactory>>,
        protocol: &dyn DataPlaneProtocol,
    ) -> Self {
        Self {
            secure,
            stages: protocol.server_stages().into(),
        }
    }

    /// Number of protocol stages (excludes the handshake stage).
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn is_secure(&self) -> bool {
        self.secure.is_some()
    }

    /// Run the chain on one accepted connection.
    ///
    /// The handshake stage is instantiated here, per connection, against the
    /// connection's allocator context; it holds per-connection cryptographic
    /// state and is never reused.
    pub async fn attach<S>(&self, stream: S, ctx: &ConnectionContext) -> Result<(), PipelineError>
    where
        S: SessionIo + 'static,
    {
        let mut io: BoxedIo = Box::new(stream);

        if let Some(factory) = &self.secure {
            let handshake = factory.handshake_stage(ctx.allocator());
            io = handshake
                .handshake(io)
                .await
                .map_err(PipelineError::Handshake)?;
            tracing::trace!(connection_id = %ctx.id(), "Secure channel established");
        }

        for stage in self.stages.iter() {
            match stage.run(io, ctx).await {
                Ok(StageFlow::Continue(next)) => io = next,
                Ok(StageFlow::Complete) => return Ok(()),
                Err(source) => {
                    return Err(PipelineError::Stage {
                        name: stage.name().to_string(),
                        source,
                    })
                }
            }
        }

        Ok(())
    }
}
