//! Shuffle server lifecycle controller.
//!
//! # Responsibilities
//! - Own the listener's state machine (`init` / `shutdown` / port accessor)
//! - Compose transport selection, secure-channel setup, pipeline build, and
//!   port-range binding into a single blocking initialization step
//! - Run the accept loop and drain connections on shutdown
//!
//! # Design Decisions
//! - One-shot controller: `init` runs at most once per instance; restarting
//!   the logical listener means constructing a fresh controller
//! - `init` and `shutdown` block the calling control-plane thread and must
//!   not be invoked from inside an async context
//! - A listener that keeps failing after a successful bind is terminal: the
//!   accept loop backs off through recoverable failures (fd exhaustion and
//!   the like) but reports repeated consecutive failures and stops, it never
//!   rebinds

use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::ServerConfig;
use crate::net::binder::{bind_port_range, BindError, SocketOptions};
use crate::net::connection::{ConnectionContext, ConnectionTracker};
use crate::net::pipeline::{DataPlaneProtocol, PipelineDescriptor};
use crate::net::tls::{RustlsChannelFactory, SecureChannelFactory, TlsError};
use crate::net::transport::{TransportMode, WorkerGroup};
use crate::net::buffer::BufferAllocator;
use crate::observability::metrics as metric_names;

/// Consecutive non-transient accept failures tolerated (with backoff in
/// between) before the accept loop concludes the listening socket is gone.
const MAX_CONSECUTIVE_ACCEPT_FAILURES: u32 = 5;

/// Pause before retrying after a non-transient accept failure, giving
/// conditions like fd exhaustion a chance to clear.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Lifecycle state of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Binding,
    Bound(SocketAddr),
    ShuttingDown,
    Stopped,
}

/// Fatal initialization failure of the shuffle server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// `init` was invoked when the controller had already moved past
    /// `Uninitialized`. Programming-usage error, never silently ignored.
    #[error("shuffle server has already been initialized")]
    AlreadyInitialized,

    /// The secure-channel factory could not be constructed from
    /// configuration. Raised before any bind attempt.
    #[error("failed to initialize the secure channel for the shuffle server")]
    TlsSetup(#[source] TlsError),

    /// Fatal bind failure or exhausted candidate range.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Worker-group startup or bind-address resolution failed.
    #[error("shuffle server I/O failure")]
    Io(#[from] io::Error),
}

/// The data-plane listener of a worker process.
///
/// Owns its immutable configuration and the listener state machine. `init`
/// binds the first available candidate port and starts accepting; `shutdown`
/// drains connections and releases the worker pool. Both entry points are
/// blocking and intended for a single control-plane caller.
pub struct ShuffleServer {
    config: ServerConfig,
    state: ServerState,
    secure_factory: Option<Arc<dyn SecureChannelFactory>>,
    worker_group: Option<WorkerGroup>,
    shutdown_tx: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
    tracker: ConnectionTracker,
}

impl ShuffleServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: ServerState::Uninitialized,
            secure_factory: None,
            worker_group: None,
            shutdown_tx: None,
            accept_task: None,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Inject a secure-channel factory, overriding the config-driven rustls
    /// factory. Must be called before `init`.
    pub fn set_secure_channel_factory(&mut self, factory: Arc<dyn SecureChannelFactory>) {
        self.secure_factory = Some(factory);
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Blocks until a candidate port is bound or the range is exhausted /
    /// a fatal error occurs. Returns the resolved port, which may differ
    /// from the first candidate (or from every candidate, for port 0).
    /// On failure no partially-bound state remains observable.
    pub fn init(
        &mut self,
        protocol: &dyn DataPlaneProtocol,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Result<u16, ServerError> {
        if self.state != ServerState::Uninitialized {
            return Err(ServerError::AlreadyInitialized);
        }

        let start = Instant::now();
        self.state = ServerState::Binding;
        tracing::debug!(
            address = %self.config.bind_address,
            port_range = %self.config.port_range,
            "Trying to initialize shuffle server"
        );

        match self.bind_and_spawn(protocol, allocator) {
            Ok(local_addr) => {
                self.state = ServerState::Bound(local_addr);
                let duration_ms = start.elapsed().as_millis() as u64;
                metrics::histogram!(metric_names::INIT_DURATION_MS).record(duration_ms as f64);
                tracing::info!(
                    duration_ms,
                    address = %local_addr,
                    "Successful initialization, listening"
                );
                Ok(local_addr.port())
            }
            Err(error) => {
                if let Some(group) = self.worker_group.take() {
                    group.shutdown();
                }
                self.shutdown_tx = None;
                self.accept_task = None;
                self.state = ServerState::Stopped;
                Err(error)
            }
        }
    }

    fn bind_and_spawn(
        &mut self,
        protocol: &dyn DataPlaneProtocol,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Result<SocketAddr, ServerError> {
        let address = resolve_bind_address(&self.config.bind_address)?;

        let mode = TransportMode::select();
        let group_name = format!("shuffle-server ({})", self.config.port_range);
        let group = WorkerGroup::start(mode, self.config.worker_threads, &group_name)?;
        let handle = group.handle().clone();
        self.worker_group = Some(group);

        // Secure-channel construction errors are fatal and must surface
        // before any socket is opened.
        let secure = self.build_secure_factory()?;
        let descriptor = PipelineDescriptor::build(secure, protocol);

        let options = SocketOptions {
            backlog: self.config.backlog,
            buffer_size: self.config.buffer_size,
        };
        let listener = handle.block_on(bind_port_range(
            address,
            &self.config.port_range,
            &options,
        ))?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = handle.spawn(accept_loop(
            listener,
            descriptor,
            allocator,
            self.tracker.clone(),
            self.config.buffer_size,
            shutdown_rx,
        ));
        self.shutdown_tx = Some(shutdown_tx);
        self.accept_task = Some(accept_task);

        Ok(local_addr)
    }

    fn build_secure_factory(&self) -> Result<Option<Arc<dyn SecureChannelFactory>>, ServerError> {
        if let Some(factory) = &self.secure_factory {
            return Ok(Some(Arc::clone(factory)));
        }
        match &self.config.tls {
            Some(tls) => {
                let factory =
                    RustlsChannelFactory::from_config(tls).map_err(ServerError::TlsSetup)?;
                Ok(Some(Arc::new(factory)))
            }
            None => Ok(None),
        }
    }

    /// The bound port, or `None` in any other state. Safe to call from any
    /// state.
    pub fn listening_port(&self) -> Option<u16> {
        self.local_address().map(|addr| addr.port())
    }

    /// The resolved bound address, or `None` in any other state.
    pub fn local_address(&self) -> Option<SocketAddr> {
        match self.state {
            ServerState::Bound(addr) => Some(addr),
            _ => None,
        }
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Stop accepting, drain in-flight connections, and release the worker
    /// pool.
    ///
    /// Idempotent: safe to call any number of times and from any state;
    /// calls after the first return immediately. Always leaves the
    /// controller in `Stopped`, even if the accept task did not end cleanly.
    pub fn shutdown(&mut self) {
        match self.state {
            ServerState::Stopped => return,
            ServerState::Uninitialized => {
                // never bound; nothing to release, but the controller is
                // one-shot so it still ends up Stopped
                self.state = ServerState::Stopped;
                return;
            }
            _ => {}
        }

        let start = Instant::now();
        self.state = ServerState::ShuttingDown;

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(accept_task) = self.accept_task.take() {
            if let Some(group) = self.worker_group.as_ref() {
                if let Err(error) = group.handle().block_on(accept_task) {
                    tracing::warn!(%error, "Accept loop did not shut down cleanly");
                }
            }
        }

        if let Some(group) = self.worker_group.take() {
            group.shutdown();
        }

        self.state = ServerState::Stopped;
        let duration_ms = start.elapsed().as_millis() as u64;
        metrics::histogram!(metric_names::SHUTDOWN_DURATION_MS).record(duration_ms as f64);
        tracing::info!(duration_ms, "Successful shutdown");
    }
}

fn resolve_bind_address(host: &str) -> io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = (host, 0u16).to_socket_addrs()?;
    addrs.next().map(|addr| addr.ip()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("bind address '{}' did not resolve", host),
        )
    })
}

/// Accept connections until shut down, then drain in-flight tasks.
///
/// The listener is dropped before draining so no new connection can be
/// accepted while existing ones finish.
async fn accept_loop(
    listener: TcpListener,
    descriptor: PipelineDescriptor,
    allocator: Arc<dyn BufferAllocator>,
    tracker: ConnectionTracker,
    buffer_size: u32,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut tasks = JoinSet::new();
    let mut failures = AcceptFailureTracker::default();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(error) = joined {
                    if error.is_panic() {
                        tracing::error!(%error, "Connection task panicked");
                    }
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    failures.on_success();
                    configure_stream(&stream, buffer_size);
                    let ctx = ConnectionContext::new(peer_addr, Arc::clone(&allocator));
                    let guard = tracker.track(ctx.id());
                    tracing::debug!(connection_id = %ctx.id(), %peer_addr, "Connection accepted");

                    let descriptor = descriptor.clone();
                    tasks.spawn(async move {
                        if let Err(error) = descriptor.attach(stream, &ctx).await {
                            tracing::warn!(
                                connection_id = %ctx.id(),
                                %error,
                                "Connection pipeline failed"
                            );
                        }
                        drop(guard);
                    });
                }
                Err(error) => match failures.on_error(&error) {
                    AcceptAction::Continue => {
                        tracing::warn!(%error, "Transient accept failure, continuing");
                    }
                    AcceptAction::Backoff => {
                        tracing::warn!(%error, "Accept failed, backing off before retrying");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                    AcceptAction::Stop => {
                        // The listening socket is gone; rebinding is out of
                        // contract, so report and stop accepting.
                        tracing::error!(
                            %error,
                            "Listening socket failed repeatedly, no longer accepting"
                        );
                        break;
                    }
                }
            }
        }
    }

    drop(listener);
    while tasks.join_next().await.is_some() {}
    tracing::debug!("Accept loop drained");
}

fn configure_stream(stream: &TcpStream, buffer_size: u32) {
    if let Err(error) = stream.set_nodelay(true) {
        tracing::debug!(%error, "Failed to set TCP_NODELAY");
    }
    if buffer_size > 0 {
        let socket = socket2::SockRef::from(stream);
        if let Err(error) = socket.set_send_buffer_size(buffer_size as usize) {
            tracing::debug!(%error, "Failed to set SO_SNDBUF on accepted connection");
        }
        if let Err(error) = socket.set_recv_buffer_size(buffer_size as usize) {
            tracing::debug!(%error, "Failed to set SO_RCVBUF on accepted connection");
        }
    }
}

/// How the accept loop responds to an `accept()` error.
enum AcceptAction {
    /// Per-connection failure; keep accepting immediately.
    Continue,
    /// Recoverable host condition (e.g. fd exhaustion); pause, then retry.
    Backoff,
    /// The listening socket is considered dead; stop accepting.
    Stop,
}

/// Tracks consecutive non-transient accept failures.
///
/// Per-connection errors never count; any successful accept resets the
/// count. Only [`MAX_CONSECUTIVE_ACCEPT_FAILURES`] failures in a row are
/// treated as a dead listener.
#[derive(Default)]
struct AcceptFailureTracker {
    consecutive: u32,
}

impl AcceptFailureTracker {
    fn on_success(&mut self) {
        self.consecutive = 0;
    }

    fn on_error(&mut self, error: &io::Error) -> AcceptAction {
        if is_transient_accept_error(error) {
            return AcceptAction::Continue;
        }
        self.consecutive += 1;
        if self.consecutive >= MAX_CONSECUTIVE_ACCEPT_FAILURES {
            AcceptAction::Stop
        } else {
            AcceptAction::Backoff
        }
    }
}

fn is_transient_accept_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
