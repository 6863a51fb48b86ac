//! Candidate-port binding and bind-failure classification.
//!
//! # Responsibilities
//! - Try candidate ports strictly in configured order, first success wins
//! - Classify failures: address-in-use advances to the next candidate,
//!   anything else aborts immediately
//! - Recognize address-in-use causes buried inside wrapped error chains

use std::error::Error;
use std::io;
use std::net::{IpAddr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket};

use crate::config::PortRange;
use crate::observability::metrics as metric_names;

/// Accept-queue backlog used when the configuration leaves it unset.
const DEFAULT_BACKLOG: u32 = 1024;

/// Upper bound on cause-chain traversal. Chains longer than this (including
/// cyclic ones) classify as "not a bind failure".
const MAX_CAUSE_DEPTH: usize = 16;

/// Socket options applied to each bind attempt.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// Accept-queue backlog; 0 means [`DEFAULT_BACKLOG`].
    pub backlog: u32,
    /// SO_SNDBUF / SO_RCVBUF hint; 0 means platform default.
    pub buffer_size: u32,
}

/// A single failed bind attempt, rendered in the low-level
/// `bind(<addr>) failed: <cause>` shape with the I/O error as its source.
#[derive(Debug, thiserror::Error)]
#[error("bind({addr}) failed: {source}")]
pub struct BindAttemptError {
    addr: SocketAddr,
    #[source]
    source: io::Error,
}

impl BindAttemptError {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Terminal failure of the whole port-range bind operation.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// Every candidate in the range failed with a retryable cause.
    #[error("could not bind shuffle server to any port in range {range} on address {address}")]
    ExhaustedRange { address: IpAddr, range: PortRange },

    /// A candidate failed with a non-retryable cause; remaining candidates
    /// were not tried.
    #[error(transparent)]
    Fatal(#[from] BindAttemptError),
}

/// Tagged result of a single candidate-port attempt.
#[derive(Debug)]
pub enum BindOutcome {
    Success(TcpListener),
    Retryable(BindAttemptError),
    Fatal(BindAttemptError),
}

/// Whether `err` (or any cause in its chain) is an "address already in use"
/// bind failure worth retrying on the next candidate port.
///
/// Recognizes the canonical `AddrInUse` I/O error kind directly, as well as
/// low-level errors whose message carries the `bind(...) failed: ...` shape.
/// The bind call may sit under synchronous-adaptation or future-resolution
/// wrappers, so the whole cause chain is walked, bounded by
/// [`MAX_CAUSE_DEPTH`].
pub fn is_bind_failure(err: &(dyn Error + 'static)) -> bool {
    let mut current = Some(err);
    let mut depth = 0;
    while let Some(e) = current {
        if depth >= MAX_CAUSE_DEPTH {
            return false;
        }
        if matches_bind_failure(e) {
            return true;
        }
        current = e.source();
        depth += 1;
    }
    false
}

fn matches_bind_failure(err: &(dyn Error + 'static)) -> bool {
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        if io_err.kind() == io::ErrorKind::AddrInUse {
            return true;
        }
    }
    // Our own attempt wrapper always renders the bind(...) shape; its
    // verdict must come from walking its cause, never from its message.
    if err.downcast_ref::<BindAttemptError>().is_some() {
        return false;
    }
    let message = err.to_string();
    message.starts_with("bind(") && message.contains(") failed:")
}

/// Attempt one candidate, classifying any failure.
async fn try_bind_candidate(addr: SocketAddr, options: &SocketOptions) -> BindOutcome {
    match bind_listener(addr, options).await {
        Ok(listener) => BindOutcome::Success(listener),
        Err(source) => {
            // classify the raw cause, not the wrapper: the wrapper's own
            // display would satisfy the message criterion for any cause
            let retryable = is_bind_failure(&source);
            let attempt = BindAttemptError { addr, source };
            if retryable {
                BindOutcome::Retryable(attempt)
            } else {
                BindOutcome::Fatal(attempt)
            }
        }
    }
}

async fn bind_listener(addr: SocketAddr, options: &SocketOptions) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    if options.buffer_size > 0 {
        socket.set_send_buffer_size(options.buffer_size)?;
        socket.set_recv_buffer_size(options.buffer_size)?;
    }

    socket.bind(addr)?;

    let backlog = if options.backlog > 0 {
        options.backlog
    } else {
        DEFAULT_BACKLOG
    };
    socket.listen(backlog)
}

/// Drive bind attempts across the candidate port range.
///
/// Candidates are tried strictly in the configured sequence; the first
/// success stops iteration, so at most one listening socket is ever held.
/// A retryable failure advances to the next candidate; a fatal failure
/// aborts immediately with the cause surfaced verbatim. An exhausted range
/// fails naming the address and the full configured range.
pub async fn bind_port_range(
    address: IpAddr,
    ports: &PortRange,
    options: &SocketOptions,
) -> Result<TcpListener, BindError> {
    for port in ports.iter() {
        tracing::debug!(%address, port, "Trying to bind shuffle server to port");
        metrics::counter!(metric_names::BIND_ATTEMPTS_TOTAL).increment(1);

        match try_bind_candidate(SocketAddr::new(address, port), options).await {
            BindOutcome::Success(listener) => return Ok(listener),
            BindOutcome::Retryable(cause) => {
                tracing::debug!(error = %cause, "Candidate port in use, trying next candidate");
            }
            BindOutcome::Fatal(cause) => return Err(BindError::Fatal(cause)),
        }
    }

    Err(BindError::ExhaustedRange {
        address,
        range: ports.clone(),
    })
}
