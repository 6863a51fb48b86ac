//! Per-connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Carry the connection-scope allocator handle into the pipeline
//! - Track active connections so shutdown can drain them
//! - Collect per-connection metrics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::net::buffer::BufferAllocator;
use crate::observability::metrics as metric_names;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Read-only context handed to every pipeline stage of one connection.
///
/// Carries the pooled allocator at connection scope; the same allocator
/// instance backs the parent listening socket, so acquisition must already be
/// thread-safe on the allocator's side.
#[derive(Clone)]
pub struct ConnectionContext {
    id: ConnectionId,
    peer_addr: SocketAddr,
    allocator: Arc<dyn BufferAllocator>,
}

impl ConnectionContext {
    pub fn new(peer_addr: SocketAddr, allocator: Arc<dyn BufferAllocator>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            allocator,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn allocator(&self) -> Arc<dyn BufferAllocator> {
        Arc::clone(&self.allocator)
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!(metric_names::ACTIVE_CONNECTIONS).increment(1.0);
        metrics::counter!(metric_names::CONNECTIONS_ACCEPTED_TOTAL).increment(1);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!(metric_names::ACTIVE_CONNECTIONS).decrement(1.0);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
