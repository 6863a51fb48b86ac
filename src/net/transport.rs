//! Transport backend selection and worker group ownership.
//!
//! # Responsibilities
//! - Probe host capability and pick the connection-acceptance backend
//! - Own the fixed-size worker pool that runs all accepted-connection I/O
//! - Name worker threads after the server and its port range

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};

/// The connection-acceptance and readiness-notification backend.
///
/// `Epoll` is the scalable kernel-level backend used on Linux hosts; `Poll`
/// is the portable non-blocking fallback everywhere else. Selected once per
/// server and never re-selected after binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Epoll,
    Poll,
}

impl TransportMode {
    /// Choose the best backend available on this host.
    ///
    /// Pure capability probe; absence of the preferred backend is a fallback
    /// branch, never an error.
    pub fn select() -> Self {
        let mode = if cfg!(target_os = "linux") {
            TransportMode::Epoll
        } else {
            TransportMode::Poll
        };
        tracing::info!(backend = mode.as_str(), "Transport type 'auto' selected");
        mode
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Epoll => "epoll",
            TransportMode::Poll => "poll",
        }
    }
}

/// Fixed-size pool of worker execution contexts owned by the transport
/// backend.
///
/// All accepted connections and their I/O run here; the control-plane caller
/// drives async setup work through `handle()` and releases the pool with
/// `shutdown()` once the accept loop has drained.
pub struct WorkerGroup {
    runtime: Runtime,
    mode: TransportMode,
}

impl WorkerGroup {
    /// Start a worker group with `threads` workers named after `name`.
    pub fn start(mode: TransportMode, threads: usize, name: &str) -> io::Result<Self> {
        let base = name.to_string();
        let counter = Arc::new(AtomicUsize::new(0));
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name_fn(move || {
                let id = counter.fetch_add(1, Ordering::Relaxed);
                format!("{} thread {}", base, id)
            })
            .enable_all()
            .build()?;

        tracing::debug!(
            backend = mode.as_str(),
            threads,
            group = name,
            "Worker group started"
        );

        Ok(Self { runtime, mode })
    }

    /// Handle for spawning onto or blocking on the worker pool.
    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Release the worker pool.
    ///
    /// Must be called from a non-worker thread after all connection tasks
    /// have drained; the accept loop is responsible for that drain.
    pub fn shutdown(self) {
        let mode = self.mode;
        drop(self.runtime);
        tracing::debug!(backend = mode.as_str(), "Worker group released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_never_fails_and_is_stable() {
        let first = TransportMode::select();
        let second = TransportMode::select();
        assert_eq!(first, second);
        #[cfg(target_os = "linux")]
        assert_eq!(first, TransportMode::Epoll);
        #[cfg(not(target_os = "linux"))]
        assert_eq!(first, TransportMode::Poll);
    }

    #[test]
    fn worker_group_runs_tasks_and_shuts_down() {
        let group = WorkerGroup::start(TransportMode::select(), 2, "test-group").unwrap();
        let value = group.handle().block_on(async { 21 * 2 });
        assert_eq!(value, 42);
        group.shutdown();
    }

    #[test]
    fn worker_threads_carry_group_name() {
        let group = WorkerGroup::start(TransportMode::select(), 1, "shuffle-server (0)").unwrap();
        let name = group.handle().block_on(async {
            tokio::spawn(async { std::thread::current().name().map(str::to_string) })
                .await
                .unwrap()
        });
        assert!(name.unwrap().starts_with("shuffle-server (0) thread"));
        group.shutdown();
    }
}
