//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Hold the cumulative byte counters of one accepted connection
//! - Run deferred work after the transport flushed or closed
//! - Count active connections for graceful shutdown

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::traffic::tracker::{ConnectionInfo, CounterField};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Deferred callback attached to a connection.
pub type ConnectionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
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

/// Shared state of one accepted connection.
///
/// The transport side (`MeteredStream`) feeds the counters and fires the
/// callbacks; the request side reads counters and queues callbacks.
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_addr: SocketAddr,
    local_descriptor: Option<i64>,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    requests: AtomicU64,
    flush_waiters: Mutex<Vec<ConnectionCallback>>,
    close_hooks: Mutex<Vec<ConnectionCallback>>,
}

impl ConnectionHandle {
    pub fn new(remote_addr: SocketAddr, local_descriptor: Option<i64>) -> Self {
        Self {
            id: ConnectionId::new(),
            remote_addr,
            local_descriptor,
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            flush_waiters: Mutex::new(Vec::new()),
            close_hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Acquire)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    pub(crate) fn record_read(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::AcqRel);
    }

    pub(crate) fn record_written(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::AcqRel);
    }

    /// Mark a request as started on this connection.
    /// Returns how many requests the connection served before.
    pub fn begin_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::AcqRel)
    }

    pub fn requests_served(&self) -> u64 {
        self.requests.load(Ordering::Acquire)
    }

    /// Run `callback` after the next successful flush of the transport,
    /// or when the connection closes, whichever comes first.
    pub fn when_flushed(&self, callback: ConnectionCallback) {
        lock(&self.flush_waiters).push(callback);
    }

    /// Run `callback` when the connection closes.
    pub fn on_close(&self, callback: ConnectionCallback) {
        lock(&self.close_hooks).push(callback);
    }

    pub(crate) fn has_flush_waiters(&self) -> bool {
        !lock(&self.flush_waiters).is_empty()
    }

    /// Transport flushed everything written so far.
    pub(crate) fn notify_flushed(&self) {
        let waiters = std::mem::take(&mut *lock(&self.flush_waiters));
        for waiter in waiters {
            waiter();
        }
    }

    /// Transport is gone; pending flush waiters run first.
    pub(crate) fn notify_closed(&self) {
        self.notify_flushed();
        let hooks = std::mem::take(&mut *lock(&self.close_hooks));
        for hook in hooks {
            hook();
        }
        tracing::trace!(
            connection_id = %self.id,
            bytes_read = self.bytes_read(),
            bytes_written = self.bytes_written(),
            requests = self.requests_served(),
            "Connection closed"
        );
    }
}

impl ConnectionInfo for ConnectionHandle {
    fn local_descriptor(&self) -> Option<i64> {
        self.local_descriptor
    }

    fn remote_identity(&self) -> String {
        let family = if self.remote_addr.is_ipv4() { "IPv4" } else { "IPv6" };
        format!("{}:{}:{}", family, self.remote_addr.ip(), self.remote_addr.port())
    }

    fn counter(&self, field: CounterField) -> u64 {
        match field {
            CounterField::BytesRead => self.bytes_read(),
            CounterField::BytesWritten => self.bytes_written(),
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("local_descriptor", &self.local_descriptor)
            .field("bytes_read", &self.bytes_read())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed.
    pub async fn wait_idle(&self) {
        while self.active_count() > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }
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
    }
}
