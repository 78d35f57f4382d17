//! Socket delta tracking.
//!
//! # Responsibilities
//! - Remember, per local connection identity, the last cumulative byte
//!   counter seen on that connection
//! - Turn cumulative counters into per-request deltas across keep-alive
//! - Re-baseline when the same local slot is reused by another peer
//!
//! # Design Decisions
//! - `DashMap` entry API serializes access per key, unrelated
//!   connections never contend on the same shard lock for long
//! - Bounded: least recently used entry evicted past `max_entries`
//! - Unavailable counters contribute 0, never an error

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Local identity used when the host cannot expose a descriptor.
pub const UNKNOWN_DESCRIPTOR: &str = "unknown";

/// Direction-specific prefix of a local identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Request,
    Response,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Request => "req",
            Role::Response => "res",
        }
    }
}

/// Cumulative connection counter to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    BytesRead,
    BytesWritten,
}

/// What the tracker needs to know about a connection.
pub trait ConnectionInfo {
    /// Best-effort local descriptor (socket fd); `None` when the transport
    /// does not expose one.
    fn local_descriptor(&self) -> Option<i64>;

    /// Peer identity as `<family>:<address>:<port>`.
    fn remote_identity(&self) -> String;

    /// Current cumulative value of a counter.
    fn counter(&self, field: CounterField) -> u64;
}

#[derive(Debug)]
struct ConnectionEntry {
    remote: String,
    baseline: u64,
    last_used: u64,
}

/// Converts cumulative connection counters into per-request deltas.
#[derive(Debug)]
pub struct SocketDeltaTracker {
    entries: DashMap<String, ConnectionEntry>,
    max_entries: usize,
    clock: AtomicU64,
}

impl SocketDeltaTracker {
    /// Create a tracker holding at most `max_entries` connection entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            clock: AtomicU64::new(0),
        }
    }

    /// Local identity key `<role>:<descriptor>` for a connection.
    pub fn local_key(role: Role, connection: &dyn ConnectionInfo) -> String {
        match connection.local_descriptor() {
            Some(fd) if fd >= 0 => format!("{}:{}", role.as_str(), fd),
            _ => format!("{}:{}", role.as_str(), UNKNOWN_DESCRIPTOR),
        }
    }

    /// True if the key is the shared fallback identity.
    pub fn is_sentinel(key: &str) -> bool {
        key.rsplit(':').next() == Some(UNKNOWN_DESCRIPTOR)
    }

    /// Bytes moved on `connection` since the previous call for the same
    /// local identity.
    pub fn delta(&self, role: Role, connection: Option<&dyn ConnectionInfo>, field: CounterField) -> u64 {
        let Some(connection) = connection else {
            return 0;
        };

        let key = Self::local_key(role, connection);
        let remote = connection.remote_identity();
        let current = connection.counter(field);
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);

        let (delta, inserted) = {
            let mut inserted = false;
            let mut entry = self.entries.entry(key.clone()).or_insert_with(|| {
                inserted = true;
                ConnectionEntry {
                    remote: remote.clone(),
                    baseline: 0,
                    last_used: tick,
                }
            });

            if entry.remote != remote {
                tracing::debug!(
                    key = %key,
                    previous = %entry.remote,
                    current = %remote,
                    "Connection slot reused by a different peer, resetting baseline"
                );
                entry.remote = remote;
                entry.baseline = 0;
            }

            if current < entry.baseline {
                tracing::debug!(
                    key = %key,
                    baseline = entry.baseline,
                    current,
                    "Connection counter went backwards, resetting baseline"
                );
                entry.baseline = 0;
            }

            let delta = current - entry.baseline;
            entry.baseline = current;
            entry.last_used = tick;
            (delta, inserted)
        };

        if inserted && self.entries.len() > self.max_entries {
            self.evict_oldest(&key);
        }

        delta
    }

    /// Drop the entry for a local identity, e.g. when its connection closed.
    pub fn forget(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Number of tracked connection identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self, keep: &str) {
        let oldest = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| entry.value().last_used)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            tracing::trace!(key = %key, max_entries = self.max_entries, "Evicted connection entry");
        }
    }
}

impl Default for SocketDeltaTracker {
    fn default() -> Self {
        Self::new(10_000)
    }
}
