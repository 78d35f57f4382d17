//! Per-request traffic record.
//!
//! # Lifecycle
//! ```text
//! Started ──▶ Receiving ──▶ Responding ──▶ Finished
//!   │            │              │              │
//!   seed         inbound        outbound       sent_raw from socket delta,
//!   recv_raw     chunks         chunks or      time_finish, duration
//!                               error estimate
//! ```
//!
//! # Design Decisions
//! - The record is owned by one request; the handle is only cloned into
//!   that request's body wrappers and extensions
//! - Timestamps carry millisecond precision so the duration is exact
//! - Mutations after `Finished` are ignored

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Phase of a traffic record. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Record allocated, request framing estimated.
    Started,
    /// Subscribed to inbound body chunks.
    Receiving,
    /// Response processing has begun.
    Responding,
    /// Outbound stream closed; the record is immutable.
    Finished,
}

/// Timing and byte counters for one request/response cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficRecord {
    pub time_start: SystemTime,
    pub time_finish: SystemTime,
    /// Milliseconds between `time_start` and `time_finish`.
    pub time_duration_ms: u64,
    pub recv_raw: u64,
    pub recv_payload: u64,
    pub sent_raw: u64,
    pub sent_payload: u64,
    pub phase: Phase,
}

impl TrafficRecord {
    fn started(now: SystemTime) -> Self {
        Self {
            time_start: now,
            time_finish: now,
            time_duration_ms: 0,
            recv_raw: 0,
            recv_payload: 0,
            sent_raw: 0,
            sent_payload: 0,
            phase: Phase::Started,
        }
    }

    /// True once the outbound stream closed and the record was finalized.
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Start time as milliseconds since the unix epoch.
    pub fn start_millis(&self) -> u64 {
        epoch_millis(self.time_start)
    }

    /// Finish time as milliseconds since the unix epoch.
    pub fn finish_millis(&self) -> u64 {
        epoch_millis(self.time_finish)
    }
}

/// Shared handle to the record of one in-flight request.
///
/// Cloned into the request extensions and into the body wrappers so every
/// lifecycle hook of that request mutates the same record.
#[derive(Debug, Clone)]
pub struct TrafficHandle {
    inner: Arc<Mutex<TrafficRecord>>,
}

impl TrafficHandle {
    /// Allocate a fresh record with both timestamps at "now".
    pub fn start() -> Self {
        Self::start_at(now_millis())
    }

    pub(crate) fn start_at(now: SystemTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrafficRecord::started(now))),
        }
    }

    /// Current state of the record. Repeated calls after `Finished`
    /// return identical values.
    pub fn snapshot(&self) -> TrafficRecord {
        self.lock().clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Add the estimated request framing length and begin receiving.
    pub(crate) fn seed_request_framing(&self, framing: u64) {
        let mut record = self.lock();
        if record.phase != Phase::Started {
            return;
        }
        record.recv_raw += framing;
        record.phase = Phase::Receiving;
    }

    /// Inbound body chunk delivered to the handler.
    pub(crate) fn add_inbound_chunk(&self, len: u64) {
        let mut record = self.lock();
        if record.phase == Phase::Finished {
            return;
        }
        record.recv_raw += len;
        record.recv_payload += len;
    }

    /// Response processing begins.
    pub(crate) fn begin_response(&self) {
        let mut record = self.lock();
        if record.phase < Phase::Receiving {
            record.phase = Phase::Receiving;
        }
        if record.phase == Phase::Receiving {
            record.phase = Phase::Responding;
        }
    }

    /// Outbound body chunk produced, or the one-shot error payload estimate.
    pub(crate) fn add_outbound_payload(&self, len: u64) {
        let mut record = self.lock();
        if record.phase == Phase::Finished {
            return;
        }
        record.sent_payload += len;
        record.sent_raw = record.sent_raw.max(record.sent_payload);
    }

    /// Close the record. Only the first call has an effect.
    pub(crate) fn finish(&self, sent_raw: u64) -> Option<TrafficRecord> {
        self.finish_at(sent_raw, now_millis())
    }

    pub(crate) fn finish_at(&self, sent_raw: u64, now: SystemTime) -> Option<TrafficRecord> {
        let mut record = self.lock();
        if record.phase == Phase::Finished {
            return None;
        }
        record.sent_raw = sent_raw.max(record.sent_payload);
        record.time_finish = now.max(record.time_start);
        record.time_duration_ms = record
            .time_finish
            .duration_since(record.time_start)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        record.phase = Phase::Finished;
        Some(record.clone())
    }

    fn lock(&self) -> MutexGuard<'_, TrafficRecord> {
        // A panicking observer must not take accounting down with it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Wall clock truncated to whole milliseconds.
pub(crate) fn now_millis() -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(epoch_millis(SystemTime::now()))
}

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
