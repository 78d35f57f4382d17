//! Per-request traffic accounting.
//!
//! # Data Flow
//! ```text
//! request head ──▶ estimator.rs ──▶ record.rs (recv_raw seed)
//! request body ──▶ body.rs (InboundBody) ──▶ recv_raw / recv_payload
//! response     ──▶ hooks.rs ──┬─▶ error payload estimate ──▶ sent_payload
//!                             └─▶ body.rs (OutboundBody) ──▶ sent_payload
//! stream closed──▶ connection flushed ──▶ tracker.rs delta ──▶ sent_raw
//! handler/host ──▶ accessor.rs (snapshot)
//! ```
//!
//! # Design Decisions
//! - Raw inbound bytes are estimated: the head is already parsed by the
//!   time any middleware runs
//! - Raw outbound bytes come from the connection's cumulative counter,
//!   which covers status line, headers and body as written
//! - Failures only ever degrade a count, never the request

pub mod accessor;
pub mod body;
pub mod estimator;
pub mod hooks;
pub mod record;
pub mod tracker;

pub use accessor::{Traffic, TrafficExt};
pub use hooks::{traffic_middleware, TrafficHooks, TrafficSummary};
pub use record::{Phase, TrafficHandle, TrafficRecord};
pub use tracker::{ConnectionInfo, CounterField, Role, SocketDeltaTracker};
