//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → metered.rs (byte counters, flush/close notifications)
//!     → connection.rs (shared connection handle, active tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Counting happens below hyper so headers and framing are included

pub mod connection;
pub mod listener;
pub mod metered;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionTracker};
pub use listener::{Accepted, Listener, ListenerError};
pub use metered::MeteredStream;
