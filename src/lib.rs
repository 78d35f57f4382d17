//! HTTP traffic accounting.
//!
//! Produces a per-request record of timing plus raw (wire) and payload
//! (body) byte counts in both directions, without cooperation from the
//! application handlers.
//!
//! # Architecture Overview
//!
//! ```text
//!   TCP ──▶ net::listener ──▶ net::metered (cumulative counters)
//!                                   │
//!                                   ▼
//!                          http::server (hyper)
//!                                   │
//!            ┌──────────────────────┴───────────────────────┐
//!            │ traffic::hooks (outermost layer)              │
//!            │   start ─ inbound chunks ─ pre-response ─     │
//!            │   outbound chunks ─ finished                  │
//!            │        │                 │                    │
//!            │  traffic::estimator  traffic::tracker         │
//!            │        └──────▶ traffic::record ◀─────┘       │
//!            └───────────────────────┬──────────────────────┘
//!                                    ▼
//!                            application router
//! ```

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod traffic;

pub use config::TrafficConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use traffic::{Traffic, TrafficExt, TrafficHooks, TrafficRecord};
