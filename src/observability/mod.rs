//! Observability subsystem.
//!
//! # Design Decisions
//! - Structured logging through `tracing`
//! - Finished traffic records are logged through the hook observer, not
//!   aggregated

pub mod logging;

pub use logging::{init_logging, log_summary};
