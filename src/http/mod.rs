//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! metered connection
//!     → server.rs (hyper connection, layers, traffic hooks)
//!     → request.rs (request ID)
//!     → application router
//!     → error.rs (error-style responses)
//!     → Send to client
//! ```

pub mod error;
pub mod request;
pub mod server;

pub use error::{ErrorBody, ErrorPayload, ErrorResponse};
pub use request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
pub use server::{default_hooks, HttpServer, ServerError};
