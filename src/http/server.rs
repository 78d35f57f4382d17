//! HTTP server setup.
//!
//! # Responsibilities
//! - Wrap the application router in the traffic hooks and common layers
//! - Serve HTTP/1.1 and HTTP/2 over metered connections
//! - Attach each connection's handle and peer address to its requests
//! - Graceful shutdown with a bounded drain period

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::ConnectInfo, Router};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::TrafficConfig;
use crate::http::request::{request_id_header, UuidRequestId};
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::listener::{Accepted, Listener, ListenerError};
use crate::observability::log_summary;
use crate::traffic::{SocketDeltaTracker, TrafficHooks};

/// Error type for the serve loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hooks configured from `config`: a bounded tracker, plus record logging
/// when enabled.
pub fn default_hooks(config: &TrafficConfig) -> TrafficHooks {
    let hooks = TrafficHooks::new(Arc::new(SocketDeltaTracker::new(config.tracker.max_entries)));
    if config.observability.log_records {
        hooks.with_observer(log_summary)
    } else {
        hooks
    }
}

/// HTTP server running an application router with traffic accounting.
pub struct HttpServer {
    router: Router,
    config: TrafficConfig,
    connections: ConnectionTracker,
}

impl HttpServer {
    pub fn new(config: TrafficConfig, app: Router, hooks: TrafficHooks) -> Self {
        let router = Self::build_router(&config, app, hooks);
        Self {
            router,
            config,
            connections: ConnectionTracker::new(),
        }
    }

    /// Build the middleware stack. The traffic hooks are added last and
    /// therefore run first.
    #[allow(deprecated)]
    fn build_router(config: &TrafficConfig, app: Router, hooks: TrafficHooks) -> Router {
        let app = app
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(request_id_header()))
            .layer(SetRequestIdLayer::new(request_id_header(), UuidRequestId))
            .layer(TraceLayer::new_for_http());
        hooks.register(app)
    }

    pub fn config(&self) -> &TrafficConfig {
        &self.config
    }

    /// Accept and serve connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.recv() => break,
            };

            match accepted {
                Ok(accepted) => {
                    let guard = self.connections.track(accepted.connection.id());
                    self.serve_connection(accepted, guard, shutdown.resubscribe());
                }
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        tracing::info!(
            active_connections = self.connections.active_count(),
            grace_secs = grace.as_secs(),
            "Draining connections"
        );
        if tokio::time::timeout(grace, self.connections.wait_idle()).await.is_err() {
            tracing::warn!(
                active_connections = self.connections.active_count(),
                "Shutdown grace period elapsed with open connections"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn serve_connection(&self, accepted: Accepted, guard: ConnectionGuard, mut shutdown: broadcast::Receiver<()>) {
        let Accepted { stream, connection, permit } = accepted;
        let peer_addr: SocketAddr = connection.remote_addr();
        let router = self.router.clone();

        let service = service_fn(move |mut request: hyper::Request<Incoming>| {
            request.extensions_mut().insert(Arc::clone(&connection));
            request.extensions_mut().insert(ConnectInfo(peer_addr));
            router.clone().oneshot(request)
        });

        tokio::spawn(async move {
            let _permit = permit;
            let connection_id = guard.id();
            let _guard = guard;
            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        tracing::debug!(connection_id = %connection_id, error = %e, "Connection ended with error");
                    }
                    return;
                }
                _ = shutdown.recv() => {}
            }

            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                tracing::debug!(connection_id = %connection_id, error = %e, "Connection ended with error during shutdown");
            }
        });
    }
}
