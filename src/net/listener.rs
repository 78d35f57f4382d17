//! TCP listener with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Enforce max_connections limit via semaphore
//! - Hand each accepted stream out with its connection handle

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;
use crate::net::connection::ConnectionHandle;
use crate::net::metered::{local_descriptor, MeteredStream};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Invalid bind address '{0}'")]
    Address(String),

    #[error("Failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("Listener closed")]
    Closed,
}

/// A bounded TCP listener that limits concurrent connections.
///
/// When the limit is reached, accepting waits until a slot frees up.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

/// An accepted connection, already metered.
pub struct Accepted {
    pub stream: MeteredStream<TcpStream>,
    pub connection: Arc<ConnectionHandle>,
    pub permit: ConnectionPermit,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::Address(config.bind_address.clone()))?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer_addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let connection = Arc::new(ConnectionHandle::new(peer_addr, local_descriptor(&stream)));

        tracing::debug!(
            peer_addr = %peer_addr,
            connection_id = %connection.id(),
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok(Accepted {
            stream: MeteredStream::new(stream, Arc::clone(&connection)),
            connection,
            permit: ConnectionPermit { _permit: permit },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// Dropping it releases the slot, even if the connection task panicked.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use crate::traffic::tracker::ConnectionInfo;
    use tokio::io::AsyncWriteExt;

    fn config(max_connections: usize) -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections,
        }
    }

    #[tokio::test]
    async fn rejects_bad_address() {
        let mut cfg = config(1);
        cfg.bind_address = "not an address".into();
        assert!(matches!(Listener::bind(&cfg).await, Err(ListenerError::Address(_))));
    }

    #[tokio::test]
    async fn accepted_stream_is_metered() {
        let listener = Listener::bind(&config(2)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
            stream
        });

        let accepted = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);
        assert_eq!(accepted.connection.remote_addr().ip(), addr.ip());
        #[cfg(unix)]
        assert!(accepted.stream.connection().local_descriptor().is_some());

        drop(accepted);
        assert_eq!(listener.available_permits(), 2);
        drop(client.await.unwrap());
    }
}
