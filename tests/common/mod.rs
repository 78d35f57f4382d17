//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    routing::{get, post},
    Router,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use http_traffic::config::TrafficConfig;
use http_traffic::http::{ErrorResponse, HttpServer};
use http_traffic::lifecycle::Shutdown;
use http_traffic::net::Listener;
use http_traffic::traffic::{SocketDeltaTracker, TrafficHooks, TrafficSummary};

/// A running server whose finished records are collected.
pub struct TestServer {
    pub addr: SocketAddr,
    records: mpsc::UnboundedReceiver<TrafficSummary>,
    shutdown: Shutdown,
}

impl TestServer {
    /// Next finished record, in completion order.
    pub async fn next_record(&mut self) -> TrafficSummary {
        tokio::time::timeout(Duration::from_secs(5), self.records.recv())
            .await
            .expect("timed out waiting for a finished record")
            .expect("server stopped")
    }

    pub async fn connect(&self) -> RawClient {
        RawClient {
            stream: TcpStream::connect(self.addr).await.unwrap(),
            buf: Vec::new(),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start `app` on an ephemeral port with traffic accounting.
pub async fn start_server(app: Router) -> TestServer {
    let mut config = TrafficConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.shutdown_grace_secs = 1;

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (tx, records) = mpsc::unbounded_channel();
    let hooks = TrafficHooks::new(Arc::new(SocketDeltaTracker::new(config.tracker.max_entries)))
        .with_observer(move |summary| {
            let _ = tx.send(summary.clone());
        });

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config, app, hooks);
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer { addr, records, shutdown }
}

/// Routes shared by the tests.
pub fn demo_app() -> Router {
    Router::new()
        .route("/foo", get(|| async { "OK" }))
        .route("/echo", post(|body: Bytes| async move { body }))
        .route(
            "/stream",
            get(|| async {
                let chunks = ["one\n", "two\n", "three\n"]
                    .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes())));
                Body::from_stream(futures_util::stream::iter(chunks))
            }),
        )
        .fallback(|| async { ErrorResponse::not_found() })
}

/// A response as read off the wire.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Every byte of the response: status line, headers, framing, body.
    pub wire_len: usize,
}

/// Minimal HTTP/1.1 client that keeps byte-exact track of what it read.
pub struct RawClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl RawClient {
    pub async fn send(&mut self, request: &str) {
        self.stream.write_all(request.as_bytes()).await.unwrap();
    }

    pub async fn read_response(&mut self) -> RawResponse {
        loop {
            if let Some((response, used)) = parse_response(&self.buf) {
                self.buf.drain(..used);
                return response;
            }
            let mut chunk = [0u8; 4096];
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut chunk))
                .await
                .expect("timed out reading response")
                .unwrap();
            assert!(n > 0, "connection closed before a full response arrived");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn roundtrip(&mut self, request: &str) -> RawResponse {
        self.send(request).await;
        self.read_response().await
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse one complete response from the front of `buf`.
fn parse_response(buf: &[u8]) -> Option<(RawResponse, usize)> {
    let head_end = find(buf, b"\r\n\r\n")? + 4;
    let head = std::str::from_utf8(&buf[..head_end]).ok()?;
    let mut lines = head.split("\r\n");
    let status: u16 = lines.next()?.split(' ').nth(1)?.parse().ok()?;

    let mut content_length = None;
    let mut chunked = false;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse::<usize>().ok();
            } else if name.eq_ignore_ascii_case("transfer-encoding") && value.eq_ignore_ascii_case("chunked") {
                chunked = true;
            }
        }
    }

    if chunked {
        let mut body = Vec::new();
        let mut pos = head_end;
        loop {
            let line_end = pos + find(&buf[pos..], b"\r\n")?;
            let size_text = std::str::from_utf8(&buf[pos..line_end]).ok()?;
            let size = usize::from_str_radix(size_text.split(';').next()?.trim(), 16).ok()?;
            pos = line_end + 2;
            if size == 0 {
                if buf.len() < pos + 2 {
                    return None;
                }
                pos += 2;
                return Some((RawResponse { status, body, wire_len: pos }, pos));
            }
            if buf.len() < pos + size + 2 {
                return None;
            }
            body.extend_from_slice(&buf[pos..pos + size]);
            pos += size + 2;
        }
    }

    let len = content_length.unwrap_or(0);
    if buf.len() < head_end + len {
        return None;
    }
    let body = buf[head_end..head_end + len].to_vec();
    Some((RawResponse { status, body, wire_len: head_end + len }, head_end + len))
}
