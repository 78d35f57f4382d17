//! Demo server with traffic accounting.
//!
//! Serves a handful of routes and logs the traffic record of every
//! finished request:
//!
//! ```text
//! curl http://127.0.0.1:12345/foo
//! curl -X POST -d 'test data' http://127.0.0.1:12345/echo
//! curl http://127.0.0.1:12345/stream
//! curl http://127.0.0.1:12345/missing
//! ```

use std::path::PathBuf;

use axum::{
    body::{Body, Bytes},
    routing::{get, post},
    Router,
};
use clap::Parser;
use futures_util::stream;

use http_traffic::config::{load_config, TrafficConfig};
use http_traffic::http::{default_hooks, ErrorResponse, HttpServer};
use http_traffic::lifecycle::{signals::shutdown_on_signal, Shutdown};
use http_traffic::net::Listener;
use http_traffic::observability::init_logging;
use http_traffic::traffic::Traffic;

#[derive(Parser, Debug)]
#[command(name = "traffic-demo")]
#[command(about = "HTTP server demonstrating per-request traffic accounting", long_about = None)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

fn app() -> Router {
    Router::new()
        .route("/foo", get(|| async { "OK" }))
        .route("/echo", post(|body: Bytes| async move { body }))
        .route(
            "/stream",
            get(|| async {
                let chunks = ["one\n", "two\n", "three\n"].map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes())));
                Body::from_stream(stream::iter(chunks))
            }),
        )
        .route(
            "/traffic",
            get(|traffic: Traffic| async move {
                let record = traffic.record();
                format!("recv={}/{}\n", record.recv_payload, record.recv_raw)
            }),
        )
        .fallback(|| async { ErrorResponse::not_found() })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => TrafficConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    init_logging(&config.observability);
    tracing::info!("traffic-demo v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        tracker_max_entries = config.tracker.max_entries,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let listener = Listener::bind(&config.listener).await?;
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(shutdown_on_signal(shutdown));

    let hooks = default_hooks(&config);
    let server = HttpServer::new(config, app(), hooks);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
