//! Lifecycle hooks driving the traffic record.
//!
//! # Data Flow
//! ```text
//! on-request-start    → allocate record, estimate head, wrap request body
//! on-inbound-chunk    → InboundBody (0..N)
//! on-pre-response     → error payload estimate | wrap response body
//! on-outbound-chunk   → OutboundBody (0..N, normal responses only)
//! on-response-finished→ body complete → connection flushed → sent_raw delta
//! ```
//!
//! # Design Decisions
//! - Installed as the outermost layer so the head estimate sees the
//!   request exactly as received
//! - The outbound counter is read from the connection's flush
//!   notification, after the final byte left hyper's write buffer and
//!   before the next response on that connection is written
//! - Every hook does O(1) bookkeeping; nothing here awaits I/O

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    Router,
};
use serde::Serialize;

use crate::http::error::ErrorPayload;
use crate::http::request::X_REQUEST_ID;
use crate::net::connection::ConnectionHandle;
use crate::traffic::body::{InboundBody, OutboundBody};
use crate::traffic::estimator::estimate_parts;
use crate::traffic::record::{TrafficHandle, TrafficRecord};
use crate::traffic::tracker::{ConnectionInfo, CounterField, Role, SocketDeltaTracker};

/// Finished request as handed to the observer.
#[derive(Debug, Clone)]
pub struct TrafficSummary {
    pub method: Method,
    pub target: String,
    pub status: StatusCode,
    pub request_id: Option<String>,
    pub record: TrafficRecord,
}

/// Callback receiving every finished record.
pub type TrafficObserver = Arc<dyn Fn(&TrafficSummary) + Send + Sync + 'static>;

/// The hook set. Constructed once and shared by every request.
#[derive(Clone)]
pub struct TrafficHooks {
    tracker: Arc<SocketDeltaTracker>,
    observer: Option<TrafficObserver>,
}

impl TrafficHooks {
    pub fn new(tracker: Arc<SocketDeltaTracker>) -> Self {
        Self { tracker, observer: None }
    }

    /// Invoke `observer` with the final record of every request.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&TrafficSummary) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn tracker(&self) -> &Arc<SocketDeltaTracker> {
        &self.tracker
    }

    /// Install the hooks as the outermost layer of `router`.
    pub fn register<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, traffic_middleware))
    }

    /// on-request-start: allocate the record and seed the head estimate.
    pub fn on_request_start(&self, request: Request) -> (Request, TrafficHandle) {
        let handle = TrafficHandle::start();
        let (mut parts, body) = request.into_parts();

        if let Some(connection) = parts.extensions.get::<Arc<ConnectionHandle>>() {
            self.watch_connection(connection);
        }

        handle.seed_request_framing(estimate_parts(&parts));
        parts.extensions.insert(handle.clone());

        let body = Body::new(InboundBody::new(body, handle.clone()));
        (Request::from_parts(parts, body), handle)
    }

    /// on-pre-response: estimate error payloads once, otherwise count the
    /// streamed body. Both paths arm the response-finished hook.
    pub fn on_pre_response(
        &self,
        handle: TrafficHandle,
        response: Response,
        request: RequestInfo,
    ) -> Response {
        handle.begin_response();

        let count_chunks = match response.extensions().get::<ErrorPayload>() {
            Some(payload) => {
                handle.add_outbound_payload(estimate_error_payload(payload.0.as_ref()));
                false
            }
            None => true,
        };

        let mut request = request;
        request.status = response.status();
        if let Some(id) = response.headers().get(X_REQUEST_ID).and_then(|v| v.to_str().ok()) {
            request.request_id = Some(id.to_owned());
        }

        let finish = Finish {
            tracker: Arc::clone(&self.tracker),
            observer: self.observer.clone(),
            handle: handle.clone(),
            request,
        };

        response.map(|body| {
            Body::new(OutboundBody::new(
                body,
                handle,
                count_chunks,
                Box::new(move || finish.arm()),
            ))
        })
    }

    /// Evict the connection's tracker entry once it closes.
    fn watch_connection(&self, connection: &Arc<ConnectionHandle>) {
        if connection.begin_request() > 0 {
            return;
        }
        let key = SocketDeltaTracker::local_key(Role::Response, connection.as_ref());
        if SocketDeltaTracker::is_sentinel(&key) {
            return;
        }
        let tracker = Arc::clone(&self.tracker);
        connection.on_close(Box::new(move || {
            tracker.forget(&key);
        }));
    }
}

impl std::fmt::Debug for TrafficHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficHooks")
            .field("tracked_connections", &self.tracker.len())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Request details carried to the finished observer.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub target: String,
    pub status: StatusCode,
    pub request_id: Option<String>,
    pub connection: Option<Arc<ConnectionHandle>>,
}

impl RequestInfo {
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            target: request.uri().to_string(),
            status: StatusCode::OK,
            request_id: request
                .headers()
                .get(X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            connection: request.extensions().get::<Arc<ConnectionHandle>>().cloned(),
        }
    }
}

/// on-response-finished, armed when the outbound body completes.
struct Finish {
    tracker: Arc<SocketDeltaTracker>,
    observer: Option<TrafficObserver>,
    handle: TrafficHandle,
    request: RequestInfo,
}

impl Finish {
    fn arm(self) {
        match self.request.connection.clone() {
            Some(connection) => connection.when_flushed(Box::new(move || self.run())),
            None => self.run(),
        }
    }

    fn run(self) {
        let connection = self.request.connection.as_deref().map(|c| c as &dyn ConnectionInfo);
        let sent_raw = self.tracker.delta(Role::Response, connection, CounterField::BytesWritten);

        let Some(record) = self.handle.finish(sent_raw) else {
            return;
        };

        if let Some(observer) = &self.observer {
            let summary = TrafficSummary {
                method: self.request.method,
                target: self.request.target,
                status: self.request.status,
                request_id: self.request.request_id,
                record,
            };
            observer(&summary);
        }
    }
}

/// Serialized length of an error payload; 0 if it cannot be serialized.
pub fn estimate_error_payload<T: Serialize + ?Sized>(payload: &T) -> u64 {
    match serde_json::to_vec(payload) {
        Ok(bytes) => bytes.len() as u64,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to estimate error payload size");
            0
        }
    }
}

/// The middleware wiring the hooks around the inner service.
pub async fn traffic_middleware(State(hooks): State<TrafficHooks>, request: Request, next: Next) -> Response {
    let info = RequestInfo::from_request(&request);
    let (request, handle) = hooks.on_request_start(request);
    let response = next.run(request).await;
    hooks.on_pre_response(handle, response, info)
}
