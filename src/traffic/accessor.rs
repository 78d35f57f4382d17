//! Request-scoped read access to the traffic record.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, Request, StatusCode},
};

use crate::traffic::record::{TrafficHandle, TrafficRecord};

/// Extractor yielding the current request's traffic handle.
///
/// Rejects with `500` when the traffic layer is not installed.
#[derive(Debug, Clone)]
pub struct Traffic(pub TrafficHandle);

impl Traffic {
    /// Current state of the record; partial until the response finished.
    pub fn record(&self) -> TrafficRecord {
        self.0.snapshot()
    }
}

impl<S> FromRequestParts<S> for Traffic
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TrafficHandle>()
            .cloned()
            .map(Traffic)
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Traffic accounting not installed"))
    }
}

/// Read the traffic record attached to a request.
pub trait TrafficExt {
    fn traffic_handle(&self) -> Option<&TrafficHandle>;

    fn traffic(&self) -> Option<TrafficRecord> {
        self.traffic_handle().map(TrafficHandle::snapshot)
    }
}

impl<B> TrafficExt for Request<B> {
    fn traffic_handle(&self) -> Option<&TrafficHandle> {
        self.extensions().get::<TrafficHandle>()
    }
}

impl TrafficExt for Parts {
    fn traffic_handle(&self) -> Option<&TrafficHandle> {
        self.extensions.get::<TrafficHandle>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::hooks::TrafficHooks;
    use crate::traffic::tracker::SocketDeltaTracker;
    use axum::{body::Body, routing::get, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[test]
    fn missing_handle() {
        let request = Request::builder().body(()).unwrap();
        assert!(request.traffic().is_none());
    }

    #[test]
    fn repeated_reads_are_identical() {
        let handle = TrafficHandle::start();
        let mut request = Request::builder().body(()).unwrap();
        request.extensions_mut().insert(handle.clone());
        handle.finish(10);

        let first = request.traffic().unwrap();
        let second = request.traffic().unwrap();
        assert_eq!(first, second);
        assert!(first.is_finished());

        let (parts, _) = request.into_parts();
        assert_eq!(parts.traffic().unwrap(), first);
    }

    #[tokio::test]
    async fn extractor_requires_layer() {
        let router = Router::new().route(
            "/",
            get(|traffic: Traffic| async move { traffic.record().recv_raw.to_string() }),
        );

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let app = TrafficHooks::new(Arc::new(SocketDeltaTracker::default())).register(router);
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let recv_raw: u64 = std::str::from_utf8(&body).unwrap().parse().unwrap();
        assert_eq!(recv_raw, "GET / HTTP/1.1\r\n\r\n".len() as u64);
    }
}
