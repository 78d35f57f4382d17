//! Error-style responses.
//!
//! Handlers return [`ErrorResponse`] instead of building an error body by
//! hand. The rendered response carries an [`ErrorPayload`] extension so the
//! traffic layer can size the payload once instead of streaming it.

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Structured error body: `{"statusCode":404,"error":"Not Found","message":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub error: String,
    pub message: String,
}

/// Marker extension identifying an error-style response.
#[derive(Debug, Clone)]
pub struct ErrorPayload(pub Arc<ErrorBody>);

/// Application-level error rendered as a JSON payload.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    status: StatusCode,
    message: Option<String>,
}

impl ErrorResponse {
    pub fn new(status: StatusCode) -> Self {
        Self { status, message: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST).with_message(message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> ErrorBody {
        let reason = self.status.canonical_reason().unwrap_or("Unknown").to_string();
        ErrorBody {
            status_code: self.status.as_u16(),
            message: self.message.clone().unwrap_or_else(|| reason.clone()),
            error: reason,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let body = self.body();
        let bytes = match serde_json::to_vec(&body) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize error payload");
                return self.status.into_response();
            }
        };

        let mut response = (self.status, bytes).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        response.extensions_mut().insert(ErrorPayload(Arc::new(body)));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_defaults_to_reason_phrase() {
        let body = ErrorResponse::not_found().body();
        assert_eq!(body.status_code, 404);
        assert_eq!(body.error, "Not Found");
        assert_eq!(body.message, "Not Found");

        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"statusCode":404,"error":"Not Found","message":"Not Found"}"#);
    }

    #[test]
    fn custom_message() {
        let body = ErrorResponse::bad_request("missing field").body();
        assert_eq!(body.status_code, 400);
        assert_eq!(body.error, "Bad Request");
        assert_eq!(body.message, "missing field");
    }

    #[tokio::test]
    async fn response_carries_marker_and_json() {
        let response = ErrorResponse::internal().into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json; charset=utf-8"
        );

        let payload = response.extensions().get::<ErrorPayload>().cloned().unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(&parsed, payload.0.as_ref());
    }
}
