//! Synthesized responses.
//!
//! # Responsibilities
//! - JSON error bodies of the form `{"error": "..."}`
//! - Aborted responses for requests cancelled before the backend answered

use axum::{
    body::{Body, Bytes},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::io;

/// A JSON error response.
pub fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// A response whose body fails on the first read, so the server tears the
/// connection down instead of completing it. Carries no error body.
///
/// The 503 status is only a placeholder: the connection is reset before a
/// complete response exists, so the caller sees a dropped connection (or at
/// most a head with a truncated body), never a 5xx error document.
pub fn aborted() -> Response {
    let body = Body::from_stream(futures_util::stream::once(async {
        Err::<Bytes, _>(io::Error::new(io::ErrorKind::ConnectionAborted, "request cancelled"))
    }));
    (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
}
