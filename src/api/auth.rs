use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

pub const WORKER_SECRET_HEADER: &str = "x-worker-secret";

/// Reject worker traffic that does not carry the shared worker secret.
/// With no secret configured every request passes.
pub async fn require_worker_secret(
    State(expected): State<Option<Arc<str>>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = expected else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(WORKER_SECRET_HEADER)
        .and_then(|h| h.to_str().ok());

    let Some(presented) = presented else {
        tracing::warn!(path = %request.uri().path(), "Worker request rejected: missing secret header");
        return Err(StatusCode::UNAUTHORIZED);
    };

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request.uri().path(), "Worker request rejected: invalid secret");
        Err(StatusCode::UNAUTHORIZED)
    }
}
