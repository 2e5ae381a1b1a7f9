use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use super::error::ApiError;
use super::{HttpState, bearer_token};

/// Per-principal, per-route rate limiting. Unauthenticated callers share the
/// `anonymous` bucket, which keeps credential-stuffing off the login route.
pub async fn api_rate_limit(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let key = bearer_token(request.headers()).unwrap_or_else(|| "anonymous".to_string());

    let (allowed, _remaining) = state.rate_limiter.allow(&key, &path);
    if !allowed {
        return ApiError::rate_limited(state.rate_limiter.retry_after_secs());
    }

    next.run(request).await
}
