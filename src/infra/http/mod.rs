mod admin;
mod auth;
mod error;
mod middleware;
mod rate_limit;
mod units;

pub use error::ApiError;
pub use rate_limit::ApiRateLimiter;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderMap;
use axum::routing::{get, post, put};

use crate::application::audit::AuditRecorder;
use crate::application::auth::AuthGate;
use crate::application::repos::AuditRepo;
use crate::application::units::PowerUnitService;
use crate::cache::LayeredCache;
use crate::resilience::{BreakerRegistry, RetryExecutor};

#[derive(Clone)]
pub struct HttpState {
    pub gate: Arc<AuthGate>,
    pub units: Arc<PowerUnitService>,
    pub cache: Arc<LayeredCache>,
    pub breakers: Arc<BreakerRegistry>,
    pub retry: Arc<RetryExecutor>,
    pub audit: Arc<dyn AuditRepo>,
    pub recorder: AuditRecorder,
    pub rate_limiter: ApiRateLimiter,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/units", get(units::list))
        .route("/api/units/{id}", get(units::detail))
        .route("/api/units/{id}/status", put(units::update_status))
        .route("/api/admin/cache/stats", get(admin::cache_stats))
        .route("/api/admin/cache/clear", post(admin::cache_clear))
        .route("/api/admin/cache/invalidate", post(admin::cache_invalidate))
        .route(
            "/api/admin/cache/invalidate-pattern",
            post(admin::cache_invalidate_pattern),
        )
        .route("/api/admin/cache/warm", post(admin::cache_warm))
        .route("/api/admin/resilience", get(admin::resilience))
        .route("/api/admin/audit", get(admin::audit_list))
        .route("/api/health", get(admin::health))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::api_rate_limit,
        ))
        .with_state(state)
}

/// Bearer token from `Authorization`, falling back to `x-api-token`.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let from_auth = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(|token| token.to_string());
    from_auth.or_else(|| {
        headers
            .get("x-api-token")
            .and_then(|value| value.to_str().ok())
            .map(|token| token.to_string())
    })
}
