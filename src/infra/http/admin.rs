//! Administrative surface: cache management, resilience snapshots, and the
//! audit trail. Everything except `/api/health` requires the admin role
//! re-validated against the persisted user record.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::application::audit::actions;

use super::error::ApiError;
use super::{HttpState, bearer_token};

pub async fn cache_stats(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = state.gate.require_admin(bearer_token(&headers).as_deref()).await {
        return rejection.into_response();
    }
    let stats = state.cache.stats().await;
    Json(json!({ "success": true, "stats": stats })).into_response()
}

pub async fn cache_clear(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let principal = match state.gate.require_admin(bearer_token(&headers).as_deref()).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };
    state.cache.clear().await;
    state
        .recorder
        .record(Some(principal.id), actions::CACHE_CLEARED, "cache", None)
        .await;
    Json(json!({ "success": true })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub key: String,
}

pub async fn cache_invalidate(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(body): Json<InvalidateRequest>,
) -> Response {
    let principal = match state.gate.require_admin(bearer_token(&headers).as_deref()).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };
    if body.key.is_empty() {
        return ApiError::bad_request("`key` must not be empty").into_response();
    }
    let removed = state.cache.invalidate(&body.key).await;
    state
        .recorder
        .record(
            Some(principal.id),
            actions::CACHE_INVALIDATED,
            "cache",
            Some(format!("key={}", body.key)),
        )
        .await;
    Json(json!({ "success": true, "removed": removed })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct InvalidatePatternRequest {
    pub pattern: String,
}

pub async fn cache_invalidate_pattern(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(body): Json<InvalidatePatternRequest>,
) -> Response {
    let principal = match state.gate.require_admin(bearer_token(&headers).as_deref()).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };
    if body.pattern.is_empty() {
        return ApiError::bad_request("`pattern` must not be empty").into_response();
    }
    let removed = state.cache.invalidate_by_pattern(&body.pattern).await;
    state
        .recorder
        .record(
            Some(principal.id),
            actions::CACHE_INVALIDATED,
            "cache",
            Some(format!("pattern={}", body.pattern)),
        )
        .await;
    Json(json!({ "success": true, "removed": removed })).into_response()
}

pub async fn cache_warm(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let principal = match state.gate.require_admin(bearer_token(&headers).as_deref()).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };
    match state.units.warm_cache().await {
        Ok(warmed) => {
            state
                .recorder
                .record(
                    Some(principal.id),
                    actions::CACHE_WARMED,
                    "cache",
                    Some(format!("entries={warmed}")),
                )
                .await;
            Json(json!({ "success": true, "warmed": warmed })).into_response()
        }
        Err(error) => ApiError::from(error).into_response(),
    }
}

pub async fn resilience(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = state.gate.require_admin(bearer_token(&headers).as_deref()).await {
        return rejection.into_response();
    }
    Json(json!({
        "success": true,
        "breakers": state.breakers.snapshots(),
        "retry": state.retry.snapshots(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u32>,
}

pub async fn audit_list(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Response {
    if let Err(rejection) = state.gate.require_admin(bearer_token(&headers).as_deref()).await {
        return rejection.into_response();
    }
    match state.audit.list_recent(query.limit.unwrap_or(50)).await {
        Ok(events) => Json(json!({ "success": true, "events": events })).into_response(),
        Err(_) => ApiError::internal().into_response(),
    }
}

/// Liveness plus store connectivity. Store unavailability is degraded
/// operation, not an outage, so this stays 200.
pub async fn health(State(state): State<HttpState>) -> Response {
    let stats = state.cache.stats().await;
    Json(json!({
        "status": "ok",
        "store_connected": stats.store.connected,
        "memory_entries": stats.memory_entries,
    }))
    .into_response()
}
