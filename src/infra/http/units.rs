use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::types::PowerUnitStatus;

use super::error::ApiError;
use super::{HttpState, bearer_token};

pub async fn list(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let token = bearer_token(&headers);
    if let Err(rejection) = state.gate.require_auth(token.as_deref()).await {
        return rejection.into_response();
    }
    match state.units.list().await {
        Ok(units) => Json(json!({ "success": true, "units": units })).into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}

pub async fn detail(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let token = bearer_token(&headers);
    if let Err(rejection) = state.gate.require_auth(token.as_deref()).await {
        return rejection.into_response();
    }
    match state.units.get(id).await {
        Ok(unit) => Json(json!({ "success": true, "unit": unit })).into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: PowerUnitStatus,
    pub output_kw: Option<f64>,
}

pub async fn update_status(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> Response {
    let token = bearer_token(&headers);
    let principal = match state.gate.require_operator_or_admin(token.as_deref()).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };
    match state
        .units
        .update_status(principal.id, id, body.status, body.output_kw)
        .await
    {
        Ok(unit) => Json(json!({ "success": true, "unit": unit })).into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}
