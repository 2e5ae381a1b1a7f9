use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use super::{HttpState, bearer_token};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(State(state): State<HttpState>, Json(body): Json<LoginRequest>) -> Response {
    match state.gate.login(&body.email, &body.password).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "token": outcome.token,
            "user": outcome.principal,
        }))
        .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

pub async fn logout(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return Json(json!({ "success": true, "revoked": false })).into_response();
    };
    let revoked = state.gate.logout(&token).await;
    Json(json!({ "success": true, "revoked": revoked })).into_response()
}

pub async fn me(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    match state.gate.require_auth(bearer_token(&headers).as_deref()).await {
        Ok(principal) => Json(json!({ "success": true, "user": principal })).into_response(),
        Err(rejection) => rejection.into_response(),
    }
}
