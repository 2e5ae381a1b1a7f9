//! The authorization gate.
//!
//! Every role-gated operation funnels through [`AuthGate`]: resolve the
//! session, re-load the persisted user record, and compare the **persisted**
//! role against the requirement. The role cached inside the session is never
//! trusted for a decision. No failure inside the gate escapes as a raw error;
//! everything converts to a structured [`AuthRejection`].

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::GuardedStore;
use crate::domain::types::Role;

use super::audit::{AuditRecorder, actions};
use super::passwords::verify_password;
use super::repos::UsersRepo;
use super::sessions::{SessionClaims, SessionProvider};

pub mod codes {
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const INVALID_CREDENTIALS: &str = "invalid_credentials";
    pub const TOO_MANY_ATTEMPTS: &str = "too_many_attempts";
    pub const INTERNAL: &str = "internal_error";
}

/// The authenticated identity driving a request. `role` mirrors the
/// persisted record, including its absence.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Option<Role>,
}

/// Structured denial: `{"success": false, "error": …, "code": …}` with
/// status 401 (no valid session), 403 (insufficient role), 429 (login
/// throttled), or 500 (internal failure during the check).
#[derive(Debug)]
pub struct AuthRejection {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AuthRejection {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: codes::UNAUTHORIZED,
            message: "Authentication required".to_string(),
        }
    }

    fn invalid_credentials() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: codes::INVALID_CREDENTIALS,
            message: "Invalid email or password".to_string(),
        }
    }

    fn forbidden() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: codes::FORBIDDEN,
            message: "Insufficient privileges".to_string(),
        }
    }

    fn too_many_attempts(retry_in: Duration) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: codes::TOO_MANY_ATTEMPTS,
            message: format!(
                "Too many failed login attempts; retry in {} seconds",
                retry_in.as_secs().max(1)
            ),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: codes::INTERNAL,
            message: "Internal error during authorization".to_string(),
        }
    }
}

#[derive(Serialize)]
struct RejectionBody {
    success: bool,
    error: String,
    code: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = RejectionBody {
            success: false,
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub token: String,
    pub principal: Principal,
}

/// Sliding lockout for repeated login failures, counted in the shared store
/// so all instances see the same tally. Fails open when the store is away.
pub struct LoginThrottle {
    store: Arc<GuardedStore>,
    max_attempts: u32,
    window: Duration,
}

const THROTTLE_PREFIX: &str = "throttle";

impl LoginThrottle {
    pub fn new(store: Arc<GuardedStore>, max_attempts: u32, window: Duration) -> Self {
        Self {
            store,
            max_attempts,
            window,
        }
    }

    async fn retry_after(&self, email: &str) -> Option<Duration> {
        let count: i64 = self
            .store
            .get(THROTTLE_PREFIX, email)
            .await
            .and_then(|raw| raw.parse().ok())?;
        if count < i64::from(self.max_attempts) {
            return None;
        }
        Some(
            self.store
                .ttl(THROTTLE_PREFIX, email)
                .await
                .unwrap_or(self.window),
        )
    }

    async fn note_failure(&self, email: &str) {
        if self.store.incr(THROTTLE_PREFIX, email).await == Some(1) {
            self.store.expire(THROTTLE_PREFIX, email, self.window).await;
        }
    }

    async fn clear(&self, email: &str) {
        self.store.del(THROTTLE_PREFIX, email).await;
    }
}

pub struct AuthGate {
    sessions: Arc<dyn SessionProvider>,
    users: Arc<dyn UsersRepo>,
    audit: AuditRecorder,
    throttle: Option<LoginThrottle>,
}

impl AuthGate {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        users: Arc<dyn UsersRepo>,
        audit: AuditRecorder,
        throttle: Option<LoginThrottle>,
    ) -> Self {
        Self {
            sessions,
            users,
            audit,
            throttle,
        }
    }

    /// Resolve the caller's identity. Succeeds even when the persisted
    /// record has no role assigned; role enforcement happens only in the
    /// `require_role` family.
    pub async fn require_auth(&self, token: Option<&str>) -> Result<Principal, AuthRejection> {
        let Some(token) = token else {
            return Err(AuthRejection::unauthorized());
        };

        let claims = match self.sessions.get_session(token).await {
            Ok(Some(claims)) => claims,
            Ok(None) => return Err(AuthRejection::unauthorized()),
            Err(error) => {
                warn!(
                    target = "voltgate::auth",
                    error = %error,
                    "session lookup failed"
                );
                return Err(AuthRejection::internal());
            }
        };

        let record = match self.users.find_by_id(claims.user_id).await {
            Ok(Some(record)) if !record.is_deleted => record,
            Ok(_) => return Err(AuthRejection::unauthorized()),
            Err(error) => {
                warn!(
                    target = "voltgate::auth",
                    user_id = %claims.user_id,
                    error = %error,
                    "user lookup failed"
                );
                return Err(AuthRejection::internal());
            }
        };

        if claims.role != record.role {
            debug!(
                target = "voltgate::auth",
                user_id = %record.id,
                session_role = ?claims.role,
                persisted_role = ?record.role,
                "session role is stale; persisted role wins"
            );
        }

        Ok(Principal {
            id: record.id,
            email: record.email,
            name: record.name,
            role: record.role,
        })
    }

    /// Pass when the persisted role is at least `required`; a missing role
    /// fails closed here.
    pub async fn require_role(
        &self,
        token: Option<&str>,
        required: Role,
    ) -> Result<Principal, AuthRejection> {
        let principal = self.require_auth(token).await?;
        match principal.role {
            Some(role) if role >= required => Ok(principal),
            actual => {
                self.audit
                    .record(
                        Some(principal.id),
                        actions::ROLE_DENIED,
                        required.as_str(),
                        Some(format!("actual_role={:?}", actual.map(Role::as_str))),
                    )
                    .await;
                Err(AuthRejection::forbidden())
            }
        }
    }

    pub async fn require_admin(&self, token: Option<&str>) -> Result<Principal, AuthRejection> {
        self.require_role(token, Role::Admin).await
    }

    pub async fn require_operator_or_admin(
        &self,
        token: Option<&str>,
    ) -> Result<Principal, AuthRejection> {
        self.require_role(token, Role::Operator).await
    }

    /// Credential login: verify, mint a session, audit the outcome. The
    /// claims capture the role at login time purely as an advisory copy.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginSuccess, AuthRejection> {
        let email = email.trim().to_ascii_lowercase();

        if let Some(throttle) = &self.throttle
            && let Some(retry_in) = throttle.retry_after(&email).await
        {
            self.audit
                .record(
                    None,
                    actions::LOGIN_FAILURE,
                    "auth",
                    Some(format!("email={email} reason=throttled")),
                )
                .await;
            return Err(AuthRejection::too_many_attempts(retry_in));
        }

        let record = match self.users.find_by_email(&email).await {
            Ok(Some(record)) if !record.is_deleted => record,
            Ok(_) => {
                self.note_login_failure(None, &email, "unknown_account").await;
                return Err(AuthRejection::invalid_credentials());
            }
            Err(error) => {
                warn!(
                    target = "voltgate::auth",
                    error = %error,
                    "user lookup failed during login"
                );
                return Err(AuthRejection::internal());
            }
        };

        let Some(hash) = record.password_hash.as_deref() else {
            self.note_login_failure(Some(record.id), &email, "no_password")
                .await;
            return Err(AuthRejection::invalid_credentials());
        };

        match verify_password(password, hash) {
            Ok(true) => {}
            Ok(false) => {
                self.note_login_failure(Some(record.id), &email, "bad_password")
                    .await;
                return Err(AuthRejection::invalid_credentials());
            }
            Err(error) => {
                warn!(
                    target = "voltgate::auth",
                    user_id = %record.id,
                    error = %error,
                    "password verification failed"
                );
                return Err(AuthRejection::internal());
            }
        }

        if let Some(throttle) = &self.throttle {
            throttle.clear(&email).await;
        }

        let claims = SessionClaims {
            user_id: record.id,
            email: record.email.clone(),
            name: record.name.clone(),
            role: record.role,
        };
        let token = match self.sessions.issue(&claims).await {
            Ok(token) => token,
            Err(error) => {
                warn!(
                    target = "voltgate::auth",
                    user_id = %record.id,
                    error = %error,
                    "session issuance failed"
                );
                return Err(AuthRejection::internal());
            }
        };

        self.audit
            .record(Some(record.id), actions::LOGIN_SUCCESS, "auth", None)
            .await;

        Ok(LoginSuccess {
            token,
            principal: Principal {
                id: record.id,
                email: record.email,
                name: record.name,
                role: record.role,
            },
        })
    }

    /// Drop the session. Best-effort: a missing or already-revoked session
    /// still returns quietly.
    pub async fn logout(&self, token: &str) -> bool {
        let user_id = match self.sessions.get_session(token).await {
            Ok(Some(claims)) => Some(claims.user_id),
            _ => None,
        };
        let revoked = match self.sessions.revoke(token).await {
            Ok(revoked) => revoked,
            Err(error) => {
                warn!(
                    target = "voltgate::auth",
                    error = %error,
                    "session revocation failed"
                );
                false
            }
        };
        if revoked {
            self.audit
                .record(user_id, actions::LOGOUT, "auth", None)
                .await;
        }
        revoked
    }

    async fn note_login_failure(&self, user_id: Option<Uuid>, email: &str, reason: &str) {
        if let Some(throttle) = &self.throttle {
            throttle.note_failure(email).await;
        }
        self.audit
            .record(
                user_id,
                actions::LOGIN_FAILURE,
                "auth",
                Some(format!("email={email} reason={reason}")),
            )
            .await;
    }
}
