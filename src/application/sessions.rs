//! Bearer sessions backed by the key-value store.
//!
//! Tokens are opaque; the store holds JSON claims under the SHA-256 digest of
//! the token, so a raw token never appears in the store. The role inside the
//! claims is an advisory copy taken at login — authorization re-reads the
//! user record and never trusts it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::cache::GuardedStore;
use crate::domain::types::Role;

const SESSION_PREFIX: &str = "session";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    /// Advisory only; decisions use the persisted record's role.
    pub role: Option<Role>,
}

#[derive(Debug, Error)]
#[error("session backend failure: {0}")]
pub struct SessionError(pub String);

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Identity is trusted, role is not. `Ok(None)` means no valid session.
    async fn get_session(&self, token: &str) -> Result<Option<SessionClaims>, SessionError>;
    /// Mint a new bearer token for `claims`.
    async fn issue(&self, claims: &SessionClaims) -> Result<String, SessionError>;
    /// Drop the session; `Ok(true)` when one existed.
    async fn revoke(&self, token: &str) -> Result<bool, SessionError>;
}

pub struct KvSessionStore {
    store: Arc<GuardedStore>,
    ttl: Duration,
}

impl KvSessionStore {
    pub fn new(store: Arc<GuardedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn digest(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn generate_token() -> String {
        format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
    }
}

#[async_trait]
impl SessionProvider for KvSessionStore {
    async fn get_session(&self, token: &str) -> Result<Option<SessionClaims>, SessionError> {
        let key = Self::digest(token);
        // Store unavailability degrades to "no session": callers see a 401,
        // not a 500, and recover when the store does.
        let Some(raw) = self.store.get(SESSION_PREFIX, &key).await else {
            return Ok(None);
        };
        match serde_json::from_str::<SessionClaims>(&raw) {
            Ok(claims) => Ok(Some(claims)),
            Err(error) => {
                warn!(
                    target = "voltgate::sessions",
                    error = %error,
                    "dropping undecodable session payload"
                );
                self.store.del(SESSION_PREFIX, &key).await;
                Ok(None)
            }
        }
    }

    async fn issue(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        let token = Self::generate_token();
        let key = Self::digest(&token);
        let raw = serde_json::to_string(claims)
            .map_err(|err| SessionError(format!("failed to encode claims: {err}")))?;
        if !self.store.set(SESSION_PREFIX, &key, &raw, self.ttl).await {
            return Err(SessionError(
                "session store rejected the write".to_string(),
            ));
        }
        Ok(token)
    }

    async fn revoke(&self, token: &str) -> Result<bool, SessionError> {
        let key = Self::digest(token);
        let existed = self.store.exists(SESSION_PREFIX, &key).await;
        self.store.del(SESSION_PREFIX, &key).await;
        Ok(existed)
    }
}
