//! Best-effort audit trail.
//!
//! Audit writes must never fail the surrounding decision: failures are
//! logged and swallowed here, once, instead of at every call site.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::domain::entities::AuditEventRecord;

use super::repos::AuditRepo;

pub mod actions {
    pub const LOGIN_SUCCESS: &str = "auth.login.success";
    pub const LOGIN_FAILURE: &str = "auth.login.failure";
    pub const LOGOUT: &str = "auth.logout";
    pub const ROLE_DENIED: &str = "auth.role.denied";
    pub const UNIT_STATUS_CHANGED: &str = "units.status.changed";
    pub const CACHE_CLEARED: &str = "cache.cleared";
    pub const CACHE_INVALIDATED: &str = "cache.invalidated";
    pub const CACHE_WARMED: &str = "cache.warmed";
}

#[derive(Clone)]
pub struct AuditRecorder {
    repo: Arc<dyn AuditRepo>,
}

impl AuditRecorder {
    pub fn new(repo: Arc<dyn AuditRepo>) -> Self {
        Self { repo }
    }

    pub async fn record(
        &self,
        user_id: Option<Uuid>,
        action: &str,
        resource: &str,
        details: Option<String>,
    ) {
        let record = AuditEventRecord {
            id: Uuid::new_v4(),
            user_id,
            action: action.to_string(),
            resource: resource.to_string(),
            details,
            created_at: OffsetDateTime::now_utc(),
        };
        if let Err(error) = self.repo.append_event(record).await {
            warn!(
                target = "voltgate::audit",
                action,
                resource,
                error = %error,
                "audit write failed; event dropped"
            );
        }
    }
}
