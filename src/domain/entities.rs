//! Persisted records, limited to the fields the core touches.

use time::OffsetDateTime;
use uuid::Uuid;

use super::types::{PowerUnitStatus, Role};

/// A persisted operator account. The `role` column is the source of truth for
/// authorization; session tokens carry only an advisory copy.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// NULL for accounts that were provisioned but never assigned a role.
    pub role: Option<Role>,
    /// PHC-format argon2 hash; NULL for federated accounts.
    pub password_hash: Option<String>,
    pub is_deleted: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PowerUnitRecord {
    pub id: Uuid,
    pub name: String,
    pub site: String,
    pub status: PowerUnitStatus,
    pub output_kw: f64,
    pub updated_at: OffsetDateTime,
}

/// Append-only record of a security-relevant action. Never mutated or deleted
/// by this crate; retention is an external concern.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEventRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource: String,
    pub details: Option<String>,
    pub created_at: OffsetDateTime,
}
