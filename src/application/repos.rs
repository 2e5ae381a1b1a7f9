//! Repository traits separating services from persistence.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{AuditEventRecord, PowerUnitRecord, UserRecord};
use crate::domain::types::PowerUnitStatus;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity constraint violated: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Source of truth for identity and role. The role stored here always wins
/// over whatever a session token carries.
#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError>;
}

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn append_event(&self, record: AuditEventRecord) -> Result<(), RepoError>;
    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditEventRecord>, RepoError>;
}

#[async_trait]
pub trait PowerUnitsRepo: Send + Sync {
    async fn list_units(&self) -> Result<Vec<PowerUnitRecord>, RepoError>;
    async fn find_unit(&self, id: Uuid) -> Result<Option<PowerUnitRecord>, RepoError>;
    async fn update_status(
        &self,
        id: Uuid,
        status: PowerUnitStatus,
        output_kw: Option<f64>,
    ) -> Result<PowerUnitRecord, RepoError>;
}
