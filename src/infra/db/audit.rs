use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{AuditRepo, RepoError};
use crate::domain::entities::AuditEventRecord;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(FromRow)]
struct AuditRow {
    id: Uuid,
    user_id: Option<Uuid>,
    action: String,
    resource: String,
    details: Option<String>,
    created_at: OffsetDateTime,
}

impl From<AuditRow> for AuditEventRecord {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            action: row.action,
            resource: row.resource,
            details: row.details,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl AuditRepo for PostgresRepositories {
    async fn append_event(&self, record: AuditEventRecord) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO audit_events (id, user_id, action, resource, details, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.action)
        .bind(&record.resource)
        .bind(&record.details)
        .bind(record.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditEventRecord>, RepoError> {
        let limit = limit.clamp(1, 200);
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, user_id, action, resource, details, created_at \
             FROM audit_events ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(AuditEventRecord::from).collect())
    }
}
