use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{PowerUnitsRepo, RepoError};
use crate::domain::entities::PowerUnitRecord;
use crate::domain::types::PowerUnitStatus;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(FromRow)]
struct PowerUnitRow {
    id: Uuid,
    name: String,
    site: String,
    status: PowerUnitStatus,
    output_kw: f64,
    updated_at: OffsetDateTime,
}

impl From<PowerUnitRow> for PowerUnitRecord {
    fn from(row: PowerUnitRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            site: row.site,
            status: row.status,
            output_kw: row.output_kw,
            updated_at: row.updated_at,
        }
    }
}

const UNIT_COLUMNS: &str = "id, name, site, status, output_kw, updated_at";

#[async_trait]
impl PowerUnitsRepo for PostgresRepositories {
    async fn list_units(&self) -> Result<Vec<PowerUnitRecord>, RepoError> {
        let rows = sqlx::query_as::<_, PowerUnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM power_units ORDER BY site ASC, name ASC"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PowerUnitRecord::from).collect())
    }

    async fn find_unit(&self, id: Uuid) -> Result<Option<PowerUnitRecord>, RepoError> {
        let row = sqlx::query_as::<_, PowerUnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM power_units WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(PowerUnitRecord::from))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: PowerUnitStatus,
        output_kw: Option<f64>,
    ) -> Result<PowerUnitRecord, RepoError> {
        let row = sqlx::query_as::<_, PowerUnitRow>(&format!(
            "UPDATE power_units \
             SET status = $2, output_kw = COALESCE($3, output_kw), updated_at = now() \
             WHERE id = $1 \
             RETURNING {UNIT_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .bind(output_kw)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(PowerUnitRecord::from).ok_or(RepoError::NotFound)
    }
}
