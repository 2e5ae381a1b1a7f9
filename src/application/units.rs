//! Power-unit reads and status changes.
//!
//! Reads go through the layered cache tagged `power-units`; any status
//! change invalidates the whole tag so lists and detail entries fall
//! together.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::cache::{EntryOptions, LayeredCache, WarmEntry};
use crate::domain::entities::PowerUnitRecord;
use crate::domain::types::PowerUnitStatus;

use super::audit::{AuditRecorder, actions};
use super::repos::{PowerUnitsRepo, RepoError};

const UNITS_TAG: &str = "power-units";
const LIST_KEY: &str = "units:all";
const LIST_TTL: Duration = Duration::from_secs(60);
const DETAIL_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("power unit not found")]
    NotFound,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct PowerUnitService {
    repo: Arc<dyn PowerUnitsRepo>,
    cache: Arc<LayeredCache>,
    audit: AuditRecorder,
}

impl PowerUnitService {
    pub fn new(
        repo: Arc<dyn PowerUnitsRepo>,
        cache: Arc<LayeredCache>,
        audit: AuditRecorder,
    ) -> Self {
        Self { repo, cache, audit }
    }

    fn list_options() -> EntryOptions {
        EntryOptions::tagged(LIST_TTL, vec![UNITS_TAG.to_string()])
    }

    fn detail_options() -> EntryOptions {
        EntryOptions::tagged(DETAIL_TTL, vec![UNITS_TAG.to_string()])
    }

    fn detail_key(id: Uuid) -> String {
        format!("units:{id}")
    }

    pub async fn list(&self) -> Result<Vec<PowerUnitRecord>, UnitError> {
        let repo = self.repo.clone();
        self.cache
            .get_or_set(LIST_KEY, &Self::list_options(), || async move {
                repo.list_units().await
            })
            .await
            .map_err(UnitError::from)
    }

    pub async fn get(&self, id: Uuid) -> Result<PowerUnitRecord, UnitError> {
        let repo = self.repo.clone();
        let cached: Option<PowerUnitRecord> = self
            .cache
            .get_or_set(&Self::detail_key(id), &Self::detail_options(), || async move {
                repo.find_unit(id).await
            })
            .await?;
        cached.ok_or(UnitError::NotFound)
    }

    pub async fn update_status(
        &self,
        actor: Uuid,
        id: Uuid,
        status: PowerUnitStatus,
        output_kw: Option<f64>,
    ) -> Result<PowerUnitRecord, UnitError> {
        let updated = match self.repo.update_status(id, status, output_kw).await {
            Ok(updated) => updated,
            Err(RepoError::NotFound) => return Err(UnitError::NotFound),
            Err(error) => return Err(error.into()),
        };

        self.cache
            .invalidate_by_tags(&[UNITS_TAG.to_string()])
            .await;
        info!(
            target = "voltgate::units",
            unit = %id,
            status = status.as_str(),
            "power unit status changed"
        );
        self.audit
            .record(
                Some(actor),
                actions::UNIT_STATUS_CHANGED,
                &id.to_string(),
                Some(format!("status={}", status.as_str())),
            )
            .await;

        Ok(updated)
    }

    /// Load everything once and push the list plus each detail entry into
    /// the cache. Backs the admin warm endpoint and startup warming.
    pub async fn warm_cache(&self) -> Result<u64, UnitError> {
        let units = self.repo.list_units().await?;
        let mut entries = Vec::with_capacity(units.len() + 1);
        entries.push(WarmEntry {
            key: LIST_KEY.to_string(),
            value: serde_json::to_value(&units).unwrap_or_default(),
            options: Self::list_options(),
        });
        for unit in &units {
            entries.push(WarmEntry {
                key: Self::detail_key(unit.id),
                value: serde_json::to_value(Some(unit)).unwrap_or_default(),
                options: Self::detail_options(),
            });
        }
        Ok(self.cache.warm(entries).await)
    }
}
