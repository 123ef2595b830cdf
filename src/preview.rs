use crate::coordinator::RefreshCoordinator;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{PreviewResult, RefreshReason};
use chrono::Utc;
use std::sync::Arc;

/// Request-time entry point for item data: serves a valid cache, recomputes through
/// the coordinator, or runs live when no record can be kept.
#[derive(Clone)]
pub struct PreviewService {
    db: Arc<Database>,
    coordinator: RefreshCoordinator,
}

impl PreviewService {
    pub fn new(db: Arc<Database>, coordinator: RefreshCoordinator) -> Self {
        Self { db, coordinator }
    }

    pub async fn preview_item_sql(
        &self,
        item_id: i64,
        limit: Option<u32>,
        force: bool,
    ) -> AppResult<PreviewResult> {
        let called_at = Utc::now();
        if limit == Some(0) {
            return Err(AppError::Validation("limit must be greater than zero".to_string()));
        }
        let limit = limit.unwrap_or_else(|| self.coordinator.settings_snapshot().preview_default_limit);

        let item = self
            .db
            .get_dashboard_item(item_id)?
            .ok_or_else(|| AppError::NotFound(format!("Dashboard item not found: {}", item_id)))?;
        let dashboard = self
            .db
            .get_dashboard(item.dashboard_id)?
            .ok_or_else(|| AppError::NotFound(format!("Dashboard not found: {}", item.dashboard_id)))?;

        if !dashboard.cache_enabled {
            let data = self.coordinator.run_live(&dashboard, &item, limit).await?;
            return Ok(PreviewResult {
                data,
                cache_hit: false,
                cache_created_at: None,
                cache_overrode_at: None,
                r#override: false,
            });
        }

        let reason = if force {
            RefreshReason::Override
        } else {
            RefreshReason::Manual
        };
        let outcome = match self.coordinator.refresh_item(&dashboard, &item, reason, Some(limit)).await {
            Ok(outcome) => outcome,
            Err(AppError::RefreshInProgress(_)) => {
                tracing::debug!(
                    dashboard_id = dashboard.id,
                    item_id,
                    "item refresh in progress, previewing live"
                );
                let data = self.coordinator.run_live(&dashboard, &item, limit).await?;
                return Ok(PreviewResult {
                    data,
                    cache_hit: false,
                    cache_created_at: None,
                    cache_overrode_at: force.then_some(called_at),
                    r#override: force,
                });
            }
            Err(error) => return Err(error),
        };

        let data = outcome
            .result
            .ok_or_else(|| AppError::Internal(format!("refresh {} produced no result", outcome.refresh.id)))?;
        if outcome.skipped {
            return Ok(PreviewResult {
                data,
                cache_hit: true,
                cache_created_at: outcome.refresh.finished_at,
                cache_overrode_at: None,
                r#override: false,
            });
        }
        Ok(PreviewResult {
            data,
            cache_hit: false,
            cache_created_at: outcome.refresh.finished_at,
            cache_overrode_at: force.then_some(called_at),
            r#override: force,
        })
    }
}
