use crate::errors::{AppError, AppResult};
use crate::models::{
    CacheRefreshRecord, CacheRefreshStatus, ColumnMeta, CreateDashboardItemPayload, Dashboard, DashboardItem,
    EngineSettings, ItemDetail, ItemLayout, ItemLayoutUpdate, QueryResult, RefreshTarget, ScheduleFrequency,
    SchedulePolicy,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

const DASHBOARD_COLUMNS: &str = "id, project_id, name, cache_enabled, schedule_frequency, schedule_cron,
     schedule_timezone, next_scheduled_at, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, dashboard_id, type, layout_json, detail_json, display_name, created_at, updated_at";
const REFRESH_COLUMNS: &str =
    "id, hash, dashboard_id, dashboard_item_id, status, started_at, finished_at, error_message";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    // ─── Dashboards ─────────────────────────────────────────────────────────

    pub fn create_dashboard(&self, project_id: i64, name: &str) -> AppResult<Dashboard> {
        let now = fmt_time(Utc::now());
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO dashboard (project_id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![project_id, name, now],
        );
        match inserted {
            Ok(_) => {}
            Err(error) if is_constraint_violation(&error) => {
                return Err(AppError::Conflict(format!(
                    "Project {} already has a dashboard",
                    project_id
                )));
            }
            Err(error) => return Err(error.into()),
        }
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {} FROM dashboard WHERE id = ?1", DASHBOARD_COLUMNS),
            [id],
            parse_dashboard_row,
        )
        .map_err(AppError::from)
    }

    pub fn get_dashboard(&self, dashboard_id: i64) -> AppResult<Option<Dashboard>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM dashboard WHERE id = ?1", DASHBOARD_COLUMNS),
            [dashboard_id],
            parse_dashboard_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn get_dashboard_by_project(&self, project_id: i64) -> AppResult<Option<Dashboard>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM dashboard WHERE project_id = ?1", DASHBOARD_COLUMNS),
            [project_id],
            parse_dashboard_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_dashboards(&self) -> AppResult<Vec<Dashboard>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM dashboard ORDER BY id ASC", DASHBOARD_COLUMNS))?;
        let rows = stmt
            .query_map([], parse_dashboard_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persists a validated policy together with its freshly computed next run.
    pub fn update_dashboard_schedule(
        &self,
        dashboard_id: i64,
        policy: &SchedulePolicy,
        next_scheduled_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Dashboard>> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE dashboard
             SET cache_enabled = ?1, schedule_frequency = ?2, schedule_cron = ?3, schedule_timezone = ?4,
                 next_scheduled_at = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                policy.cache_enabled,
                policy.frequency.as_str(),
                policy.cron,
                policy.timezone,
                next_scheduled_at.map(fmt_time),
                fmt_time(Utc::now()),
                dashboard_id
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        conn.query_row(
            &format!("SELECT {} FROM dashboard WHERE id = ?1", DASHBOARD_COLUMNS),
            [dashboard_id],
            parse_dashboard_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn set_next_scheduled_at(&self, dashboard_id: i64, next_scheduled_at: Option<DateTime<Utc>>) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE dashboard SET next_scheduled_at = ?1 WHERE id = ?2",
            params![next_scheduled_at.map(fmt_time), dashboard_id],
        )?;
        Ok(())
    }

    pub fn find_due_dashboards(&self, now: DateTime<Utc>) -> AppResult<Vec<Dashboard>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dashboard
             WHERE cache_enabled = 1
               AND next_scheduled_at IS NOT NULL
               AND next_scheduled_at <= ?1
             ORDER BY next_scheduled_at ASC",
            DASHBOARD_COLUMNS
        ))?;
        let rows = stmt
            .query_map([fmt_time(now)], parse_dashboard_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ─── Dashboard items ────────────────────────────────────────────────────

    pub fn insert_dashboard_item(&self, payload: &CreateDashboardItemPayload) -> AppResult<DashboardItem> {
        let now = fmt_time(Utc::now());
        let layout = payload.layout.unwrap_or_default();
        let detail = ItemDetail {
            sql: payload.sql.clone(),
            chart_schema: payload.chart_schema.clone().unwrap_or(serde_json::json!({})),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO dashboard_item (dashboard_id, type, layout_json, detail_json, display_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                payload.dashboard_id,
                payload.r#type,
                serde_json::to_string(&layout)?,
                serde_json::to_string(&detail)?,
                payload.display_name,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {} FROM dashboard_item WHERE id = ?1", ITEM_COLUMNS),
            [id],
            parse_item_row,
        )
        .map_err(AppError::from)
    }

    pub fn get_dashboard_item(&self, item_id: i64) -> AppResult<Option<DashboardItem>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM dashboard_item WHERE id = ?1", ITEM_COLUMNS),
            [item_id],
            parse_item_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_dashboard_items(&self, dashboard_id: i64) -> AppResult<Vec<DashboardItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dashboard_item WHERE dashboard_id = ?1 ORDER BY id ASC",
            ITEM_COLUMNS
        ))?;
        let rows = stmt
            .query_map([dashboard_id], parse_item_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_item_layouts(&self, dashboard_id: i64, layouts: &[ItemLayoutUpdate]) -> AppResult<usize> {
        let now = fmt_time(Utc::now());
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut affected = 0usize;
        for update in layouts {
            affected += tx.execute(
                "UPDATE dashboard_item SET layout_json = ?1, updated_at = ?2 WHERE id = ?3 AND dashboard_id = ?4",
                params![serde_json::to_string(&update.layout)?, now, update.item_id, dashboard_id],
            )?;
        }
        tx.commit()?;
        Ok(affected)
    }

    pub fn delete_dashboard_item(&self, item_id: i64) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM dashboard_item WHERE id = ?1", [item_id])?;
        Ok(changed > 0)
    }

    // ─── Cache refresh records ──────────────────────────────────────────────

    /// Claims the refresh slot for `target` by inserting an IN_PROGRESS row.
    ///
    /// Returns `None` when another attempt already holds the slot. The check and the
    /// insert share one transaction, and the partial unique index on IN_PROGRESS rows
    /// rejects any insert that slips past the check.
    pub fn try_start_refresh(
        &self,
        target: RefreshTarget,
        hash: &str,
        started_at: DateTime<Utc>,
    ) -> AppResult<Option<CacheRefreshRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let holder: Option<i64> = tx
            .query_row(
                "SELECT id FROM dashboard_cache_refresh
                 WHERE dashboard_id = ?1 AND dashboard_item_id IS ?2 AND status = 'IN_PROGRESS'
                 LIMIT 1",
                params![target.dashboard_id, target.dashboard_item_id],
                |row| row.get(0),
            )
            .optional()?;
        if holder.is_some() {
            return Ok(None);
        }

        let inserted = tx.execute(
            "INSERT INTO dashboard_cache_refresh (hash, dashboard_id, dashboard_item_id, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                hash,
                target.dashboard_id,
                target.dashboard_item_id,
                CacheRefreshStatus::InProgress.as_str(),
                fmt_time(started_at)
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(error) if is_constraint_violation(&error) => return Ok(None),
            Err(error) => return Err(error.into()),
        }
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Some(CacheRefreshRecord {
            id,
            hash: hash.to_string(),
            dashboard_id: target.dashboard_id,
            dashboard_item_id: target.dashboard_item_id,
            status: CacheRefreshStatus::InProgress,
            started_at: parse_time(&fmt_time(started_at)).map_err(AppError::from)?,
            finished_at: None,
            error_message: None,
        }))
    }

    pub fn find_in_progress_refresh(&self, target: RefreshTarget) -> AppResult<Option<CacheRefreshRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM dashboard_cache_refresh
                 WHERE dashboard_id = ?1 AND dashboard_item_id IS ?2 AND status = 'IN_PROGRESS'
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                REFRESH_COLUMNS
            ),
            params![target.dashboard_id, target.dashboard_item_id],
            parse_refresh_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn find_latest_success_by_hash(&self, hash: &str) -> AppResult<Option<CacheRefreshRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM dashboard_cache_refresh
                 WHERE hash = ?1 AND status = 'SUCCESS'
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                REFRESH_COLUMNS
            ),
            [hash],
            parse_refresh_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn find_latest_refresh(&self, target: RefreshTarget) -> AppResult<Option<CacheRefreshRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM dashboard_cache_refresh
                 WHERE dashboard_id = ?1 AND dashboard_item_id IS ?2
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                REFRESH_COLUMNS
            ),
            params![target.dashboard_id, target.dashboard_item_id],
            parse_refresh_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn get_refresh(&self, refresh_id: i64) -> AppResult<Option<CacheRefreshRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM dashboard_cache_refresh WHERE id = ?1", REFRESH_COLUMNS),
            [refresh_id],
            parse_refresh_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_refreshes(&self, dashboard_id: i64, limit: u32) -> AppResult<Vec<CacheRefreshRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dashboard_cache_refresh
             WHERE dashboard_id = ?1
             ORDER BY started_at DESC, id DESC LIMIT ?2",
            REFRESH_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![dashboard_id, limit], parse_refresh_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Finalizes an IN_PROGRESS row as SUCCESS, storing the computed result when one is
    /// given. Returns false if the row was already finalized.
    pub fn complete_refresh(
        &self,
        refresh_id: i64,
        finished_at: DateTime<Utc>,
        result: Option<&QueryResult>,
    ) -> AppResult<bool> {
        let finished = fmt_time(finished_at);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE dashboard_cache_refresh SET status = 'SUCCESS', finished_at = ?1
             WHERE id = ?2 AND status = 'IN_PROGRESS'",
            params![finished, refresh_id],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        if let Some(result) = result {
            tx.execute(
                "INSERT INTO dashboard_cache_result (refresh_id, hash, columns_json, rows_json, row_count, created_at)
                 SELECT id, hash, ?1, ?2, ?3, ?4 FROM dashboard_cache_refresh WHERE id = ?5",
                params![
                    serde_json::to_string(&result.columns)?,
                    serde_json::to_string(&result.data)?,
                    result.data.len() as i64,
                    finished,
                    refresh_id
                ],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn fail_refresh(&self, refresh_id: i64, finished_at: DateTime<Utc>, error_message: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE dashboard_cache_refresh SET status = 'FAILED', finished_at = ?1, error_message = ?2
             WHERE id = ?3 AND status = 'IN_PROGRESS'",
            params![fmt_time(finished_at), error_message, refresh_id],
        )?;
        Ok(changed > 0)
    }

    pub fn get_cached_result(&self, refresh_id: i64) -> AppResult<Option<QueryResult>> {
        let conn = self.lock()?;
        let raw: Option<(String, String)> = conn
            .query_row(
                "SELECT columns_json, rows_json FROM dashboard_cache_result WHERE refresh_id = ?1",
                [refresh_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((columns_raw, rows_raw)) = raw else {
            return Ok(None);
        };
        Ok(Some(QueryResult {
            columns: serde_json::from_str::<Vec<ColumnMeta>>(&columns_raw)?,
            data: serde_json::from_str::<Vec<Vec<serde_json::Value>>>(&rows_raw)?,
        }))
    }

    pub fn mark_orphan_refreshes_failed(&self) -> AppResult<u64> {
        let now = fmt_time(Utc::now());
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE dashboard_cache_refresh
             SET status = 'FAILED', finished_at = ?1, error_message = 'Refresh interrupted by restart'
             WHERE status = 'IN_PROGRESS'",
            [now],
        )?;
        Ok(changed as u64)
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<EngineSettings> {
        let conn = self.lock()?;
        let raw: String = conn.query_row(
            "SELECT value_json FROM settings WHERE key = 'engine'",
            [],
            |row| row.get(0),
        )?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<EngineSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: EngineSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("Invalid settings: {}", error)))?;
        settings
            .validate()
            .map_err(|reason| AppError::Validation(format!("Invalid settings: {}", reason)))?;

        let conn = self.lock()?;
        conn.execute(
            "UPDATE settings SET value_json = ?1 WHERE key = 'engine'",
            [serde_json::to_string(&settings)?],
        )?;
        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value_json) VALUES ('engine', ?1)",
            [serde_json::to_string(&EngineSettings::default())?],
        )?;
        Ok(())
    }
}

fn parse_dashboard_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dashboard> {
    Ok(Dashboard {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        cache_enabled: row.get::<_, i32>(3)? != 0,
        schedule_frequency: parse_frequency(&row.get::<_, String>(4)?)?,
        schedule_cron: row.get(5)?,
        schedule_timezone: row.get(6)?,
        next_scheduled_at: row
            .get::<_, Option<String>>(7)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        created_at: parse_time(&row.get::<_, String>(8)?)?,
        updated_at: parse_time(&row.get::<_, String>(9)?)?,
    })
}

fn parse_item_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DashboardItem> {
    let layout_raw: String = row.get(3)?;
    let detail_raw: String = row.get(4)?;
    Ok(DashboardItem {
        id: row.get(0)?,
        dashboard_id: row.get(1)?,
        r#type: row.get(2)?,
        layout: serde_json::from_str::<ItemLayout>(&layout_raw).unwrap_or_default(),
        detail: serde_json::from_str::<ItemDetail>(&detail_raw).map_err(|error| invalid_data(error.to_string()))?,
        display_name: row.get(5)?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
        updated_at: parse_time(&row.get::<_, String>(7)?)?,
    })
}

fn parse_refresh_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRefreshRecord> {
    Ok(CacheRefreshRecord {
        id: row.get(0)?,
        hash: row.get(1)?,
        dashboard_id: row.get(2)?,
        dashboard_item_id: row.get(3)?,
        status: parse_refresh_status(&row.get::<_, String>(4)?)?,
        started_at: parse_time(&row.get::<_, String>(5)?)?,
        finished_at: row
            .get::<_, Option<String>>(6)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        error_message: row.get(7)?,
    })
}

fn parse_frequency(raw: &str) -> rusqlite::Result<ScheduleFrequency> {
    match raw {
        "Weekly" => Ok(ScheduleFrequency::Weekly),
        "Daily" => Ok(ScheduleFrequency::Daily),
        "Custom" => Ok(ScheduleFrequency::Custom),
        "Never" => Ok(ScheduleFrequency::Never),
        other => Err(invalid_data(format!("Unknown schedule frequency '{}'", other))),
    }
}

fn parse_refresh_status(raw: &str) -> rusqlite::Result<CacheRefreshStatus> {
    match raw {
        "IN_PROGRESS" => Ok(CacheRefreshStatus::InProgress),
        "SUCCESS" => Ok(CacheRefreshStatus::Success),
        "FAILED" => Ok(CacheRefreshStatus::Failed),
        other => Err(invalid_data(format!("Unknown refresh status '{}'", other))),
    }
}

/// Fixed-width UTC timestamps so that text comparison in SQL matches time order.
fn fmt_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| invalid_data(error.to_string()))
}

fn invalid_data(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::ConstraintViolation
    )
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
