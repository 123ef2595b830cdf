use crate::coordinator::{RefreshCoordinator, SharedSettings};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::executor::QueryExecutor;
use crate::models::{
    CacheRefreshRecord, CreateDashboardItemPayload, Dashboard, DashboardItem, DashboardSchedule, EngineSettings,
    ItemLayoutUpdate, PreviewResult, RefreshOutcome, RefreshReason, RefreshTarget, ScheduleFrequency,
    SetDashboardSchedulePayload,
};
use crate::preview::PreviewService;
use crate::scheduler::Scheduler;
use crate::schedule::{compute_next_run, describe_preset, policy_from_payload};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;

const DEFAULT_DASHBOARD_NAME: &str = "Dashboard";
const MAX_HISTORY_LIMIT: u32 = 1000;

/// The API surface for dashboards, schedules, refreshes and previews.
pub struct CacheEngine {
    db: Arc<Database>,
    settings: SharedSettings,
    coordinator: RefreshCoordinator,
    scheduler: Scheduler,
    preview: PreviewService,
    data_dir: PathBuf,
}

impl CacheEngine {
    pub fn new(data_dir: PathBuf, executor: Arc<dyn QueryExecutor>) -> AppResult<Arc<Self>> {
        let db_path = data_dir.join("dashboard-cache.sqlite");
        let db = Arc::new(Database::new(&db_path)?);
        tracing::debug!(path = %db.path().display(), "cache store opened");
        let settings: SharedSettings = Arc::new(RwLock::new(db.get_settings()?));
        let coordinator = RefreshCoordinator::new(db.clone(), executor, settings.clone());
        let scheduler = Scheduler::new(db.clone(), coordinator.clone(), settings.clone());
        let preview = PreviewService::new(db.clone(), coordinator.clone());

        let this = Arc::new(Self {
            db,
            settings,
            coordinator,
            scheduler,
            preview,
            data_dir,
        });

        match this.db.mark_orphan_refreshes_failed() {
            Ok(count) if count > 0 => {
                tracing::warn!(count, "marked orphaned refreshes as failed on startup");
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(error = %error, "failed to recover orphaned refreshes"),
        }
        if let Err(error) = this.repair_schedules() {
            tracing::warn!(error = %error, "failed to repair dashboard schedules");
        }

        Ok(this)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn start_scheduler(&self) -> JoinHandle<()> {
        self.scheduler.start()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ─── Dashboards ─────────────────────────────────────────────────────────

    pub fn create_dashboard(&self, project_id: i64, name: Option<&str>) -> AppResult<Dashboard> {
        let name = name
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_DASHBOARD_NAME);
        let dashboard = self.db.create_dashboard(project_id, name)?;
        tracing::info!(dashboard_id = dashboard.id, project_id, "dashboard created");
        Ok(dashboard)
    }

    pub fn get_dashboard(&self, dashboard_id: i64) -> AppResult<Option<Dashboard>> {
        self.db.get_dashboard(dashboard_id)
    }

    pub fn get_dashboard_by_project(&self, project_id: i64) -> AppResult<Option<Dashboard>> {
        self.db.get_dashboard_by_project(project_id)
    }

    // ─── Items ──────────────────────────────────────────────────────────────

    pub fn create_dashboard_item(&self, payload: CreateDashboardItemPayload) -> AppResult<DashboardItem> {
        if payload.sql.trim().is_empty() {
            return Err(AppError::Validation("Item SQL cannot be empty".to_string()));
        }
        if payload.r#type.trim().is_empty() {
            return Err(AppError::Validation("Item type cannot be empty".to_string()));
        }
        self.require_dashboard(payload.dashboard_id)?;
        self.db.insert_dashboard_item(&payload)
    }

    pub fn list_dashboard_items(&self, dashboard_id: i64) -> AppResult<Vec<DashboardItem>> {
        self.require_dashboard(dashboard_id)?;
        self.db.list_dashboard_items(dashboard_id)
    }

    pub fn update_dashboard_item_layouts(&self, dashboard_id: i64, layouts: Vec<ItemLayoutUpdate>) -> AppResult<usize> {
        self.require_dashboard(dashboard_id)?;
        if let Some(bad) = layouts.iter().find(|update| update.layout.w <= 0 || update.layout.h <= 0) {
            return Err(AppError::Validation(format!(
                "Item {} layout must have a positive width and height",
                bad.item_id
            )));
        }
        self.db.update_item_layouts(dashboard_id, &layouts)
    }

    pub fn delete_dashboard_item(&self, item_id: i64) -> AppResult<bool> {
        self.db.delete_dashboard_item(item_id)
    }

    // ─── Schedule ───────────────────────────────────────────────────────────

    /// Validates and stores the policy with its next run. Nothing is written when the
    /// policy is invalid.
    pub fn set_dashboard_schedule(
        &self,
        dashboard_id: i64,
        payload: SetDashboardSchedulePayload,
    ) -> AppResult<DashboardSchedule> {
        self.require_dashboard(dashboard_id)?;
        let default_timezone = self.settings_snapshot().default_timezone;
        let policy = policy_from_payload(&payload, &default_timezone)?;
        let next = compute_next_run(&policy, Utc::now())?;
        let dashboard = self
            .db
            .update_dashboard_schedule(dashboard_id, &policy, next)?
            .ok_or_else(|| AppError::NotFound(format!("Dashboard not found: {}", dashboard_id)))?;
        tracing::info!(
            dashboard_id,
            frequency = policy.frequency.as_str(),
            cache_enabled = policy.cache_enabled,
            next_scheduled_at = ?next,
            "dashboard schedule updated"
        );
        Ok(schedule_view(&dashboard))
    }

    pub fn get_dashboard_schedule(&self, dashboard_id: i64) -> AppResult<DashboardSchedule> {
        let dashboard = self.require_dashboard(dashboard_id)?;
        Ok(schedule_view(&dashboard))
    }

    // ─── Refresh & preview ──────────────────────────────────────────────────

    pub async fn refresh_dashboard(&self, dashboard_id: i64) -> AppResult<RefreshOutcome> {
        self.coordinator
            .refresh(RefreshTarget::dashboard(dashboard_id), RefreshReason::Manual)
            .await
    }

    pub async fn refresh_item(&self, item_id: i64, force: bool) -> AppResult<RefreshOutcome> {
        let item = self
            .db
            .get_dashboard_item(item_id)?
            .ok_or_else(|| AppError::NotFound(format!("Dashboard item not found: {}", item_id)))?;
        let reason = if force {
            RefreshReason::Override
        } else {
            RefreshReason::Manual
        };
        self.coordinator
            .refresh(RefreshTarget::item(item.dashboard_id, item.id), reason)
            .await
    }

    pub async fn preview_item_sql(&self, item_id: i64, limit: Option<u32>, force: bool) -> AppResult<PreviewResult> {
        self.preview.preview_item_sql(item_id, limit, force).await
    }

    pub fn list_refresh_history(&self, dashboard_id: i64, limit: u32) -> AppResult<Vec<CacheRefreshRecord>> {
        self.require_dashboard(dashboard_id)?;
        self.db.list_refreshes(dashboard_id, limit.clamp(1, MAX_HISTORY_LIMIT))
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<EngineSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<EngineSettings> {
        let settings = self.db.update_settings(update)?;
        tracing::info!(
            default_timezone = %settings.default_timezone,
            preview_default_limit = settings.preview_default_limit,
            execution_timeout_seconds = settings.execution_timeout_seconds,
            "engine settings updated"
        );
        match self.settings.write() {
            Ok(mut current) => *current = settings.clone(),
            Err(_) => return Err(AppError::Internal("settings lock poisoned".to_string())),
        }
        Ok(settings)
    }

    fn settings_snapshot(&self) -> EngineSettings {
        self.coordinator.settings_snapshot()
    }

    fn require_dashboard(&self, dashboard_id: i64) -> AppResult<Dashboard> {
        self.db
            .get_dashboard(dashboard_id)?
            .ok_or_else(|| AppError::NotFound(format!("Dashboard not found: {}", dashboard_id)))
    }

    /// Restores `next_scheduled_at` for dashboards where it disagrees with the stored
    /// policy: set while unscheduled, or missing while scheduled.
    fn repair_schedules(&self) -> AppResult<usize> {
        let now = Utc::now();
        let mut repaired = 0usize;
        for dashboard in self.db.list_dashboards()? {
            let scheduled = dashboard.cache_enabled && dashboard.schedule_frequency != ScheduleFrequency::Never;
            let consistent = scheduled == dashboard.next_scheduled_at.is_some();
            if consistent {
                continue;
            }
            let next = match compute_next_run(&dashboard.schedule_policy(), now) {
                Ok(next) => next,
                Err(error) => {
                    tracing::warn!(dashboard_id = dashboard.id, error = %error, "stored schedule is invalid");
                    None
                }
            };
            if next != dashboard.next_scheduled_at {
                self.db.set_next_scheduled_at(dashboard.id, next)?;
                repaired += 1;
            }
        }
        if repaired > 0 {
            tracing::info!(count = repaired, "repaired dashboard schedules on startup");
        }
        Ok(repaired)
    }
}

fn schedule_view(dashboard: &Dashboard) -> DashboardSchedule {
    let (day, hour, minute) = describe_preset(dashboard.schedule_frequency, dashboard.schedule_cron.as_deref());
    DashboardSchedule {
        cache_enabled: dashboard.cache_enabled,
        frequency: dashboard.schedule_frequency,
        cron: dashboard.schedule_cron.clone(),
        timezone: dashboard.schedule_timezone.clone(),
        day,
        hour,
        minute,
        next_scheduled_at: dashboard.next_scheduled_at,
    }
}
