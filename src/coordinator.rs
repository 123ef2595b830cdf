use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::executor::{QueryContext, QueryExecutor};
use crate::models::{
    CacheRefreshRecord, Dashboard, DashboardItem, EngineSettings, QueryResult, RefreshOutcome, RefreshReason,
    RefreshTarget, ScheduleFrequency, SchedulePolicy,
};
use crate::schedule::{compute_next_run, next_occurrence};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};
use tokio::time::Duration;

pub type SharedSettings = Arc<RwLock<EngineSettings>>;

/// Runs single refresh attempts and owns the one-IN_PROGRESS-per-target rule.
#[derive(Clone)]
pub struct RefreshCoordinator {
    db: Arc<Database>,
    executor: Arc<dyn QueryExecutor>,
    settings: SharedSettings,
}

impl RefreshCoordinator {
    pub fn new(db: Arc<Database>, executor: Arc<dyn QueryExecutor>, settings: SharedSettings) -> Self {
        Self { db, executor, settings }
    }

    pub async fn refresh(&self, target: RefreshTarget, reason: RefreshReason) -> AppResult<RefreshOutcome> {
        let dashboard = self
            .db
            .get_dashboard(target.dashboard_id)?
            .ok_or_else(|| AppError::NotFound(format!("Dashboard not found: {}", target.dashboard_id)))?;

        let outcome = match target.dashboard_item_id {
            Some(item_id) => {
                let item = self.load_item(&dashboard, item_id)?;
                self.refresh_item(&dashboard, &item, reason, None).await
            }
            None => self.refresh_dashboard(&dashboard, reason).await,
        };

        // A scheduled run moves the schedule forward whatever happened above.
        if reason == RefreshReason::Scheduled {
            if let Err(error) = self.reschedule(dashboard.id, Utc::now()) {
                tracing::warn!(dashboard_id = dashboard.id, error = %error, "failed to reschedule dashboard");
            }
        }

        outcome
    }

    /// Refreshes one item. `limit` defaults to the configured preview limit, which is
    /// also what scheduled refreshes cache under.
    pub(crate) async fn refresh_item(
        &self,
        dashboard: &Dashboard,
        item: &DashboardItem,
        reason: RefreshReason,
        limit: Option<u32>,
    ) -> AppResult<RefreshOutcome> {
        let now = Utc::now();
        let limit = limit.unwrap_or_else(|| self.settings_snapshot().preview_default_limit);
        let hash = item_hash(dashboard.project_id, &item.detail.sql, limit);

        if reason != RefreshReason::Override {
            if let Some(record) = self.valid_cached_record(dashboard, &hash, now)? {
                if let Some(result) = self.db.get_cached_result(record.id)? {
                    tracing::debug!(
                        dashboard_id = dashboard.id,
                        item_id = item.id,
                        refresh_id = record.id,
                        "cache still valid, skipping refresh"
                    );
                    return Ok(RefreshOutcome {
                        skipped: true,
                        refresh: record,
                        result: Some(result),
                    });
                }
            }
        }

        let mut slot = self.acquire_slot(RefreshTarget::item(dashboard.id, item.id), &hash, now)?;
        let context = QueryContext::new(dashboard.project_id, dashboard.id, Some(item.id), limit);
        tracing::info!(
            dashboard_id = dashboard.id,
            item_id = item.id,
            refresh_id = slot.refresh_id(),
            query_id = %context.query_id,
            reason = reason.as_str(),
            "refreshing dashboard item"
        );

        match self.execute_with_timeout(&item.detail.sql, &context).await {
            Ok(result) => {
                let refresh = slot.complete(Some(&result))?;
                Ok(RefreshOutcome {
                    skipped: false,
                    refresh,
                    result: Some(result),
                })
            }
            Err(error) => {
                tracing::warn!(
                    dashboard_id = dashboard.id,
                    item_id = item.id,
                    refresh_id = slot.refresh_id(),
                    error = %error,
                    "dashboard item refresh failed"
                );
                slot.fail(&error.to_string())?;
                Err(error)
            }
        }
    }

    async fn refresh_dashboard(&self, dashboard: &Dashboard, reason: RefreshReason) -> AppResult<RefreshOutcome> {
        let now = Utc::now();
        let limit = self.settings_snapshot().preview_default_limit;
        let items = self.db.list_dashboard_items(dashboard.id)?;
        let hash = dashboard_hash(dashboard.project_id, &items, limit);

        if reason != RefreshReason::Override {
            if let Some(record) = self.valid_cached_record(dashboard, &hash, now)? {
                return Ok(RefreshOutcome {
                    skipped: true,
                    refresh: record,
                    result: None,
                });
            }
        }

        let mut slot = self.acquire_slot(RefreshTarget::dashboard(dashboard.id), &hash, now)?;
        tracing::info!(
            dashboard_id = dashboard.id,
            refresh_id = slot.refresh_id(),
            items = items.len(),
            reason = reason.as_str(),
            "refreshing dashboard"
        );

        let mut failures = Vec::new();
        for item in &items {
            match self.refresh_item(dashboard, item, reason, Some(limit)).await {
                Ok(_) => {}
                Err(AppError::RefreshInProgress(_)) => {
                    tracing::debug!(dashboard_id = dashboard.id, item_id = item.id, "item already refreshing");
                }
                Err(error) => failures.push(format!("item {}: {}", item.id, error)),
            }
        }

        if failures.is_empty() {
            let refresh = slot.complete(None)?;
            return Ok(RefreshOutcome {
                skipped: false,
                refresh,
                result: None,
            });
        }

        let message = format!(
            "{} of {} items failed: {}",
            failures.len(),
            items.len(),
            failures.join("; ")
        );
        slot.fail(&message)?;
        Err(AppError::QueryExecution(message))
    }

    /// Runs SQL without touching the refresh log. Used when the cache is disabled or
    /// the item's slot is busy.
    pub(crate) async fn run_live(&self, dashboard: &Dashboard, item: &DashboardItem, limit: u32) -> AppResult<QueryResult> {
        let context = QueryContext::new(dashboard.project_id, dashboard.id, Some(item.id), limit);
        tracing::debug!(dashboard_id = dashboard.id, item_id = item.id, query_id = %context.query_id, "running live query");
        self.execute_with_timeout(&item.detail.sql, &context).await
    }

    /// Latest SUCCESS record for `hash` if the dashboard's schedule has not come due since.
    pub(crate) fn valid_cached_record(
        &self,
        dashboard: &Dashboard,
        hash: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<CacheRefreshRecord>> {
        if !dashboard.cache_enabled {
            return Ok(None);
        }
        let Some(record) = self.db.find_latest_success_by_hash(hash)? else {
            return Ok(None);
        };
        if is_cache_valid(&dashboard.schedule_policy(), &record, now) {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    pub fn reschedule(&self, dashboard_id: i64, now: DateTime<Utc>) -> AppResult<Option<DateTime<Utc>>> {
        let Some(dashboard) = self.db.get_dashboard(dashboard_id)? else {
            return Ok(None);
        };
        let next = match compute_next_run(&dashboard.schedule_policy(), now) {
            Ok(next) => next,
            Err(error) => {
                tracing::warn!(dashboard_id, error = %error, "stored schedule is invalid, disabling automatic refresh");
                None
            }
        };
        self.db.set_next_scheduled_at(dashboard_id, next)?;
        tracing::debug!(dashboard_id, next_scheduled_at = ?next, "dashboard rescheduled");
        Ok(next)
    }

    pub(crate) fn load_item(&self, dashboard: &Dashboard, item_id: i64) -> AppResult<DashboardItem> {
        let item = self
            .db
            .get_dashboard_item(item_id)?
            .ok_or_else(|| AppError::NotFound(format!("Dashboard item not found: {}", item_id)))?;
        if item.dashboard_id != dashboard.id {
            return Err(AppError::NotFound(format!(
                "Dashboard item {} does not belong to dashboard {}",
                item_id, dashboard.id
            )));
        }
        Ok(item)
    }

    pub(crate) fn settings_snapshot(&self) -> EngineSettings {
        self.settings
            .read()
            .map(|settings| settings.clone())
            .unwrap_or_default()
    }

    fn acquire_slot(&self, target: RefreshTarget, hash: &str, now: DateTime<Utc>) -> AppResult<RefreshSlot> {
        match self.db.try_start_refresh(target, hash, now)? {
            Some(record) => Ok(RefreshSlot::new(self.db.clone(), record)),
            None => {
                let holder = self
                    .db
                    .find_in_progress_refresh(target)?
                    .map(|record| format!(" (refresh {})", record.id))
                    .unwrap_or_default();
                Err(AppError::RefreshInProgress(match target.dashboard_item_id {
                    Some(item_id) => format!(
                        "A refresh is already running for item {} of dashboard {}{}",
                        item_id, target.dashboard_id, holder
                    ),
                    None => format!(
                        "A refresh is already running for dashboard {}{}",
                        target.dashboard_id, holder
                    ),
                }))
            }
        }
    }

    async fn execute_with_timeout(&self, sql: &str, context: &QueryContext) -> AppResult<QueryResult> {
        let timeout_seconds = self.settings_snapshot().execution_timeout_seconds;
        let timeout = Duration::from_secs(timeout_seconds);
        match tokio::time::timeout(timeout, self.executor.execute(sql, context)).await {
            Ok(result) => result,
            Err(_) => {
                self.executor.cancel(context);
                Err(AppError::Timeout(format!(
                    "Query exceeded the execution timeout of {}s",
                    timeout_seconds
                )))
            }
        }
    }
}

/// An acquired refresh slot. Dropping it without finalizing marks the row FAILED so an
/// abandoned attempt cannot hold the slot until the next restart.
struct RefreshSlot {
    db: Arc<Database>,
    record: CacheRefreshRecord,
    finalized: bool,
}

impl RefreshSlot {
    fn new(db: Arc<Database>, record: CacheRefreshRecord) -> Self {
        Self {
            db,
            record,
            finalized: false,
        }
    }

    fn refresh_id(&self) -> i64 {
        self.record.id
    }

    fn complete(&mut self, result: Option<&QueryResult>) -> AppResult<CacheRefreshRecord> {
        let completed = match self.db.complete_refresh(self.record.id, Utc::now(), result) {
            Ok(completed) => completed,
            Err(error) => {
                if let Err(fail_error) = self.fail(&format!("Failed to store refresh result: {}", error)) {
                    tracing::warn!(refresh_id = self.record.id, error = %fail_error, "failed to release refresh slot");
                }
                return Err(error);
            }
        };
        self.finalized = true;
        if !completed {
            return Err(AppError::Internal(format!(
                "Refresh {} was finalized or removed before it completed",
                self.record.id
            )));
        }
        self.db
            .get_refresh(self.record.id)?
            .ok_or_else(|| AppError::NotFound(format!("Refresh record not found: {}", self.record.id)))
    }

    fn fail(&mut self, error_message: &str) -> AppResult<()> {
        self.db.fail_refresh(self.record.id, Utc::now(), error_message)?;
        self.finalized = true;
        Ok(())
    }
}

impl Drop for RefreshSlot {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if let Err(error) = self
            .db
            .fail_refresh(self.record.id, Utc::now(), "Refresh abandoned before completion")
        {
            tracing::warn!(refresh_id = self.record.id, error = %error, "failed to release abandoned refresh slot");
        }
    }
}

/// A SUCCESS record stays valid until the schedule next comes due after it started.
/// Caches of unscheduled dashboards stay valid until overridden.
pub fn is_cache_valid(policy: &SchedulePolicy, record: &CacheRefreshRecord, now: DateTime<Utc>) -> bool {
    if policy.frequency == ScheduleFrequency::Never {
        return true;
    }
    match next_occurrence(policy, record.started_at) {
        Ok(Some(next_due)) => next_due > now,
        Ok(None) => true,
        Err(_) => false,
    }
}

pub fn item_hash(project_id: i64, sql: &str, limit: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"item\0");
    hasher.update(project_id.to_le_bytes());
    hasher.update(sql.trim().as_bytes());
    hasher.update(b"\0");
    hasher.update(limit.to_le_bytes());
    hex::encode(hasher.finalize())
}

pub fn dashboard_hash(project_id: i64, items: &[DashboardItem], limit: u32) -> String {
    let mut ordered = items.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|item| item.id);

    let mut hasher = Sha256::new();
    hasher.update(b"dashboard\0");
    hasher.update(project_id.to_le_bytes());
    hasher.update(limit.to_le_bytes());
    for item in ordered {
        hasher.update(item.id.to_le_bytes());
        hasher.update(item.detail.sql.trim().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{is_cache_valid, item_hash, RefreshCoordinator, SharedSettings};
    use crate::db::Database;
    use crate::errors::AppError;
    use crate::executor::mock::MockExecutor;
    use crate::models::{
        CacheRefreshRecord, CacheRefreshStatus, CreateDashboardItemPayload, Dashboard, DashboardItem,
        EngineSettings, RefreshReason, RefreshTarget, ScheduleFrequency, SchedulePolicy,
    };
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::{Arc, RwLock};
    use tokio::sync::Notify;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Arc<Database>,
        executor: Arc<MockExecutor>,
        coordinator: RefreshCoordinator,
        dashboard: Dashboard,
        items: Vec<DashboardItem>,
    }

    fn fixture(executor: MockExecutor, settings: EngineSettings, sqls: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));
        let dashboard = db.create_dashboard(1, "Ops").expect("dashboard");
        let items = sqls
            .iter()
            .map(|sql| {
                db.insert_dashboard_item(&CreateDashboardItemPayload {
                    dashboard_id: dashboard.id,
                    r#type: "TABLE".to_string(),
                    sql: sql.to_string(),
                    chart_schema: None,
                    layout: None,
                    display_name: None,
                })
                .expect("item")
            })
            .collect();
        let executor = Arc::new(executor);
        let settings: SharedSettings = Arc::new(RwLock::new(settings));
        let coordinator = RefreshCoordinator::new(db.clone(), executor.clone(), settings);
        Fixture {
            _dir: dir,
            db,
            executor,
            coordinator,
            dashboard,
            items,
        }
    }

    fn daily_policy() -> SchedulePolicy {
        SchedulePolicy {
            cache_enabled: true,
            frequency: ScheduleFrequency::Daily,
            cron: Some("0 3 * * *".to_string()),
            timezone: Some("UTC".to_string()),
        }
    }

    #[tokio::test]
    async fn second_manual_refresh_is_a_cache_hit() {
        let fx = fixture(MockExecutor::new(), EngineSettings::default(), &["SELECT 1"]);
        let target = RefreshTarget::item(fx.dashboard.id, fx.items[0].id);

        let first = fx.coordinator.refresh(target, RefreshReason::Manual).await.expect("first");
        assert!(!first.skipped);
        assert_eq!(first.refresh.status, CacheRefreshStatus::Success);

        let second = fx.coordinator.refresh(target, RefreshReason::Manual).await.expect("second");
        assert!(second.skipped);
        assert_eq!(second.refresh.id, first.refresh.id);
        assert_eq!(second.result, first.result);
        assert_eq!(fx.executor.execution_count(), 1);
    }

    #[tokio::test]
    async fn override_recomputes_a_valid_cache() {
        let fx = fixture(MockExecutor::new(), EngineSettings::default(), &["SELECT 1"]);
        let target = RefreshTarget::item(fx.dashboard.id, fx.items[0].id);

        let first = fx.coordinator.refresh(target, RefreshReason::Manual).await.expect("first");
        let forced = fx.coordinator.refresh(target, RefreshReason::Override).await.expect("override");
        assert!(!forced.skipped);
        assert_ne!(forced.refresh.id, first.refresh.id);
        assert_eq!(fx.executor.execution_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_refresh_of_same_item_fails_fast() {
        let gate = Arc::new(Notify::new());
        let fx = fixture(MockExecutor::gated(gate.clone()), EngineSettings::default(), &["SELECT 1"]);
        let target = RefreshTarget::item(fx.dashboard.id, fx.items[0].id);

        let first = fx.coordinator.refresh(target, RefreshReason::Scheduled);
        let second = async {
            let result = fx.coordinator.refresh(target, RefreshReason::Manual).await;
            gate.notify_one();
            result
        };
        let (first, second) = tokio::join!(first, second);

        let first = first.expect("first refresh proceeds");
        assert_eq!(first.refresh.status, CacheRefreshStatus::Success);
        assert!(matches!(second, Err(AppError::RefreshInProgress(_))));
        assert_eq!(fx.executor.execution_count(), 1);

        let history = fx.db.list_refreshes(fx.dashboard.id, 10).expect("history");
        assert_eq!(history.len(), 1);
        assert!(fx.db.find_in_progress_refresh(target).expect("lookup").is_none());
    }

    #[tokio::test]
    async fn executor_failure_is_recorded_and_releases_slot() {
        let executor = MockExecutor::new();
        executor.fail_on("SELECT broken");
        let fx = fixture(executor, EngineSettings::default(), &["SELECT broken"]);
        let target = RefreshTarget::item(fx.dashboard.id, fx.items[0].id);

        let err = fx
            .coordinator
            .refresh(target, RefreshReason::Manual)
            .await
            .expect_err("should fail");
        assert!(matches!(err, AppError::QueryExecution(_)));

        let latest = fx.db.find_latest_refresh(target).expect("lookup").expect("record");
        assert_eq!(latest.status, CacheRefreshStatus::Failed);
        assert!(latest.finished_at.is_some());
        assert!(latest.error_message.unwrap_or_default().contains("source rejected"));

        // No automatic retry, but the next attempt can take the slot.
        assert_eq!(fx.executor.execution_count(), 1);
        let retry = fx.coordinator.refresh(target, RefreshReason::Manual).await;
        assert!(matches!(retry, Err(AppError::QueryExecution(_))));
        assert_eq!(fx.executor.execution_count(), 2);
    }

    #[tokio::test]
    async fn timeout_marks_failed_and_invokes_cancel_hook() {
        let settings = EngineSettings {
            execution_timeout_seconds: 1,
            ..EngineSettings::default()
        };
        let fx = fixture(
            MockExecutor::slow(tokio::time::Duration::from_secs(30)),
            settings,
            &["SELECT pg_sleep(30)"],
        );
        let target = RefreshTarget::item(fx.dashboard.id, fx.items[0].id);

        let err = fx
            .coordinator
            .refresh(target, RefreshReason::Manual)
            .await
            .expect_err("should time out");
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(fx.executor.cancellation_count(), 1);

        let latest = fx.db.find_latest_refresh(target).expect("lookup").expect("record");
        assert_eq!(latest.status, CacheRefreshStatus::Failed);
        assert!(fx.db.find_in_progress_refresh(target).expect("lookup").is_none());
    }

    #[tokio::test]
    async fn dashboard_refresh_aggregates_item_failures() {
        let executor = MockExecutor::new();
        executor.fail_on("SELECT broken");
        let fx = fixture(executor, EngineSettings::default(), &["SELECT ok", "SELECT broken"]);
        let target = RefreshTarget::dashboard(fx.dashboard.id);

        let err = fx
            .coordinator
            .refresh(target, RefreshReason::Manual)
            .await
            .expect_err("one item fails");
        assert!(err.to_string().contains("1 of 2 items failed"));

        let whole = fx.db.find_latest_refresh(target).expect("lookup").expect("record");
        assert_eq!(whole.status, CacheRefreshStatus::Failed);
        assert!(whole.dashboard_item_id.is_none());

        let ok_item = fx
            .db
            .find_latest_refresh(RefreshTarget::item(fx.dashboard.id, fx.items[0].id))
            .expect("lookup")
            .expect("record");
        assert_eq!(ok_item.status, CacheRefreshStatus::Success);
    }

    #[tokio::test]
    async fn failed_result_write_releases_slot() {
        let fx = fixture(MockExecutor::new(), EngineSettings::default(), &["SELECT 1"]);
        let target = RefreshTarget::item(fx.dashboard.id, fx.items[0].id);
        let side = rusqlite::Connection::open(fx.db.path()).expect("second connection");
        side.execute_batch(
            "CREATE TRIGGER reject_results BEFORE INSERT ON dashboard_cache_result
             BEGIN SELECT RAISE(FAIL, 'disk full'); END;",
        )
        .expect("create trigger");

        let err = fx
            .coordinator
            .refresh(target, RefreshReason::Manual)
            .await
            .expect_err("result write fails");
        assert!(err.to_string().contains("disk full"));
        assert!(fx.db.find_in_progress_refresh(target).expect("lookup").is_none());
        let latest = fx.db.find_latest_refresh(target).expect("lookup").expect("record");
        assert_eq!(latest.status, CacheRefreshStatus::Failed);
        assert!(latest
            .error_message
            .unwrap_or_default()
            .contains("Failed to store refresh result"));

        side.execute_batch("DROP TRIGGER reject_results;").expect("drop trigger");
        let retry = fx.coordinator.refresh(target, RefreshReason::Manual).await.expect("retry");
        assert!(!retry.skipped);
        assert_eq!(retry.refresh.status, CacheRefreshStatus::Success);
    }

    #[tokio::test]
    async fn item_deleted_mid_refresh_is_not_reported_as_success() {
        let gate = Arc::new(Notify::new());
        let fx = fixture(MockExecutor::gated(gate.clone()), EngineSettings::default(), &["SELECT 1"]);
        let item_id = fx.items[0].id;
        let target = RefreshTarget::item(fx.dashboard.id, item_id);

        let refresh = fx.coordinator.refresh(target, RefreshReason::Manual);
        let delete = async {
            while fx.executor.execution_count() == 0 {
                tokio::task::yield_now().await;
            }
            assert!(fx.db.delete_dashboard_item(item_id).expect("delete"));
            gate.notify_one();
        };
        let (result, ()) = tokio::join!(refresh, delete);

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert!(fx.db.find_in_progress_refresh(target).expect("lookup").is_none());
    }

    #[tokio::test]
    async fn scheduled_refresh_reschedules_even_when_it_fails() {
        let executor = MockExecutor::new();
        executor.fail_on("SELECT broken");
        let fx = fixture(executor, EngineSettings::default(), &["SELECT broken"]);
        let overdue = Utc::now() - Duration::hours(2);
        fx.db
            .update_dashboard_schedule(fx.dashboard.id, &daily_policy(), Some(overdue))
            .expect("schedule");

        let result = fx
            .coordinator
            .refresh(RefreshTarget::dashboard(fx.dashboard.id), RefreshReason::Scheduled)
            .await;
        assert!(result.is_err());

        let reloaded = fx.db.get_dashboard(fx.dashboard.id).expect("get").expect("exists");
        let next = reloaded.next_scheduled_at.expect("still scheduled");
        assert!(next > Utc::now());
    }

    #[test]
    fn cache_validity_follows_schedule() {
        let policy = daily_policy();
        let record = |started_hour: u32| CacheRefreshRecord {
            id: 1,
            hash: "h".to_string(),
            dashboard_id: 1,
            dashboard_item_id: Some(1),
            status: CacheRefreshStatus::Success,
            started_at: Utc.with_ymd_and_hms(2026, 10, 16, started_hour, 0, 0).unwrap(),
            finished_at: None,
            error_message: None,
        };
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();

        // Computed after today's 03:00 run: valid until tomorrow 03:00.
        assert!(is_cache_valid(&policy, &record(4), now));
        // Computed before today's 03:00 run: stale.
        assert!(!is_cache_valid(&policy, &record(1), now));

        let never = SchedulePolicy {
            frequency: ScheduleFrequency::Never,
            cron: None,
            ..policy
        };
        assert!(is_cache_valid(&never, &record(1), now + Duration::days(365)));
    }

    #[test]
    fn item_hash_depends_on_project_sql_and_limit() {
        let base = item_hash(1, "SELECT 1", 500);
        assert_eq!(base, item_hash(1, "  SELECT 1  ", 500));
        assert_ne!(base, item_hash(2, "SELECT 1", 500));
        assert_ne!(base, item_hash(1, "SELECT 2", 500));
        assert_ne!(base, item_hash(1, "SELECT 1", 100));
    }
}
