use chrono::Utc;
use dashboard_cache_lib::{
    AppError, CacheEngine, CacheRefreshStatus, CreateDashboardItemPayload, QueryContext, QueryExecutor, QueryResult,
    ScheduleFrequency, SetDashboardSchedulePayload, SqliteSourceExecutor,
};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct CountingExecutor {
    inner: SqliteSourceExecutor,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl QueryExecutor for CountingExecutor {
    async fn execute(&self, sql: &str, context: &QueryContext) -> dashboard_cache_lib::AppResult<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(sql, context).await
    }

    fn cancel(&self, context: &QueryContext) {
        self.inner.cancel(context);
    }
}

fn seed_source(dir: &Path) -> PathBuf {
    let path = dir.join("warehouse.db");
    let conn = Connection::open(&path).expect("open source");
    conn.execute_batch(
        "CREATE TABLE sales (id INTEGER PRIMARY KEY, region TEXT NOT NULL, amount REAL NOT NULL);
         INSERT INTO sales (region, amount) VALUES ('emea', 120.0), ('emea', 30.5), ('apac', 99.0), ('amer', 12.0);",
    )
    .expect("seed source");
    path
}

fn item(dashboard_id: i64, sql: &str) -> CreateDashboardItemPayload {
    CreateDashboardItemPayload {
        dashboard_id,
        r#type: "BAR".to_string(),
        sql: sql.to_string(),
        chart_schema: Some(serde_json::json!({ "x": "region", "y": "total" })),
        layout: None,
        display_name: Some("Sales by region".to_string()),
    }
}

#[tokio::test]
async fn preview_is_cached_until_overridden() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = seed_source(dir.path());
    let executor = Arc::new(CountingExecutor {
        inner: SqliteSourceExecutor::new(&source),
        calls: AtomicUsize::new(0),
    });
    let engine = CacheEngine::new(dir.path().join("data"), executor.clone()).expect("engine");

    let dashboard = engine.create_dashboard(42, Some("Sales")).expect("dashboard");
    engine
        .set_dashboard_schedule(
            dashboard.id,
            SetDashboardSchedulePayload {
                cache_enabled: true,
                frequency: ScheduleFrequency::Daily,
                hour: Some(3),
                ..SetDashboardSchedulePayload::default()
            },
        )
        .expect("schedule");
    let chart = engine
        .create_dashboard_item(item(
            dashboard.id,
            "SELECT region, SUM(amount) AS total FROM sales GROUP BY region ORDER BY region",
        ))
        .expect("item");

    let first = engine.preview_item_sql(chart.id, None, false).await.expect("first");
    assert!(!first.cache_hit);
    assert_eq!(first.data.data.len(), 3);
    assert_eq!(first.data.columns[0].name, "region");
    assert_eq!(first.data.columns[1].r#type, "REAL");

    let second = engine.preview_item_sql(chart.id, None, false).await.expect("second");
    assert!(second.cache_hit);
    assert_eq!(second.data, first.data);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    let forced = engine.preview_item_sql(chart.id, None, true).await.expect("forced");
    assert!(forced.r#override);
    assert!(forced.cache_overrode_at.expect("override time") <= Utc::now());
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    let history = engine.list_refresh_history(dashboard.id, 10).expect("history");
    assert_eq!(history.len(), 2);
    assert!(history
        .iter()
        .all(|record| record.status == CacheRefreshStatus::Success));
}

#[tokio::test]
async fn broken_sql_is_recorded_as_failed_refresh() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = seed_source(dir.path());
    let engine = CacheEngine::new(
        dir.path().join("data"),
        Arc::new(SqliteSourceExecutor::new(&source)),
    )
    .expect("engine");

    let dashboard = engine.create_dashboard(42, None).expect("dashboard");
    let chart = engine
        .create_dashboard_item(item(dashboard.id, "SELECT missing_column FROM sales"))
        .expect("item");

    let err = engine.refresh_item(chart.id, false).await.expect_err("should fail");
    assert!(matches!(err, AppError::QueryExecution(_)));
    assert!(err.to_string().starts_with("QUERY_EXECUTION:"));

    let history = engine.list_refresh_history(dashboard.id, 10).expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, CacheRefreshStatus::Failed);
    assert!(history[0].error_message.is_some());
}

#[tokio::test]
async fn scheduler_tick_refreshes_due_dashboards_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = seed_source(dir.path());
    let data_dir = dir.path().join("data");

    let dashboard_id = {
        let engine = CacheEngine::new(data_dir.clone(), Arc::new(SqliteSourceExecutor::new(&source)))
            .expect("engine");
        let dashboard = engine.create_dashboard(7, None).expect("dashboard");
        engine
            .create_dashboard_item(item(dashboard.id, "SELECT COUNT(*) AS n FROM sales"))
            .expect("item");
        engine
            .set_dashboard_schedule(
                dashboard.id,
                SetDashboardSchedulePayload {
                    cache_enabled: true,
                    frequency: ScheduleFrequency::Custom,
                    cron: Some("*/5 * * * *".to_string()),
                    timezone: Some("Europe/Berlin".to_string()),
                    ..SetDashboardSchedulePayload::default()
                },
            )
            .expect("schedule");
        dashboard.id
    };

    let engine = CacheEngine::new(data_dir, Arc::new(SqliteSourceExecutor::new(&source))).expect("reopen");
    let schedule = engine.get_dashboard_schedule(dashboard_id).expect("schedule");
    let next = schedule.next_scheduled_at.expect("next run");

    // Nothing is due before the next occurrence.
    assert!(engine
        .scheduler()
        .tick(next - chrono::Duration::seconds(1))
        .expect("tick")
        .is_empty());

    let handles = engine.scheduler().tick(next).expect("tick");
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.await.expect("join");
    }

    let history = engine.list_refresh_history(dashboard_id, 10).expect("history");
    assert_eq!(history.len(), 2);
    assert!(history.iter().any(|record| record.dashboard_item_id.is_none()));
    assert!(history
        .iter()
        .all(|record| record.status == CacheRefreshStatus::Success));
}
