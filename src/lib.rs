mod coordinator;
mod db;
mod engine;
mod errors;
mod executor;
mod models;
mod preview;
mod schedule;
mod scheduler;

pub use crate::coordinator::{dashboard_hash, is_cache_valid, item_hash};
pub use crate::engine::CacheEngine;
pub use crate::errors::{AppError, AppResult};
pub use crate::executor::sqlite::SqliteSourceExecutor;
pub use crate::executor::{QueryContext, QueryExecutor};
pub use crate::models::{
    CacheRefreshRecord, CacheRefreshStatus, ColumnMeta, CreateDashboardItemPayload, Dashboard, DashboardItem,
    DashboardSchedule, EngineSettings, ItemDetail, ItemLayout, ItemLayoutUpdate, PreviewResult, QueryResult,
    RefreshOutcome, RefreshReason, RefreshTarget, ScheduleDay, ScheduleFrequency, SchedulePolicy,
    SetDashboardSchedulePayload,
};
pub use crate::schedule::{compute_next_run, describe_preset, preset_cron};
pub use crate::scheduler::Scheduler;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const DATA_DIR_ENV: &str = "DASHBOARD_CACHE_DATA_DIR";
const SOURCE_DB_ENV: &str = "DASHBOARD_CACHE_SOURCE_DB";

/// Runs the engine as a long-lived service: recovers state, starts the scheduler and
/// waits for ctrl-c.
pub async fn run() -> AppResult<()> {
    let data_dir = std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("dashboard-cache-data"));
    std::fs::create_dir_all(&data_dir)?;
    init_tracing(&data_dir)?;

    let source_path = std::env::var_os(SOURCE_DB_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join("source.sqlite"));
    if !source_path.exists() {
        tracing::warn!(path = %source_path.display(), "source database does not exist yet");
    }

    let executor = Arc::new(SqliteSourceExecutor::new(&source_path));
    let engine = CacheEngine::new(data_dir.clone(), executor)?;
    let settings = engine.get_settings()?;
    tracing::info!(
        data_dir = %engine.data_dir().display(),
        source = %source_path.display(),
        scheduler_enabled = settings.scheduler_enabled,
        "dashboard cache engine started"
    );

    let scheduler = engine.start_scheduler();
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    scheduler.abort();
    Ok(())
}

fn init_tracing(data_dir: &Path) -> AppResult<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "engine.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
