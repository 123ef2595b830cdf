use crate::coordinator::{RefreshCoordinator, SharedSettings};
use crate::db::Database;
use crate::errors::AppResult;
use crate::models::{RefreshReason, RefreshTarget};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Polls for due dashboards and hands each one to the coordinator on its own task.
#[derive(Clone)]
pub struct Scheduler {
    db: Arc<Database>,
    coordinator: RefreshCoordinator,
    settings: SharedSettings,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl Scheduler {
    pub fn new(db: Arc<Database>, coordinator: RefreshCoordinator, settings: SharedSettings) -> Self {
        Self {
            db,
            coordinator,
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let poll_seconds = self.poll_interval_seconds();
        tracing::info!(poll_seconds, "dashboard scheduler started");
        let mut interval = tokio::time::interval(Duration::from_secs(poll_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !self.enabled() {
                continue;
            }
            if let Err(error) = self.tick(Utc::now()) {
                tracing::warn!(error = %error, "scheduler tick failed");
            }
        }
    }

    /// Dispatches every dashboard due at `now` that is not already being refreshed
    /// by this scheduler. Returns the handles of the spawned refreshes.
    pub fn tick(&self, now: DateTime<Utc>) -> AppResult<Vec<JoinHandle<()>>> {
        let due = self.db.find_due_dashboards(now)?;
        let mut handles = Vec::with_capacity(due.len());
        for dashboard in due {
            if !self.claim(dashboard.id) {
                tracing::debug!(dashboard_id = dashboard.id, "scheduled refresh still running");
                continue;
            }

            let scheduler = self.clone();
            let dashboard_id = dashboard.id;
            handles.push(tokio::spawn(async move {
                let result = scheduler
                    .coordinator
                    .refresh(RefreshTarget::dashboard(dashboard_id), RefreshReason::Scheduled)
                    .await;
                match result {
                    Ok(outcome) if outcome.skipped => {
                        tracing::debug!(dashboard_id, "scheduled refresh skipped, cache still valid");
                    }
                    Ok(outcome) => {
                        tracing::info!(dashboard_id, refresh_id = outcome.refresh.id, "scheduled refresh finished");
                    }
                    Err(error) if error.is_execution_failure() => {
                        tracing::warn!(dashboard_id, error = %error, "scheduled refresh failed");
                    }
                    Err(error) => {
                        tracing::warn!(dashboard_id, error = %error, "scheduled refresh could not run");
                    }
                }
                scheduler.release(dashboard_id);
            }));
        }
        Ok(handles)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }

    fn claim(&self, dashboard_id: i64) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert(dashboard_id),
            Err(_) => false,
        }
    }

    fn release(&self, dashboard_id: i64) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&dashboard_id);
        }
    }

    fn poll_interval_seconds(&self) -> u64 {
        self.settings
            .read()
            .map(|settings| settings.poll_interval_seconds)
            .unwrap_or(30)
            .max(1)
    }

    fn enabled(&self) -> bool {
        self.settings
            .read()
            .map(|settings| settings.scheduler_enabled)
            .unwrap_or(true)
    }
}
