use super::{QueryContext, QueryExecutor};
use crate::errors::{AppError, AppResult};
use crate::models::{ColumnMeta, QueryResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Duration;

/// Scriptable executor for unit tests.
#[derive(Default)]
pub struct MockExecutor {
    pub executions: AtomicUsize,
    pub cancellations: AtomicUsize,
    pub failing_sql: Mutex<Vec<String>>,
    pub gate: Option<Arc<Notify>>,
    pub delay: Option<Duration>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_on(&self, sql: &str) {
        if let Ok(mut failing) = self.failing_sql.lock() {
            failing.push(sql.to_string());
        }
    }

    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn cancellation_count(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    async fn execute(&self, sql: &str, context: &QueryContext) -> AppResult<QueryResult> {
        let run = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failing_sql
            .lock()
            .map(|failing| failing.iter().any(|candidate| candidate == sql))
            .unwrap_or(false);
        if failing {
            return Err(AppError::QueryExecution(format!("source rejected: {}", sql)));
        }
        Ok(QueryResult {
            columns: vec![
                ColumnMeta {
                    name: "sql".to_string(),
                    r#type: "TEXT".to_string(),
                },
                ColumnMeta {
                    name: "run".to_string(),
                    r#type: "INTEGER".to_string(),
                },
            ],
            data: vec![vec![serde_json::json!(sql), serde_json::json!(run)]; context.limit.min(3) as usize],
        })
    }

    fn cancel(&self, _context: &QueryContext) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }
}
