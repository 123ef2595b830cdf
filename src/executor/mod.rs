#[cfg(test)]
pub mod mock;
pub mod sqlite;

use crate::errors::AppResult;
use crate::models::QueryResult;
use async_trait::async_trait;

/// Identifies one execution so it can be correlated in logs and canceled.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query_id: String,
    pub project_id: i64,
    pub dashboard_id: i64,
    pub dashboard_item_id: Option<i64>,
    pub limit: u32,
}

impl QueryContext {
    pub fn new(project_id: i64, dashboard_id: i64, dashboard_item_id: Option<i64>, limit: u32) -> Self {
        Self {
            query_id: uuid::Uuid::new_v4().to_string(),
            project_id,
            dashboard_id,
            dashboard_item_id,
            limit,
        }
    }
}

/// Runs SQL against a data source. Failures are reported as `AppError::QueryExecution`.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str, context: &QueryContext) -> AppResult<QueryResult>;

    /// Called when an execution exceeds its timeout. The default does nothing.
    fn cancel(&self, _context: &QueryContext) {}
}
