use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleFrequency {
    Weekly,
    Daily,
    Custom,
    #[default]
    Never,
}

impl ScheduleFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weekly => "Weekly",
            Self::Daily => "Daily",
            Self::Custom => "Custom",
            Self::Never => "Never",
        }
    }
}

/// Day of week for the Weekly preset. Cron numbering starts at Sunday = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScheduleDay {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl ScheduleDay {
    pub const ALL: [ScheduleDay; 7] = [
        Self::Sun,
        Self::Mon,
        Self::Tue,
        Self::Wed,
        Self::Thu,
        Self::Fri,
        Self::Sat,
    ];

    pub fn cron_index(self) -> u32 {
        match self {
            Self::Sun => 0,
            Self::Mon => 1,
            Self::Tue => 2,
            Self::Wed => 3,
            Self::Thu => 4,
            Self::Fri => 5,
            Self::Sat => 6,
        }
    }

    pub fn from_cron_index(index: u32) -> Option<Self> {
        // 7 is an accepted alias for Sunday in cron
        if index == 7 {
            return Some(Self::Sun);
        }
        Self::ALL.get(index as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheRefreshStatus {
    InProgress,
    Success,
    Failed,
}

impl CacheRefreshStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshReason {
    Scheduled,
    Manual,
    Override,
}

impl RefreshReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::Override => "override",
        }
    }
}

/// The enable flag, frequency, cron and timezone that govern automatic refresh timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePolicy {
    pub cache_enabled: bool,
    pub frequency: ScheduleFrequency,
    pub cron: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub cache_enabled: bool,
    pub schedule_frequency: ScheduleFrequency,
    pub schedule_cron: Option<String>,
    pub schedule_timezone: Option<String>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dashboard {
    pub fn schedule_policy(&self) -> SchedulePolicy {
        SchedulePolicy {
            cache_enabled: self.cache_enabled,
            frequency: self.schedule_frequency,
            cron: self.schedule_cron.clone(),
            timezone: self.schedule_timezone.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLayout {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Default for ItemLayout {
    fn default() -> Self {
        Self { x: 0, y: 0, w: 3, h: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetail {
    pub sql: String,
    #[serde(default)]
    pub chart_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardItem {
    pub id: i64,
    pub dashboard_id: i64,
    pub r#type: String,
    pub layout: ItemLayout,
    pub detail: ItemDetail,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRefreshRecord {
    pub id: i64,
    pub hash: String,
    pub dashboard_id: i64,
    pub dashboard_item_id: Option<i64>,
    pub status: CacheRefreshStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTarget {
    pub dashboard_id: i64,
    pub dashboard_item_id: Option<i64>,
}

impl RefreshTarget {
    pub fn dashboard(dashboard_id: i64) -> Self {
        Self {
            dashboard_id,
            dashboard_item_id: None,
        }
    }

    pub fn item(dashboard_id: i64, item_id: i64) -> Self {
        Self {
            dashboard_id,
            dashboard_item_id: Some(item_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub r#type: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub data: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    /// True when a still-valid result made recomputation unnecessary.
    pub skipped: bool,
    pub refresh: CacheRefreshRecord,
    pub result: Option<QueryResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    pub data: QueryResult,
    pub cache_hit: bool,
    pub cache_created_at: Option<DateTime<Utc>>,
    pub cache_overrode_at: Option<DateTime<Utc>>,
    pub r#override: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDashboardSchedulePayload {
    pub cache_enabled: bool,
    #[serde(default)]
    pub frequency: ScheduleFrequency,
    pub cron: Option<String>,
    pub timezone: Option<String>,
    pub day: Option<ScheduleDay>,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSchedule {
    pub cache_enabled: bool,
    pub frequency: ScheduleFrequency,
    pub cron: Option<String>,
    pub timezone: Option<String>,
    pub day: Option<ScheduleDay>,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDashboardItemPayload {
    pub dashboard_id: i64,
    pub r#type: String,
    pub sql: String,
    pub chart_schema: Option<serde_json::Value>,
    pub layout: Option<ItemLayout>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemLayoutUpdate {
    pub item_id: i64,
    pub layout: ItemLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub poll_interval_seconds: u64,
    pub execution_timeout_seconds: u64,
    pub preview_default_limit: u32,
    pub default_timezone: String,
    pub scheduler_enabled: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            execution_timeout_seconds: 300,
            preview_default_limit: 500,
            default_timezone: "UTC".to_string(),
            scheduler_enabled: true,
        }
    }
}

impl EngineSettings {
    /// Rejects values that would break scheduling or execution once stored.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_timezone.trim().parse::<chrono_tz::Tz>().is_err() {
            return Err(format!("Unknown default timezone '{}'", self.default_timezone));
        }
        if self.preview_default_limit == 0 {
            return Err("previewDefaultLimit must be at least 1".to_string());
        }
        if self.execution_timeout_seconds == 0 {
            return Err("executionTimeoutSeconds must be at least 1".to_string());
        }
        if self.poll_interval_seconds == 0 {
            return Err("pollIntervalSeconds must be at least 1".to_string());
        }
        Ok(())
    }
}
