pub mod rest;

use async_trait::async_trait;
use std::sync::Arc;

use crate::db::{Database, SqliteStore};
use crate::models::{AppSettings, RunRecord, Schedule, ScheduleDraft, StoreBackend, UsageRecord};
use crate::utils::{AppError, AppResult};

/// Append-only usage log.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn append_usage(&self, record: &UsageRecord) -> AppResult<()>;
    /// Most recent first.
    async fn list_usage(&self, limit: usize) -> AppResult<Vec<UsageRecord>>;
}

/// Schedule definitions. The interactive client writes configuration through
/// `upsert_schedule`/`disable_schedule`; only the runner calls `record_run`.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn due_schedules(&self, day_of_week: u8, time_utc: &str) -> AppResult<Vec<Schedule>>;
    async fn record_run(&self, schedule_id: i64, run: &RunRecord) -> AppResult<()>;
    async fn upsert_schedule(&self, draft: &ScheduleDraft) -> AppResult<Schedule>;
    async fn schedule_for(&self, user_identity: &str, environment_id: &str) -> AppResult<Option<Schedule>>;
    async fn disable_schedule(&self, schedule_id: i64) -> AppResult<()>;
}

/// Both tables behind one handle.
pub struct Stores {
    pub schedules: Arc<dyn ScheduleStore>,
    pub usage: Arc<dyn UsageStore>,
}

/// Open the configured persistence backend.
pub fn open_stores(settings: &AppSettings, http: &reqwest::Client) -> AppResult<Stores> {
    match settings.store_backend {
        StoreBackend::Rest => {
            let url = settings
                .store_url
                .clone()
                .ok_or_else(|| AppError::Config("storeUrl is not configured".into()))?;
            let store = Arc::new(rest::RestStore::new(http.clone(), url, settings.store_api_key.clone()));
            Ok(Stores {
                schedules: store.clone(),
                usage: store,
            })
        }
        StoreBackend::Sqlite => {
            let path = settings.resolved_database_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = Arc::new(SqliteStore::new(Database::new(&path)?));
            Ok(Stores {
                schedules: store.clone(),
                usage: store,
            })
        }
    }
}

/// Insert or update the schedule for the draft's user and environment after validation.
pub async fn save_schedule(store: &dyn ScheduleStore, draft: &ScheduleDraft) -> AppResult<Schedule> {
    draft.validate()?;
    let schedule = store.upsert_schedule(draft).await?;
    log::info!(
        "Saved schedule {} for {} in {} (day {}, {} UTC, enabled: {})",
        schedule.id,
        schedule.user_identity,
        schedule.environment_id,
        schedule.day_of_week,
        schedule.time_utc,
        schedule.enabled
    );
    Ok(schedule)
}
