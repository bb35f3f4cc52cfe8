pub mod migrations;
pub mod schedule_repo;
pub mod settings_repo;
pub mod usage_repo;

use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{RunRecord, Schedule, ScheduleDraft, UsageRecord};
use crate::store::{ScheduleStore, UsageStore};
use crate::utils::AppResult;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn new(db_path: &Path) -> AppResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let mut db = Self { conn };
        migrations::run_migrations(&mut db)?;
        log::info!("Opened database at {}", db_path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        migrations::run_migrations(&mut db)?;
        Ok(db)
    }
}

/// Single-host store over the local database.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn append_usage(&self, record: &UsageRecord) -> AppResult<()> {
        let db = self.db.lock().await;
        db.insert_usage(record)?;
        Ok(())
    }

    async fn list_usage(&self, limit: usize) -> AppResult<Vec<UsageRecord>> {
        let db = self.db.lock().await;
        db.get_usage(limit)
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn due_schedules(&self, day_of_week: u8, time_utc: &str) -> AppResult<Vec<Schedule>> {
        let db = self.db.lock().await;
        db.get_due_schedules(day_of_week, time_utc)
    }

    async fn record_run(&self, schedule_id: i64, run: &RunRecord) -> AppResult<()> {
        let db = self.db.lock().await;
        db.record_schedule_run(schedule_id, run)
    }

    async fn upsert_schedule(&self, draft: &ScheduleDraft) -> AppResult<Schedule> {
        let db = self.db.lock().await;
        db.upsert_schedule(draft)
    }

    async fn schedule_for(&self, user_identity: &str, environment_id: &str) -> AppResult<Option<Schedule>> {
        let db = self.db.lock().await;
        db.get_schedule(user_identity, environment_id)
    }

    async fn disable_schedule(&self, schedule_id: i64) -> AppResult<()> {
        let db = self.db.lock().await;
        db.disable_schedule(schedule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SecretRef, UsageTrigger};
    use crate::store::save_schedule;
    use chrono::Utc;

    #[tokio::test]
    async fn store_round_trip_through_traits() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        let draft = ScheduleDraft {
            user_identity: "admin@contoso.com".into(),
            environment_id: "env-1".into(),
            org_url: "https://contoso.crm.dynamics.com".into(),
            enabled: true,
            day_of_week: 0,
            time_utc: "00:00".into(),
            timezone: "UTC".into(),
            client_id: "client".into(),
            client_secret_ref: SecretRef::new("env:SECRET"),
            tenant_id: "tenant".into(),
        };
        let saved = save_schedule(&store, &draft).await.unwrap();
        let loaded = store
            .schedule_for("admin@contoso.com", "env-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved, loaded);

        store
            .append_usage(&UsageRecord {
                timestamp: Utc::now(),
                user_identity: "admin@contoso.com".into(),
                org_url: draft.org_url.clone(),
                success_count: 1,
                fail_count: 1,
                app_names: vec!["Sales Hub".into()],
                trigger: UsageTrigger::Interactive,
            })
            .await
            .unwrap();
        assert_eq!(store.list_usage(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected_before_write() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        let draft = ScheduleDraft {
            user_identity: "admin@contoso.com".into(),
            environment_id: "env-1".into(),
            org_url: String::new(),
            enabled: true,
            day_of_week: 9,
            time_utc: "14:00".into(),
            timezone: "UTC".into(),
            client_id: "client".into(),
            client_secret_ref: SecretRef::new("env:SECRET"),
            tenant_id: "tenant".into(),
        };
        assert!(save_schedule(&store, &draft).await.is_err());
        assert!(store.schedule_for("admin@contoso.com", "env-1").await.unwrap().is_none());
    }

    #[test]
    fn reopening_a_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ppupdater.db");
        {
            let db = Database::new(&path).unwrap();
            db.set_setting("marker", "kept").unwrap();
        }
        let db = Database::new(&path).unwrap();
        assert_eq!(db.get_setting("marker").unwrap().as_deref(), Some("kept"));
    }
}
