use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};

use crate::db::Database;
use crate::models::{RunRecord, RunStatus, Schedule, ScheduleDraft, SecretRef};
use crate::utils::{AppError, AppResult};

const SCHEDULE_COLUMNS: &str = "id, user_identity, environment_id, org_url, enabled, day_of_week,
     time_utc, timezone, client_id, client_secret_ref, tenant_id,
     last_run_at, last_run_status, last_run_result";

fn row_to_schedule(row: &Row) -> rusqlite::Result<Schedule> {
    let last_run_at: Option<String> = row.get(11)?;
    let last_run_status: Option<String> = row.get(12)?;
    Ok(Schedule {
        id: row.get(0)?,
        user_identity: row.get(1)?,
        environment_id: row.get(2)?,
        org_url: row.get(3)?,
        enabled: row.get(4)?,
        day_of_week: row.get(5)?,
        time_utc: row.get(6)?,
        timezone: row.get(7)?,
        client_id: row.get(8)?,
        client_secret_ref: SecretRef::new(row.get::<_, String>(9)?),
        tenant_id: row.get(10)?,
        last_run_at: last_run_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        last_run_status: last_run_status.as_deref().and_then(RunStatus::from_str),
        last_run_result: row.get(13)?,
    })
}

impl Database {
    pub fn get_due_schedules(&self, day_of_week: u8, time_utc: &str) -> AppResult<Vec<Schedule>> {
        let sql = format!(
            "SELECT {} FROM update_schedules
             WHERE enabled = 1 AND day_of_week = ?1 AND time_utc = ?2
             ORDER BY id",
            SCHEDULE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let schedules = stmt
            .query_map(rusqlite::params![day_of_week, time_utc], row_to_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }

    pub fn get_schedule(&self, user_identity: &str, environment_id: &str) -> AppResult<Option<Schedule>> {
        let sql = format!(
            "SELECT {} FROM update_schedules WHERE user_identity = ?1 AND environment_id = ?2",
            SCHEDULE_COLUMNS
        );
        let schedule = self
            .conn
            .query_row(&sql, [user_identity, environment_id], row_to_schedule)
            .optional()?;
        Ok(schedule)
    }

    /// Insert or update configuration fields only; last-run fields are untouched.
    pub fn upsert_schedule(&self, draft: &ScheduleDraft) -> AppResult<Schedule> {
        self.conn.execute(
            "INSERT INTO update_schedules
                (user_identity, environment_id, org_url, enabled, day_of_week, time_utc,
                 timezone, client_id, client_secret_ref, tenant_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(user_identity, environment_id) DO UPDATE SET
                org_url = excluded.org_url,
                enabled = excluded.enabled,
                day_of_week = excluded.day_of_week,
                time_utc = excluded.time_utc,
                timezone = excluded.timezone,
                client_id = excluded.client_id,
                client_secret_ref = excluded.client_secret_ref,
                tenant_id = excluded.tenant_id,
                updated_at = datetime('now')",
            rusqlite::params![
                draft.user_identity,
                draft.environment_id,
                draft.org_url,
                draft.enabled,
                draft.day_of_week,
                draft.time_utc,
                draft.timezone,
                draft.client_id,
                draft.client_secret_ref.as_str(),
                draft.tenant_id,
            ],
        )?;
        self.get_schedule(&draft.user_identity, &draft.environment_id)?
            .ok_or_else(|| AppError::Store("schedule vanished after upsert".into()))
    }

    pub fn record_schedule_run(&self, schedule_id: i64, run: &RunRecord) -> AppResult<()> {
        let changed = self.conn.execute(
            "UPDATE update_schedules
             SET last_run_at = ?1, last_run_status = ?2, last_run_result = ?3
             WHERE id = ?4",
            rusqlite::params![
                run.last_run_at.to_rfc3339(),
                run.last_run_status.as_str(),
                run.last_run_result,
                schedule_id
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("schedule {}", schedule_id)));
        }
        Ok(())
    }

    pub fn disable_schedule(&self, schedule_id: i64) -> AppResult<()> {
        let changed = self.conn.execute(
            "UPDATE update_schedules SET enabled = 0, updated_at = datetime('now') WHERE id = ?1",
            [schedule_id],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("schedule {}", schedule_id)));
        }
        Ok(())
    }
}
