use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::models::{UsageRecord, UsageTrigger};
use crate::utils::AppResult;

impl Database {
    pub fn insert_usage(&self, record: &UsageRecord) -> AppResult<i64> {
        let app_names = serde_json::to_string(&record.app_names)?;
        self.conn.execute(
            "INSERT INTO usage_logs
                (timestamp, user_identity, org_url, success_count, fail_count, app_names, triggered_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp.to_rfc3339(),
                record.user_identity,
                record.org_url,
                record.success_count as i64,
                record.fail_count as i64,
                app_names,
                record.trigger.as_str(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_usage(&self, limit: usize) -> AppResult<Vec<UsageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, user_identity, org_url, success_count, fail_count, app_names, triggered_by
             FROM usage_logs
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1",
        )?;

        let records = stmt
            .query_map([limit as i64], |row| {
                let timestamp: String = row.get(0)?;
                let app_names: String = row.get(5)?;
                let trigger: String = row.get(6)?;
                Ok((
                    timestamp,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    app_names,
                    trigger,
                ))
            })?
            .filter_map(|r| match r {
                Ok(row) => Some(row),
                Err(e) => {
                    log::warn!("Skipping unreadable usage row: {}", e);
                    None
                }
            })
            .filter_map(|(timestamp, user_identity, org_url, success, fail, app_names, trigger)| {
                let timestamp = match DateTime::parse_from_rfc3339(&timestamp) {
                    Ok(dt) => dt.with_timezone(&Utc),
                    Err(e) => {
                        log::warn!("Skipping usage row with bad timestamp {:?}: {}", timestamp, e);
                        return None;
                    }
                };
                Some(UsageRecord {
                    timestamp,
                    user_identity,
                    org_url,
                    success_count: success.max(0) as usize,
                    fail_count: fail.max(0) as usize,
                    app_names: serde_json::from_str(&app_names).unwrap_or_default(),
                    trigger: UsageTrigger::from_str(&trigger),
                })
            })
            .collect();

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(day: u32, names: &[&str]) -> UsageRecord {
        UsageRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 3, day, 14, 0, 0).unwrap(),
            user_identity: "admin@contoso.com".into(),
            org_url: "https://contoso.crm.dynamics.com".into(),
            success_count: names.len(),
            fail_count: 0,
            app_names: names.iter().map(|s| s.to_string()).collect(),
            trigger: UsageTrigger::Scheduled,
        }
    }

    #[test]
    fn lists_most_recent_first() {
        let db = Database::open_in_memory().unwrap();
        db.insert_usage(&record(1, &["Sales Hub"])).unwrap();
        db.insert_usage(&record(3, &["Field Service", "Omnichannel"])).unwrap();
        db.insert_usage(&record(2, &[])).unwrap();

        let rows = db.get_usage(2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].app_names, vec!["Field Service", "Omnichannel"]);
        assert_eq!(rows[0].trigger, UsageTrigger::Scheduled);
        assert_eq!(rows[1].timestamp.format("%d").to_string(), "02");
    }

    #[test]
    fn unreadable_rows_are_skipped() {
        let db = Database::open_in_memory().unwrap();
        db.insert_usage(&record(1, &["Sales Hub"])).unwrap();
        db.conn
            .execute(
                "INSERT INTO usage_logs (timestamp, user_identity, org_url, success_count, fail_count, app_names)
                 VALUES ('2026-03-05T00:00:00+00:00', 'u', 'o', 'many', 0, '[]')",
                [],
            )
            .unwrap();
        db.conn
            .execute(
                "INSERT INTO usage_logs (timestamp, user_identity, org_url, success_count, fail_count, app_names)
                 VALUES ('yesterday', 'u', 'o', 1, 0, '[]')",
                [],
            )
            .unwrap();

        let rows = db.get_usage(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].app_names, vec!["Sales Hub"]);
    }
}
