use crate::db::Database;
use crate::utils::AppResult;

const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    "
    CREATE TABLE IF NOT EXISTS update_schedules (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        user_identity       TEXT NOT NULL,
        environment_id      TEXT NOT NULL,
        org_url             TEXT NOT NULL,
        enabled             INTEGER NOT NULL DEFAULT 1,
        day_of_week         INTEGER NOT NULL,
        time_utc            TEXT NOT NULL,
        timezone            TEXT NOT NULL DEFAULT 'UTC',
        client_id           TEXT NOT NULL,
        client_secret_ref   TEXT NOT NULL,
        tenant_id           TEXT NOT NULL,
        last_run_at         TEXT,
        last_run_status     TEXT,
        last_run_result     TEXT,
        created_at          TEXT DEFAULT (datetime('now')),
        updated_at          TEXT DEFAULT (datetime('now')),
        UNIQUE(user_identity, environment_id)
    );

    CREATE TABLE IF NOT EXISTS usage_logs (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp       TEXT NOT NULL,
        user_identity   TEXT NOT NULL,
        org_url         TEXT NOT NULL,
        success_count   INTEGER NOT NULL DEFAULT 0,
        fail_count      INTEGER NOT NULL DEFAULT 0,
        app_names       TEXT NOT NULL DEFAULT '[]'
    );

    CREATE TABLE IF NOT EXISTS settings (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  TEXT DEFAULT (datetime('now'))
    );

    CREATE INDEX IF NOT EXISTS idx_usage_logs_timestamp ON usage_logs(timestamp);
    ",
    // Migration 2: Due-slot lookup index
    "
    CREATE INDEX IF NOT EXISTS idx_update_schedules_slot
        ON update_schedules(enabled, day_of_week, time_utc);
    ",
    // Migration 3: Record whether a usage row came from the scheduled runner
    "
    ALTER TABLE usage_logs ADD COLUMN triggered_by TEXT NOT NULL DEFAULT 'interactive';
    ",
];

pub fn run_migrations(db: &mut Database) -> AppResult<()> {
    db.conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let applied: i64 = db
        .conn
        .query_row("SELECT COALESCE(MAX(id), 0) FROM _migrations", [], |row| {
            row.get(0)
        })?;

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i64;
        if version > applied {
            db.conn.execute_batch(migration)?;
            db.conn.execute("INSERT INTO _migrations (id) VALUES (?1)", [version])?;
            log::info!("Applied migration {}", version);
        }
    }

    Ok(())
}
