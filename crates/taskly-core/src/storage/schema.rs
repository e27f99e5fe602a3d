//! SQLite schema for the local store
//!
//! One table per synchronized collection. Each table has a primary key on `id`
//! and secondary indexes on the columns the coordinators filter by.
//! Timestamps are stored as UTC milliseconds, enums as their string form.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            created_at INTEGER NOT NULL,
            due_date INTEGER,
            completed_at INTEGER,
            priority TEXT NOT NULL,
            status TEXT NOT NULL,
            project_id TEXT,
            user_id TEXT,
            needs_sync INTEGER NOT NULL DEFAULT 0,
            day_reminder INTEGER NOT NULL DEFAULT 1,
            hour_reminder INTEGER NOT NULL DEFAULT 1,
            minute_reminder INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            created_at INTEGER NOT NULL,
            due_date INTEGER,
            color TEXT,
            user_id TEXT,
            needs_sync INTEGER NOT NULL DEFAULT 0,
            day_reminder INTEGER NOT NULL DEFAULT 1,
            hour_reminder INTEGER NOT NULL DEFAULT 1,
            minute_reminder INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY NOT NULL,
            message TEXT NOT NULL,
            title TEXT,
            timestamp INTEGER NOT NULL,
            type TEXT NOT NULL,
            category TEXT NOT NULL,
            entity_id TEXT,
            project_id TEXT,
            user_id TEXT,
            needs_sync INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        CREATE INDEX IF NOT EXISTS idx_tasks_project_id ON tasks(project_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_needs_sync ON tasks(needs_sync);

        CREATE INDEX IF NOT EXISTS idx_projects_user_id ON projects(user_id);
        CREATE INDEX IF NOT EXISTS idx_projects_needs_sync ON projects(needs_sync);

        CREATE INDEX IF NOT EXISTS idx_notifications_user_id ON notifications(user_id);
        CREATE INDEX IF NOT EXISTS idx_notifications_timestamp ON notifications(timestamp);
        CREATE INDEX IF NOT EXISTS idx_notifications_needs_sync ON notifications(needs_sync);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
