use rusqlite::Connection;

use crate::error::Result;

/// Table names of one engine's persistence namespace.
#[derive(Debug, Clone)]
pub struct Tables {
    pub jobs: String,
    pub triggers: String,
    pub paused_groups: String,
}

impl Tables {
    /// `prefix` must already be validated as an SQL identifier fragment.
    pub fn new(prefix: &str) -> Self {
        Self {
            jobs: format!("{prefix}JOB_DETAILS"),
            triggers: format!("{prefix}TRIGGERS"),
            paused_groups: format!("{prefix}PAUSED_TRIGGER_GRPS"),
        }
    }
}

/// Initialise the namespace for `prefix` in `conn` (idempotent).
///
/// Several engines can share one database file; each only touches its own
/// prefixed tables.
pub fn init_db(conn: &Connection, prefix: &str) -> Result<Tables> {
    let tables = Tables::new(prefix);
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {jobs} (
            job_name          TEXT    NOT NULL,
            job_group         TEXT    NOT NULL,
            description       TEXT,
            job_data          TEXT    NOT NULL,   -- JSON object
            requests_recovery INTEGER NOT NULL,
            durable           INTEGER NOT NULL,
            created_at        TEXT    NOT NULL,
            PRIMARY KEY (job_name, job_group)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS {triggers} (
            seq           INTEGER PRIMARY KEY AUTOINCREMENT,
            trigger_name  TEXT    NOT NULL,
            trigger_group TEXT    NOT NULL,
            job_name      TEXT    NOT NULL,
            job_group     TEXT    NOT NULL,
            schedule      TEXT    NOT NULL,   -- JSON-encoded Schedule enum
            misfire       TEXT    NOT NULL,
            trigger_data  TEXT    NOT NULL,   -- JSON object
            state         TEXT    NOT NULL DEFAULT 'normal',
            next_fire_ms  INTEGER,            -- epoch millis or NULL
            prev_fire_ms  INTEGER,
            times_fired   INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT    NOT NULL,
            UNIQUE (trigger_name, trigger_group)
        ) STRICT;

        -- Polling: WHERE state = 'normal' AND next_fire_ms <= ? ORDER BY next_fire_ms
        CREATE INDEX IF NOT EXISTS idx_{triggers}_due ON {triggers} (state, next_fire_ms);
        CREATE INDEX IF NOT EXISTS idx_{triggers}_job ON {triggers} (job_name, job_group);

        CREATE TABLE IF NOT EXISTS {paused} (
            trigger_group TEXT NOT NULL PRIMARY KEY
        ) STRICT;
        ",
        jobs = tables.jobs,
        triggers = tables.triggers,
        paused = tables.paused_groups,
    ))?;
    Ok(tables)
}
